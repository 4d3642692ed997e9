use std::path::PathBuf;

use async_trait::async_trait;
use grammers_client::{types::Chat, Client, Config, InitParams, InvocationError};
use grammers_session::Session;
use tokio::sync::Mutex;

use tga_core::{
    errors::Error,
    ports::{MessageSource, RawMessage, RawMessageStream},
    Result,
};

/// Bot API style ids for channels/supergroups are `-100` followed by the bare id.
const CHANNEL_ID_OFFSET: i64 = 1_000_000_000_000;

#[derive(Clone, Debug)]
pub struct TelegramSettings {
    pub api_id: i32,
    pub api_hash: String,
    /// A session file that was authorized beforehand (login is not handled here).
    pub session_file: PathBuf,
}

/// MTProto message source sharing one lazily established client.
pub struct TelegramSource {
    settings: TelegramSettings,
    client: Mutex<Option<Client>>,
}

impl TelegramSource {
    pub fn new(settings: TelegramSettings) -> Self {
        Self {
            settings,
            client: Mutex::new(None),
        }
    }

    async fn client(&self) -> Result<Client> {
        self.connect().await?;
        self.client
            .lock()
            .await
            .clone()
            .ok_or_else(|| Error::SourceTransport("telegram client is not connected".to_string()))
    }
}

#[async_trait]
impl MessageSource for TelegramSource {
    async fn connect(&self) -> Result<()> {
        let mut guard = self.client.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let path = &self.settings.session_file;
        let session = Session::load_file_or_create(path).map_err(|e| {
            Error::SourceTransport(format!("cannot open session {}: {e}", path.display()))
        })?;

        let client = Client::connect(Config {
            session,
            api_id: self.settings.api_id,
            api_hash: self.settings.api_hash.clone(),
            params: InitParams::default(),
        })
        .await
        .map_err(|e| Error::SourceTransport(format!("telegram connect failed: {e}")))?;

        let authorized = client.is_authorized().await.map_err(map_transport)?;
        if !authorized {
            return Err(Error::SourceTransport(format!(
                "telegram session {} is not authorized; sign in once with an interactive client",
                path.display()
            )));
        }

        tracing::info!(session = %path.display(), "telegram client connected");
        *guard = Some(client);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.client.lock().await.is_some()
    }

    async fn stream_messages(&self, channel: &str) -> Result<RawMessageStream> {
        let client = self.client().await?;
        let chat = resolve_chat(&client, channel).await?;
        tracing::debug!(channel, chat_id = chat.id(), "resolved chat");

        let packed = chat.pack();
        let stream = async_stream::try_stream! {
            let mut iter = client.iter_messages(packed);
            while let Some(msg) = iter.next().await.map_err(map_transport)? {
                yield RawMessage {
                    timestamp: Some(msg.date()),
                    sender_id: msg.sender().map(|s| s.id()),
                    text: Some(msg.text().to_string()),
                    id: i64::from(msg.id()),
                };
            }
        };
        Ok(Box::pin(stream))
    }

    async fn disconnect(&self) -> Result<()> {
        let Some(client) = self.client.lock().await.take() else {
            return Ok(());
        };
        let path = &self.settings.session_file;
        if let Err(e) = client.session().save_to_file(path) {
            tracing::warn!(error = %e, session = %path.display(), "failed to persist telegram session");
        }
        tracing::info!("telegram client disconnected");
        Ok(())
    }
}

/// What the user typed in the identifier list, normalized for lookup.
#[derive(Debug, PartialEq, Eq)]
enum ChatRef<'a> {
    Username(&'a str),
    Id(i64),
}

fn parse_chat_ref(raw: &str) -> ChatRef<'_> {
    let s = raw.trim();
    let s = s
        .strip_prefix("https://t.me/")
        .or_else(|| s.strip_prefix("t.me/"))
        .unwrap_or(s);
    let s = s.trim_start_matches('@').trim_end_matches('/');
    match s.parse::<i64>() {
        Ok(id) => ChatRef::Id(bare_chat_id(id)),
        Err(_) => ChatRef::Username(s),
    }
}

/// Bot API ids are "marked" (`-100…` channels, `-…` groups); MTProto uses bare ids.
fn bare_chat_id(id: i64) -> i64 {
    if id <= -CHANNEL_ID_OFFSET {
        -(id + CHANNEL_ID_OFFSET)
    } else if id < 0 {
        -id
    } else {
        id
    }
}

async fn resolve_chat(client: &Client, channel: &str) -> Result<Chat> {
    match parse_chat_ref(channel) {
        ChatRef::Username(name) if name.is_empty() => {
            Err(Error::ChannelUnavailable(channel.to_string()))
        }
        ChatRef::Username(name) => match client.resolve_username(name).await {
            Ok(Some(chat)) => Ok(chat),
            Ok(None) => Err(Error::ChannelUnavailable(channel.to_string())),
            Err(e) => Err(map_lookup(channel, e)),
        },
        // Numeric ids need an access hash, which only the dialog list provides.
        ChatRef::Id(id) => {
            let mut dialogs = client.iter_dialogs();
            while let Some(dialog) = dialogs.next().await.map_err(map_transport)? {
                if dialog.chat().id() == id {
                    return Ok(dialog.chat().clone());
                }
            }
            Err(Error::ChannelUnavailable(channel.to_string()))
        }
    }
}

fn map_lookup(channel: &str, e: InvocationError) -> Error {
    match &e {
        InvocationError::Rpc(rpc) if is_unavailable_rpc(&rpc.name) => {
            Error::ChannelUnavailable(channel.to_string())
        }
        _ => map_transport(e),
    }
}

fn is_unavailable_rpc(name: &str) -> bool {
    name.starts_with("USERNAME_")
        || name.starts_with("CHANNEL_")
        || matches!(name, "CHAT_INVALID" | "CHAT_FORBIDDEN" | "PEER_ID_INVALID")
}

fn map_transport(e: InvocationError) -> Error {
    Error::SourceTransport(format!("telegram error: {e}"))
}

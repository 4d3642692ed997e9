use std::sync::Arc;

use futures::StreamExt;

use crate::{
    domain::{ChannelRequest, FetchResult, Message},
    ports::{MessageSource, RawMessage},
    window::DateWindow,
    Error, Result,
};

/// Pulls one channel's history from the shared source and keeps the dated,
/// non-empty text messages inside the window.
#[derive(Clone)]
pub struct MessageFetcher {
    source: Arc<dyn MessageSource>,
}

impl MessageFetcher {
    pub fn new(source: Arc<dyn MessageSource>) -> Self {
        Self { source }
    }

    pub async fn fetch(&self, request: &ChannelRequest, window: &DateWindow) -> Result<FetchResult> {
        if !self.source.is_connected().await {
            tracing::info!("connecting to message source");
            self.source.connect().await.map_err(into_transport)?;
        }

        let mut stream = self
            .source
            .stream_messages(&request.identifier)
            .await
            .map_err(into_transport)?;

        // The source does not promise a monotonic order, so the whole stream is
        // scanned instead of stopping at the first out-of-window message.
        let mut messages = Vec::new();
        let mut scanned = 0usize;
        while let Some(raw) = stream.next().await {
            let raw = raw.map_err(into_transport)?;
            scanned += 1;
            if let Some(msg) = retain(raw, window) {
                messages.push(msg);
            }
        }

        tracing::debug!(
            channel = %request.identifier,
            scanned,
            kept = messages.len(),
            "channel scan finished"
        );

        Ok(FetchResult::new(request.display_token.clone(), messages))
    }
}

fn retain(raw: RawMessage, window: &DateWindow) -> Option<Message> {
    let ts = raw.timestamp?;
    if !window.contains(ts) {
        return None;
    }
    let text = raw.text.filter(|t| !t.is_empty())?;
    Some(Message {
        timestamp_utc: ts,
        sender_id: raw.sender_id,
        text,
        message_id: raw.id,
    })
}

/// Channel lookups keep their kind; anything else the source raises is a
/// transport failure for this channel.
fn into_transport(e: Error) -> Error {
    match e {
        Error::ChannelUnavailable(_) | Error::SourceTransport(_) => e,
        other => Error::SourceTransport(other.to_string()),
    }
}

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::Result;

/// A message as the chat platform hands it over, before any filtering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawMessage {
    pub timestamp: Option<DateTime<Utc>>,
    pub sender_id: Option<i64>,
    pub text: Option<String>,
    pub id: i64,
}

pub type RawMessageStream = BoxStream<'static, Result<RawMessage>>;

/// Hexagonal port for the chat platform.
///
/// Implementations own a single logical connection shared by the whole
/// process. Callers keep at most one stream in flight at a time.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Establish the session. Must be idempotent.
    async fn connect(&self) -> Result<()>;

    async fn is_connected(&self) -> bool;

    /// Lazily enumerate every message of a channel, in whatever order the
    /// platform returns them.
    ///
    /// Fails with `ChannelUnavailable` when the identifier does not resolve to
    /// an accessible chat.
    async fn stream_messages(&self, channel: &str) -> Result<RawMessageStream>;

    async fn disconnect(&self) -> Result<()>;
}

/// Hexagonal port for the object store receiving archives.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Destination container (bucket) name.
    fn container(&self) -> &str;

    /// Verify the container exists and create it otherwise.
    ///
    /// Check-then-create: two concurrent callers may both try to create it.
    async fn ensure_container(&self) -> Result<()>;

    /// Upload `local_path` under `key` and return the object's public URL.
    async fn put_object(&self, key: &str, local_path: &Path) -> Result<String>;
}

/// Where batch reports go after a scheduled run.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> Result<()>;
}

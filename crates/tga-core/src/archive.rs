//! JSON archives: serialization, local staging and upload to the sink.
//!
//! Artifact keys are `telegram_{identifier}_{YYYY_MM_DD}.json` where the date is
//! the day of the run. Exporting the same channel twice on the same day
//! overwrites the earlier artifact, locally and in the sink. There is no
//! versioning.
//!
//! Sanitizing is lossy: `a/b` and `a_b` map to the same key. The batch
//! orchestrator refuses the second of two such identifiers within one batch;
//! across batches the later run wins.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{NaiveDate, SecondsFormat};
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use crate::{
    domain::FetchResult,
    policy::{with_retry, RunPolicy},
    ports::ArtifactSink,
    Error, Result,
};

/// Where an archive ended up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactLocation {
    pub key: String,
    pub local_path: PathBuf,
    pub url: String,
}

#[derive(Serialize)]
struct ArchiveDocument<'a> {
    token_name: &'a str,
    message_count: usize,
    messages: Vec<ArchivedMessage<'a>>,
}

#[derive(Serialize)]
struct ArchivedMessage<'a> {
    date: String,
    sender_id: Option<i64>,
    message: &'a str,
    message_id: i64,
}

/// Deterministic artifact key for a channel and run date.
pub fn artifact_key(identifier: &str, run_date: NaiveDate) -> String {
    format!(
        "telegram_{}_{}.json",
        sanitize_identifier(identifier),
        run_date.format("%Y_%m_%d")
    )
}

/// Keep keys flat: anything that could act as a path component is replaced.
fn sanitize_identifier(identifier: &str) -> String {
    let out: String = identifier
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if out.is_empty() || out.chars().all(|c| c == '.') {
        return out.replace('.', "_");
    }
    out
}

/// Serialize a fetch result with stable key order and 4-space indentation.
pub fn render(result: &FetchResult) -> Result<Vec<u8>> {
    let doc = ArchiveDocument {
        token_name: &result.channel_token,
        message_count: result.message_count,
        messages: result
            .messages
            .iter()
            .map(|m| ArchivedMessage {
                date: m.timestamp_utc.to_rfc3339_opts(SecondsFormat::AutoSi, false),
                sender_id: m.sender_id,
                message: &m.text,
                message_id: m.message_id,
            })
            .collect(),
    };

    let mut buf = Vec::with_capacity(256 + result.messages.len() * 128);
    let fmt = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, fmt);
    doc.serialize(&mut ser)?;
    Ok(buf)
}

pub struct ArchiveWriter {
    archive_dir: PathBuf,
    sink: Arc<dyn ArtifactSink>,
}

impl ArchiveWriter {
    pub fn new(archive_dir: impl Into<PathBuf>, sink: Arc<dyn ArtifactSink>) -> Self {
        Self {
            archive_dir: archive_dir.into(),
            sink,
        }
    }

    /// Verify (or create) the destination container. Run once per batch.
    pub async fn ensure_container(&self) -> Result<()> {
        self.sink.ensure_container().await.map_err(|e| match e {
            Error::SinkUnavailable(_) => e,
            other => Error::SinkUnavailable(other.to_string()),
        })
    }

    /// Stage the archive locally, then upload it under the same key.
    ///
    /// Transient upload failures are retried from the staged file under
    /// `policy`; the archive is rendered and staged once.
    pub async fn write(
        &self,
        result: &FetchResult,
        identifier: &str,
        run_date: NaiveDate,
        policy: &RunPolicy,
    ) -> Result<ArtifactLocation> {
        let key = artifact_key(identifier, run_date);
        let body = render(result)?;
        let local_path = self.stage(&key, &body).await?;
        let url = with_retry(policy, "upload", identifier, || {
            self.upload(&key, &local_path)
        })
        .await?;
        Ok(ArtifactLocation {
            key,
            local_path,
            url,
        })
    }

    /// Upload an already staged archive. A failed upload leaves the local
    /// file in place for manual recovery.
    pub async fn upload(&self, key: &str, local_path: &Path) -> Result<String> {
        let url = self
            .sink
            .put_object(key, local_path)
            .await
            .map_err(|e| match e {
                Error::SinkWrite(_) => e,
                other => Error::SinkWrite(other.to_string()),
            })?;
        tracing::info!(
            key,
            bucket = self.sink.container(),
            "archive uploaded"
        );
        Ok(url)
    }

    /// Write `body` to `<dir>/<key>` through a `.partial` file so an
    /// interrupted write never leaves a truncated archive under the final name.
    pub async fn stage(&self, key: &str, body: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.archive_dir).await?;
        let final_path = self.archive_dir.join(key);
        let partial_path = self.archive_dir.join(format!("{key}.partial"));

        if let Err(e) = write_synced(&partial_path, body).await {
            let _ = tokio::fs::remove_file(&partial_path).await;
            return Err(Error::Io(e));
        }
        if let Err(e) = tokio::fs::rename(&partial_path, &final_path).await {
            let _ = tokio::fs::remove_file(&partial_path).await;
            return Err(Error::Io(e));
        }

        tracing::debug!(path = %final_path.display(), bytes = body.len(), "archive staged");
        Ok(final_path)
    }
}

async fn write_synced(path: &Path, body: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(body).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}

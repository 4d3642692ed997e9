//! Batch export: one fetch + archive per channel, failures isolated per channel.

use std::{collections::HashMap, sync::Arc};

use chrono::{NaiveDate, Utc};
use tokio::sync::Mutex;

use crate::{
    archive::{artifact_key, ArchiveWriter},
    domain::{BatchSummary, ChannelOutcome, ChannelRequest, FetchResult},
    fetcher::MessageFetcher,
    policy::with_retry,
    window::DateWindow,
    Error, Result,
};

pub use crate::policy::RunPolicy;

pub struct BatchOrchestrator {
    fetcher: MessageFetcher,
    writer: ArchiveWriter,
    policy: RunPolicy,
    // One batch at a time: the source connection is not multiplexed.
    batch_lock: Mutex<()>,
}

impl BatchOrchestrator {
    pub fn new(fetcher: MessageFetcher, writer: ArchiveWriter, policy: RunPolicy) -> Self {
        Self {
            fetcher,
            writer,
            policy,
            batch_lock: Mutex::new(()),
        }
    }

    /// Export every identifier and report one outcome per identifier, in order.
    ///
    /// Only container provisioning can fail the whole batch; every other
    /// failure is recorded as a `Failed` outcome and the batch moves on.
    pub async fn run(&self, identifiers: &[String], window: &DateWindow) -> Result<BatchSummary> {
        let _guard = self.batch_lock.lock().await;
        let run_date = Utc::now().date_naive();

        if identifiers.is_empty() {
            tracing::info!("empty identifier list, nothing to export");
            return Ok(BatchSummary::default());
        }

        tracing::info!(
            channels = identifiers.len(),
            window = %window,
            "starting export batch"
        );
        self.writer.ensure_container().await?;

        // key -> identifier that produced it in this batch
        let mut claimed: HashMap<String, String> = HashMap::new();
        let mut outcomes = Vec::with_capacity(identifiers.len());
        for identifier in identifiers {
            let request = ChannelRequest::new(identifier.as_str());
            let key = artifact_key(&request.identifier, run_date);
            let taken_by = claimed
                .get(&key)
                .filter(|owner| **owner != request.identifier)
                .cloned();
            let result = match taken_by {
                Some(owner) => Err(Error::SinkWrite(format!(
                    "artifact key '{key}' is already used by '{owner}' in this batch"
                ))),
                None => {
                    claimed.insert(key, request.identifier.clone());
                    self.export_one(&request, window, run_date).await
                }
            };
            let outcome = match result {
                Ok((count, url)) => {
                    tracing::info!(channel = %request.identifier, messages = count, url = %url, "channel exported");
                    ChannelOutcome::success(&request.identifier, count, url)
                }
                Err(e) => {
                    tracing::warn!(channel = %request.identifier, error = %e, "channel export failed");
                    ChannelOutcome::failed(&request.identifier, e.to_string())
                }
            };
            outcomes.push(outcome);
        }

        let summary = BatchSummary { outcomes };
        tracing::info!(
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            "export batch finished"
        );
        Ok(summary)
    }

    async fn export_one(
        &self,
        request: &ChannelRequest,
        window: &DateWindow,
        run_date: NaiveDate,
    ) -> Result<(usize, String)> {
        let result = with_retry(&self.policy, "fetch", &request.identifier, || {
            self.fetch_bounded(request, window)
        })
        .await?;

        let location = self
            .writer
            .write(&result, &request.identifier, run_date, &self.policy)
            .await?;
        Ok((result.message_count, location.url))
    }

    async fn fetch_bounded(&self, request: &ChannelRequest, window: &DateWindow) -> Result<FetchResult> {
        let fut = self.fetcher.fetch(request, window);
        match self.policy.fetch_timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await.unwrap_or_else(|_| {
                Err(Error::SourceTransport(format!(
                    "fetch of '{}' timed out after {}s",
                    request.identifier,
                    limit.as_secs()
                )))
            }),
            None => fut.await,
        }
    }
}

/// Convenience for wiring: build the whole pipeline around shared ports.
pub fn build(
    source: Arc<dyn crate::ports::MessageSource>,
    sink: Arc<dyn crate::ports::ArtifactSink>,
    archive_dir: impl Into<std::path::PathBuf>,
    policy: RunPolicy,
) -> BatchOrchestrator {
    BatchOrchestrator::new(
        MessageFetcher::new(source),
        ArchiveWriter::new(archive_dir, sink),
        policy,
    )
}

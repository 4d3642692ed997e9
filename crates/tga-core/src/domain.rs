use chrono::{DateTime, Utc};
use serde::Serialize;

/// One requested export unit, built from one line of an identifier list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelRequest {
    /// Username (with or without `@`) or numeric chat id.
    pub identifier: String,
    /// Label written into the archive as `token_name`.
    pub display_token: String,
}

impl ChannelRequest {
    pub fn new(identifier: impl Into<String>) -> Self {
        let identifier = identifier.into().trim().to_string();
        let display_token = format!("Token_{identifier}");
        Self {
            identifier,
            display_token,
        }
    }
}

/// A retained text message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub timestamp_utc: DateTime<Utc>,
    pub sender_id: Option<i64>,
    pub text: String,
    pub message_id: i64,
}

/// Messages of one channel that passed the window and content filters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchResult {
    pub channel_token: String,
    pub message_count: usize,
    pub messages: Vec<Message>,
}

impl FetchResult {
    pub fn new(channel_token: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            channel_token: channel_token.into(),
            message_count: messages.len(),
            messages,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Failed,
}

/// Per-channel result of a batch.
///
/// Serializes to the wire shape the triggers report:
/// `{username, status, message_count?, s3_file?, error?}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChannelOutcome {
    #[serde(rename = "username")]
    pub identifier: String,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_count: Option<usize>,
    #[serde(rename = "s3_file", skip_serializing_if = "Option::is_none")]
    pub artifact_location: Option<String>,
    #[serde(rename = "error", skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl ChannelOutcome {
    pub fn success(identifier: &str, message_count: usize, artifact_location: String) -> Self {
        Self {
            identifier: identifier.to_string(),
            status: OutcomeStatus::Success,
            message_count: Some(message_count),
            artifact_location: Some(artifact_location),
            error_detail: None,
        }
    }

    pub fn failed(identifier: &str, error_detail: String) -> Self {
        Self {
            identifier: identifier.to_string(),
            status: OutcomeStatus::Failed,
            message_count: None,
            artifact_location: None,
            error_detail: Some(error_detail),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

/// Outcomes of one batch, in the order the identifiers were supplied.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    #[serde(rename = "summary")]
    pub outcomes: Vec<ChannelOutcome>,
}

impl BatchSummary {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// Short plain-text report (one line per channel) for notifications.
    pub fn to_report(&self) -> String {
        let mut lines = vec![format!(
            "Export finished: {} ok, {} failed",
            self.succeeded(),
            self.failed()
        )];
        for o in &self.outcomes {
            match (&o.status, &o.error_detail) {
                (OutcomeStatus::Success, _) => lines.push(format!(
                    "+ {}: {} messages",
                    o.identifier,
                    o.message_count.unwrap_or_default()
                )),
                (OutcomeStatus::Failed, err) => lines.push(format!(
                    "- {}: {}",
                    o.identifier,
                    err.as_deref().unwrap_or("unknown error")
                )),
            }
        }
        lines.join("\n")
    }
}

/// Parse an uploaded or on-disk identifier list (one identifier per line).
///
/// Lines are trimmed; blank lines and `#` comments are skipped.
pub fn parse_identifier_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

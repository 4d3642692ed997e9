/// Core error type for the exporter.
///
/// Adapter crates map their specific errors into this type so the orchestrator
/// can retry transient failures and the HTTP layer can spot client errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid date format. Use YYYY-MM-DD. (got {0:?})")]
    InvalidDateFormat(String),

    #[error("invalid date range: from_date {from} is after to_date {to}")]
    InvalidDateRange {
        from: chrono::NaiveDate,
        to: chrono::NaiveDate,
    },

    #[error("Chat '{0}' not found or inaccessible.")]
    ChannelUnavailable(String),

    #[error("message source error: {0}")]
    SourceTransport(String),

    #[error("sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("sink write failed: {0}")]
    SinkWrite(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// Client input errors (bad query parameters, bad upload).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidDateFormat(_) | Error::InvalidDateRange { .. }
        )
    }

    /// Failures worth another attempt under the configured retry budget.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::SourceTransport(_) | Error::SinkWrite(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

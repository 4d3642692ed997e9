use std::{net::SocketAddr, path::PathBuf, time::Duration};

use chrono_tz::Tz;

use crate::{errors::Error, orchestrator::RunPolicy, Result};

/// Typed configuration, read from the environment (and `.env` when present).
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram (MTProto) source
    pub telegram_api_id: i32,
    pub telegram_api_hash: String,
    pub telegram_phone: Option<String>,
    pub telegram_session_file: PathBuf,

    // S3 sink
    pub aws_region: String,
    pub s3_bucket: String,
    pub s3_endpoint: Option<String>,

    // Pipeline
    pub archive_dir: PathBuf,
    pub fetch_timeout: Option<Duration>,
    pub fetch_max_attempts: u32,
    pub retry_backoff: Duration,

    // Scheduled trigger
    pub schedule_cron: String,
    pub schedule_timezone: Tz,

    // Optional Bot API notification after scheduled runs
    pub notify_bot_token: Option<String>,
    pub notify_chat_id: Option<i64>,

    // HTTP trigger
    pub http_bind: SocketAddr,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Existing env always wins over `.env`.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from any key lookup (the process env in production, a map in tests).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |k: &str| get(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let telegram_api_id = required(&get, "API_ID")?
            .parse::<i32>()
            .map_err(|_| Error::Config("API_ID must be an integer".to_string()))?;
        let telegram_api_hash = required(&get, "API_HASH")?;
        let telegram_phone = get("PHONENUMBER");
        let telegram_session_file = PathBuf::from(
            get("TELEGRAM_SESSION_FILE").unwrap_or_else(|| "session_name.session".to_string()),
        );

        let aws_region = required(&get, "AWS_REGION")?;
        let s3_bucket = required(&get, "S3_BUCKET_NAME")?;
        let s3_endpoint = get("S3_ENDPOINT");

        let archive_dir = PathBuf::from(get("ARCHIVE_DIR").unwrap_or_else(|| ".".to_string()));

        // 0 disables the deadline.
        let fetch_timeout = match parse_num::<u64>(&get, "FETCH_TIMEOUT_SECS")?.unwrap_or(900) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let fetch_max_attempts = parse_num::<u32>(&get, "FETCH_MAX_ATTEMPTS")?
            .unwrap_or(1)
            .clamp(1, 10);
        let retry_backoff =
            Duration::from_millis(parse_num::<u64>(&get, "RETRY_BACKOFF_MS")?.unwrap_or(2000));

        let schedule_cron = get("SCHEDULE_CRON").unwrap_or_else(|| "1 0 * * *".to_string());
        let tz_name = get("SCHEDULE_TIMEZONE").unwrap_or_else(|| "US/Pacific".to_string());
        let schedule_timezone = tz_name
            .parse::<Tz>()
            .map_err(|_| Error::Config(format!("unknown SCHEDULE_TIMEZONE: {tz_name}")))?;

        let notify_bot_token = get("NOTIFY_BOT_TOKEN");
        let notify_chat_id = parse_num::<i64>(&get, "NOTIFY_CHAT_ID")?;

        let bind = get("HTTP_BIND").unwrap_or_else(|| "0.0.0.0:8000".to_string());
        let http_bind = bind
            .parse::<SocketAddr>()
            .map_err(|_| Error::Config(format!("invalid HTTP_BIND: {bind}")))?;

        Ok(Self {
            telegram_api_id,
            telegram_api_hash,
            telegram_phone,
            telegram_session_file,
            aws_region,
            s3_bucket,
            s3_endpoint,
            archive_dir,
            fetch_timeout,
            fetch_max_attempts,
            retry_backoff,
            schedule_cron,
            schedule_timezone,
            notify_bot_token,
            notify_chat_id,
            http_bind,
        })
    }

    pub fn run_policy(&self) -> RunPolicy {
        RunPolicy {
            fetch_timeout: self.fetch_timeout,
            max_attempts: self.fetch_max_attempts,
            retry_backoff: self.retry_backoff,
        }
    }

    /// Bot token and chat id, when both are configured.
    pub fn notify_target(&self) -> Option<(&str, i64)> {
        Some((self.notify_bot_token.as_deref()?, self.notify_chat_id?))
    }
}

fn required(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    get(key).ok_or_else(|| Error::Config(format!("{key} environment variable is required")))
}

fn parse_num<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    get(key)
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| Error::Config(format!("{key} must be a number, got {v:?}")))
        })
        .transpose()
}

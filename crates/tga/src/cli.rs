use std::{net::SocketAddr, path::PathBuf};

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "tga", about = "Export Telegram channel history to S3 as JSON archives")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Export every channel listed in FILE once and print the summary.
    Export {
        /// File with one channel username or id per line.
        file: PathBuf,
        /// First day to include (YYYY-MM-DD, UTC).
        #[arg(long = "from_date", alias = "from-date")]
        from_date: Option<String>,
        /// Last day to include (YYYY-MM-DD, UTC).
        #[arg(long = "to_date", alias = "to-date")]
        to_date: Option<String>,
    },
    /// Run the HTTP trigger and, with a schedule file, the daily export.
    Serve {
        /// Listen address (overrides HTTP_BIND).
        #[arg(long)]
        bind: Option<SocketAddr>,
        /// Identifier list re-read on every scheduled run.
        #[arg(long, env = "SCHEDULE_FILE")]
        schedule_file: Option<PathBuf>,
    },
}

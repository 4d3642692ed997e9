mod cli;

use std::{path::Path, sync::Arc};

use anyhow::Context;
use clap::Parser;

use tga_core::{
    config::Config,
    domain::parse_identifier_list,
    orchestrator::{self, BatchOrchestrator},
    ports::{MessageSource, Notifier},
    scheduler::ExportScheduler,
    window::DateWindow,
};
use tga_s3::{S3Settings, S3Sink};
use tga_telegram::{TelegramNotifier, TelegramSettings, TelegramSource};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tga_core::logging::init("tga")?;

    let cfg = Config::load()?;
    let source = Arc::new(TelegramSource::new(TelegramSettings {
        api_id: cfg.telegram_api_id,
        api_hash: cfg.telegram_api_hash.clone(),
        session_file: cfg.telegram_session_file.clone(),
    }));
    let sink = Arc::new(
        S3Sink::from_settings(&S3Settings {
            region: cfg.aws_region.clone(),
            bucket: cfg.s3_bucket.clone(),
            endpoint: cfg.s3_endpoint.clone(),
        })
        .await,
    );
    let orchestrator = Arc::new(orchestrator::build(
        source.clone(),
        sink,
        cfg.archive_dir.clone(),
        cfg.run_policy(),
    ));

    let outcome = match cli.command {
        Commands::Export {
            file,
            from_date,
            to_date,
        } => export(&orchestrator, &file, from_date.as_deref(), to_date.as_deref()).await,
        Commands::Serve {
            bind,
            schedule_file,
        } => {
            let addr = bind.unwrap_or(cfg.http_bind);
            serve(&cfg, orchestrator, addr, schedule_file.as_deref()).await
        }
    };

    if let Err(e) = source.disconnect().await {
        tracing::warn!(error = %e, "telegram disconnect failed");
    }
    outcome
}

async fn export(
    orchestrator: &BatchOrchestrator,
    file: &Path,
    from_date: Option<&str>,
    to_date: Option<&str>,
) -> anyhow::Result<()> {
    let window = DateWindow::normalize(from_date, to_date)?;
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("cannot read identifier file {}", file.display()))?;
    let identifiers = parse_identifier_list(&content);

    let summary = orchestrator.run(&identifiers, &window).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn serve(
    cfg: &Config,
    orchestrator: Arc<BatchOrchestrator>,
    addr: std::net::SocketAddr,
    schedule_file: Option<&Path>,
) -> anyhow::Result<()> {
    let scheduler = match schedule_file {
        Some(file) => {
            let notifier = cfg.notify_target().map(|(token, chat_id)| {
                Arc::new(TelegramNotifier::from_token(token, chat_id)) as Arc<dyn Notifier>
            });
            let scheduler = ExportScheduler::new(
                file,
                &cfg.schedule_cron,
                cfg.schedule_timezone,
                orchestrator.clone(),
                notifier,
            )?;
            scheduler.start().await;
            Some(scheduler)
        }
        None => {
            tracing::info!("no schedule file given, scheduled export disabled");
            None
        }
    };

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    let state = tga_http::AppState { orchestrator };
    let served = tga_http::serve(listener, state, shutdown_signal()).await;

    if let Some(scheduler) = scheduler {
        scheduler.stop().await;
    }
    served.context("http server failed")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

use anyhow::{Context, Result};
use caretaker_monitor::capture::{FrameSource, StillImageSource, SyntheticSource};
use caretaker_monitor::cli::{Cli, SourceArgs};
use caretaker_monitor::presenter;
use caretaker_monitor::telemetry::logging;
use caretaker_monitor::transport::WsDialer;
use caretaker_monitor::{MonitorConfig, MonitoringSession};
use clap::Parser;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    logging::init(&cli.logging.to_config()).context("failed to initialise logging")?;

    let mut config =
        MonitorConfig::load(cli.config.as_deref()).context("failed to load monitor config")?;
    if let Some(endpoint) = cli.endpoint.as_deref() {
        config = config
            .with_endpoint(endpoint)
            .context("invalid --endpoint")?;
    }

    let source = open_source(&cli.source)?;
    info!(
        target = "caretaker::main",
        endpoint = %config.endpoint,
        interval_ms = config.frame_interval.as_millis() as u64,
        "starting monitoring session"
    );

    let handle = MonitoringSession::start(
        &config,
        source,
        Arc::new(WsDialer::new(config.connect_timeout)),
    );

    let mut snapshots = handle.subscribe();
    let mut shown = snapshots.borrow_and_update().clone();
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = snapshots.borrow_and_update().clone();
                for change in presenter::diff(&shown, &next) {
                    presenter::log_change(&change);
                }
                shown = next;
            }
        }
    }

    let report = handle.stop().await.context("session did not stop cleanly")?;
    println!(
        "ticks={} sent={} dropped_busy={} dropped_not_connected={} empty_captures={} replies={} rejected_replies={} overlays_dropped={} reconnects={}",
        report.pacer.ticks,
        report.pacer.sent,
        report.pacer.dropped_busy,
        report.pacer.dropped_not_connected,
        report.pacer.empty_captures,
        report.router.routed,
        report.router.rejected,
        report.router.overlays_dropped,
        report.reconnect_attempts,
    );
    Ok(())
}

fn open_source(args: &SourceArgs) -> Result<Box<dyn FrameSource>> {
    match &args.frames_dir {
        Some(dir) => {
            let source = StillImageSource::open(dir)
                .with_context(|| format!("failed to open frames directory {}", dir.display()))?;
            info!(target = "caretaker::main", stills = source.len(), "replaying stills");
            Ok(Box::new(source))
        }
        None => {
            let source = SyntheticSource::new(args.width, args.height)
                .context("invalid synthetic frame size")?
                .with_quality(args.quality);
            Ok(Box::new(source))
        }
    }
}

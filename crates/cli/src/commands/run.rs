//! `run` command implementation.

use anyhow::{Context, Result};
use contracts::CompositorConfig;
use std::time::Duration;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::pipeline::{Pipeline, PipelineConfig};

use super::load_config;

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => {
            info!(config = %path.display(), "Loading configuration");
            load_config(path)?
        }
        None => {
            info!("No configuration file given, using defaults");
            CompositorConfig::default()
        }
    };

    if let Some(hz) = args.refresh_hz {
        if let Some(primary) = config.displays.first_mut() {
            info!(refresh_hz = hz, "Overriding primary refresh rate from CLI");
            primary.refresh_rate_hz = hz;
        }
        config_loader::ConfigLoader::validate(&config).context("Invalid --refresh-hz")?;
    }
    if let Some(port) = args.metrics_port {
        config.observability.metrics_port = (port != 0).then_some(port);
    }

    info!(
        displays = config.displays.len(),
        producers = args.producers,
        producer_fps = args.producer_fps,
        "Configuration loaded"
    );

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&config);
        return Ok(());
    }

    let pipeline = Pipeline::new(PipelineConfig {
        metrics_port: config.observability.metrics_port,
        compositor: config,
        producers: args.producers,
        producer_fps: args.producer_fps,
        jitter_ns: args.jitter_us.saturating_mul(1_000) as i64,
        seed: args.seed,
        refresh_skip: args.refresh_skip,
    });

    let duration = (args.duration > 0).then(|| Duration::from_secs(args.duration));
    let shutdown = async move {
        match duration {
            Some(duration) => tokio::select! {
                _ = tokio::time::sleep(duration) => info!("Run duration elapsed"),
                _ = shutdown_signal() => warn!("Received shutdown signal, stopping pipeline..."),
            },
            None => {
                shutdown_signal().await;
                warn!("Received shutdown signal, stopping pipeline...");
            }
        }
    };

    info!("Starting pipeline...");
    let stats = pipeline.run(shutdown).await.context("Pipeline execution failed")?;

    info!(
        refreshes = stats.scheduler.refreshes,
        compositions = stats.scheduler.compositions,
        duration_secs = stats.duration.as_secs_f64(),
        fps = format!("{:.2}", stats.fps()),
        "Pipeline completed successfully"
    );
    stats.print_summary();

    info!("framesched finished");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(config: &CompositorConfig) {
    println!("\n=== Configuration Summary ===\n");
    println!("Displays ({}):", config.displays.len());
    for (index, display) in config.displays.iter().enumerate() {
        println!(
            "  - {} [{}] {}x{} @ {:.2} Hz{}",
            display.name,
            display.layer_stack,
            display.width,
            display.height,
            display.refresh_rate_hz,
            if index == 0 { " (primary)" } else { "" }
        );
    }
    println!("\nVsync:");
    println!(
        "  Phase offsets: app={} ns, sf={} ns",
        config.vsync.app_phase_offset_ns, config.vsync.sf_phase_offset_ns
    );
    println!("  Refresh skip: {}", config.vsync.refresh_skip_count);
    println!("\nFrame queue:");
    println!("  Capacity: {}", config.frame_queue.capacity);
    println!("  Latch unsignaled: {}", config.frame_queue.latch_unsignaled);
    println!();
}

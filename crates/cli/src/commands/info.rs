//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::CompositorConfig;
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;

use super::load_config;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    displays: Vec<DisplayInfo>,
    frame_queue: QueueInfo,
    transaction: TransactionInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    vsync: Option<VsyncInfo>,
}

#[derive(Serialize)]
struct DisplayInfo {
    name: String,
    layer_stack: u32,
    width: u32,
    height: u32,
    refresh_rate_hz: f64,
    period_ns: i64,
    primary: bool,
}

#[derive(Serialize)]
struct QueueInfo {
    capacity: usize,
    latch_unsignaled: bool,
    present_plausibility_ms: u64,
}

#[derive(Serialize)]
struct TransactionInfo {
    sync_timeout_ms: u64,
    max_layers: usize,
}

#[derive(Serialize)]
struct VsyncInfo {
    max_resync_samples: usize,
    min_resync_samples_for_update: usize,
    num_present_samples: usize,
    error_threshold_ns2: i64,
    min_event_spacing_ratio: f64,
    refresh_skip_count: u32,
    app_phase_offset_ns: i64,
    sf_phase_offset_ns: i64,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    let config = load_config(&args.config)?;

    if args.json {
        let info = build_config_info(&config, args.vsync);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{json}");
    } else {
        print_config_info(&config, args.vsync);
    }

    Ok(())
}

fn build_config_info(config: &CompositorConfig, with_vsync: bool) -> ConfigInfo {
    ConfigInfo {
        displays: config
            .displays
            .iter()
            .enumerate()
            .map(|(index, d)| DisplayInfo {
                name: d.name.clone(),
                layer_stack: d.layer_stack.0,
                width: d.width,
                height: d.height,
                refresh_rate_hz: d.refresh_rate_hz,
                period_ns: d.period_ns(),
                primary: index == 0,
            })
            .collect(),
        frame_queue: QueueInfo {
            capacity: config.frame_queue.capacity,
            latch_unsignaled: config.frame_queue.latch_unsignaled,
            present_plausibility_ms: config.frame_queue.present_plausibility_ms,
        },
        transaction: TransactionInfo {
            sync_timeout_ms: config.transaction.sync_timeout_ms,
            max_layers: config.transaction.max_layers,
        },
        vsync: with_vsync.then(|| VsyncInfo {
            max_resync_samples: config.vsync.max_resync_samples,
            min_resync_samples_for_update: config.vsync.min_resync_samples_for_update,
            num_present_samples: config.vsync.num_present_samples,
            error_threshold_ns2: config.vsync.error_threshold_ns2,
            min_event_spacing_ratio: config.vsync.min_event_spacing_ratio,
            refresh_skip_count: config.vsync.refresh_skip_count,
            app_phase_offset_ns: config.vsync.app_phase_offset_ns,
            sf_phase_offset_ns: config.vsync.sf_phase_offset_ns,
        }),
    }
}

fn print_config_info(config: &CompositorConfig, with_vsync: bool) {
    let info = build_config_info(config, with_vsync);

    println!("\n=== Frame Scheduler Configuration ===\n");
    println!("Displays:");
    for display in &info.displays {
        println!(
            "  {} {} (stack{}) {}x{} @ {:.2} Hz, period {} ns",
            if display.primary { "*" } else { "-" },
            display.name,
            display.layer_stack,
            display.width,
            display.height,
            display.refresh_rate_hz,
            display.period_ns
        );
    }

    println!("\nFrame queue:");
    println!("  Capacity: {}", info.frame_queue.capacity);
    println!("  Latch unsignaled: {}", info.frame_queue.latch_unsignaled);
    println!(
        "  Present plausibility: {} ms",
        info.frame_queue.present_plausibility_ms
    );

    println!("\nTransactions:");
    println!("  Sync timeout: {} ms", info.transaction.sync_timeout_ms);
    println!("  Max layers: {}", info.transaction.max_layers);

    if let Some(vsync) = &info.vsync {
        println!("\nVsync model:");
        println!(
            "  Resync samples: {} (update after {})",
            vsync.max_resync_samples, vsync.min_resync_samples_for_update
        );
        println!("  Present samples: {}", vsync.num_present_samples);
        println!("  Error threshold: {} ns²", vsync.error_threshold_ns2);
        println!("  Min event spacing: {:.2} periods", vsync.min_event_spacing_ratio);
        println!("  Refresh skip: {}", vsync.refresh_skip_count);
        println!(
            "  Phase offsets: app={} ns, sf={} ns",
            vsync.app_phase_offset_ns, vsync.sf_phase_offset_ns
        );
    }

    println!();
}

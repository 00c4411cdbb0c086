//! Pipeline orchestrator - wires the scheduler to the simulated hardware
//! and producers, runs it until shutdown, and collects statistics.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use contracts::{Clock, CompositorConfig, DirectAcquirer, MonotonicClock, Nsecs, VsyncControl};
use observability::{record_model_snapshot, FrameMetricsAggregator};
use scheduler::RefreshScheduler;
use tokio::sync::watch;
use tracing::{info, warn};

use super::display::{spawn_hw_vsync, SimulatedComposer, SimulatedDisplay};
use super::producer::{run_producer, ProducerSpec};
use super::PipelineStats;
use crate::error::CliError;

/// How often the vsync model is sampled for metrics.
const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Grace period for producers to remove their surfaces.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub compositor: CompositorConfig,

    /// Simulated producer surfaces on the primary display
    pub producers: usize,

    pub producer_fps: f64,

    /// Hardware vsync timestamp jitter (+/-)
    pub jitter_ns: Nsecs,

    pub seed: u64,

    /// Runtime refresh skip override (None = keep configuration)
    pub refresh_skip: Option<u32>,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> Result<PipelineStats>
    where
        F: Future<Output = ()>,
    {
        let start_time = Instant::now();
        let compositor = &self.config.compositor;

        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        let primary = compositor
            .primary_display()
            .context("Configuration has no display")?
            .clone();
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());

        info!(
            display = %primary.name,
            refresh_hz = primary.refresh_rate_hz,
            jitter_ns = self.config.jitter_ns,
            "Simulating display"
        );
        let display = Arc::new(SimulatedDisplay::new(
            primary.layer_stack,
            Arc::clone(&clock),
            primary.period_ns(),
        ));
        let metrics = Arc::new(Mutex::new(FrameMetricsAggregator::new()));
        let composer =
            SimulatedComposer::new(Arc::clone(&display), Arc::clone(&clock), Arc::clone(&metrics));

        let control: Arc<dyn VsyncControl> = display.clone();
        let mut scheduler = RefreshScheduler::new(
            compositor,
            Arc::clone(&clock),
            control,
            composer,
            Box::new(DirectAcquirer),
        )
        .context("Failed to create refresh scheduler")?;
        if let Some(skip) = self.config.refresh_skip {
            scheduler.set_refresh_skip_count(skip);
        }

        // Simulated hardware
        let stop_hw = Arc::new(AtomicBool::new(false));
        let hw_thread = spawn_hw_vsync(
            Arc::clone(&display),
            Arc::clone(scheduler.hw_vsync()),
            self.config.jitter_ns,
            self.config.seed,
            Arc::clone(&stop_hw),
        )
        .map_err(CliError::from)
        .context("Failed to start hardware vsync thread")?;

        // Producers
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut producers = Vec::with_capacity(self.config.producers);
        for index in 0..self.config.producers {
            let spec = ProducerSpec {
                name: format!("app-{index}"),
                layer_stack: primary.layer_stack,
                z: index as i32,
                size: (primary.width / 2, primary.height / 2),
                area: (primary.width, primary.height),
                fps: self.config.producer_fps,
                // the bottom surface is opaque, the rest blend
                opaque: index == 0,
                seed: self.config.seed.wrapping_add(index as u64 + 1),
            };
            producers.push(tokio::spawn(run_producer(
                Arc::clone(scheduler.store()),
                Arc::clone(&clock),
                Some(Arc::clone(scheduler.app_vsync())),
                spec,
                shutdown_rx.clone(),
            )));
        }
        info!(producers = producers.len(), "Producers started");

        // Model sampler
        let sampler = {
            let model = Arc::clone(scheduler.model());
            let metrics = Arc::clone(&metrics);
            let mut shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = ticker.tick() => {
                            let snapshot = model.snapshot();
                            record_model_snapshot(&snapshot);
                            metrics
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .observe_model(&snapshot);
                        }
                    }
                }
            })
        };

        info!("Pipeline running");
        let run_result = scheduler.run(shutdown).await;

        // Shutdown
        info!("Shutting down pipeline...");
        let _ = shutdown_tx.send(true);
        let mut producer_reports = Vec::new();
        for handle in producers {
            match tokio::time::timeout(DRAIN_TIMEOUT, handle).await {
                Ok(Ok(Ok(report))) => producer_reports.push(report),
                Ok(Ok(Err(e))) => warn!(error = %e, "Producer failed"),
                Ok(Err(e)) => warn!(error = %e, "Producer task panicked"),
                Err(_) => warn!("Producer did not stop in time"),
            }
        }
        let _ = sampler.await;

        stop_hw.store(true, Ordering::Release);
        scheduler.stop();
        let hw_vsync_events = tokio::task::spawn_blocking(move || hw_thread.join())
            .await
            .context("Failed to join hardware vsync thread")?
            .map_err(|_| CliError::simulation("hardware vsync thread panicked"))?;

        run_result.context("Refresh scheduler failed")?;

        let mut metrics = std::mem::take(&mut *metrics.lock().unwrap_or_else(PoisonError::into_inner));
        for report in &producer_reports {
            metrics.observe_queue(&report.name, report.queue);
        }

        let stats = PipelineStats {
            scheduler: scheduler.stats().clone(),
            duration: start_time.elapsed(),
            hw_vsync_events,
            hw_vsync_toggles: display.vsync_toggles(),
            model: scheduler.model().snapshot(),
            timing: scheduler.compositor_timing(),
            frame_fractions: scheduler.histogram().fractions(),
            composed_frames: scheduler.composer().frames(),
            recomposed_frames: scheduler.composer().recomposed(),
            producers: producer_reports,
            metrics,
        };

        info!(
            duration_secs = stats.duration.as_secs_f64(),
            fps = format!("{:.2}", stats.fps()),
            "Pipeline shutdown complete"
        );

        Ok(stats)
    }
}

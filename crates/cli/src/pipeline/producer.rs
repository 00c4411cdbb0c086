//! Simulated client: one surface, a steady stream of frames, and occasional
//! position changes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use contracts::{
    BufferHandle, BufferItem, Clock, ContractError, LayerChange, LayerStackId, LayerState,
    PixelFormat, SubmitOutcome, Transaction,
};
use frame_sync::FrameQueueSnapshot;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use scheduler::AppVsyncSource;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use transaction::TransactionStore;

/// Frames between two position changes.
const MOVE_EVERY: u64 = 30;

/// Longest wait for an app vsync before stamping the frame with `now`.
const APP_VSYNC_WAIT: Duration = Duration::from_millis(100);

/// What one producer creates.
#[derive(Debug, Clone)]
pub struct ProducerSpec {
    pub name: String,
    pub layer_stack: LayerStackId,
    pub z: i32,
    pub size: (u32, u32),
    /// Display bounds used to place the surface
    pub area: (u32, u32),
    pub fps: f64,
    pub opaque: bool,
    pub seed: u64,
}

/// Final counters of one producer.
#[derive(Debug, Clone, Default)]
pub struct ProducerReport {
    pub name: String,
    pub frames_queued: u64,
    pub frames_refused: u64,
    pub moves: u64,
    pub queue: FrameQueueSnapshot,
}

/// Queue frames at `spec.fps` until `shutdown` flips, then remove the
/// surface.
///
/// With `app_vsync`, each frame is timed to the next app vsync like a
/// choreographed client.
pub async fn run_producer(
    store: Arc<TransactionStore>,
    clock: Arc<dyn Clock>,
    app_vsync: Option<Arc<AppVsyncSource>>,
    spec: ProducerSpec,
    mut shutdown: watch::Receiver<bool>,
) -> Result<ProducerReport> {
    let mut rng = StdRng::seed_from_u64(spec.seed);
    let mut state = LayerState::new(spec.name.as_str(), spec.size);
    state.layer_stack = spec.layer_stack;
    state.z = spec.z;
    state.position = random_position(&mut rng, &spec);
    state.flags.opaque = spec.opaque;

    let (surface, producer) = store
        .create_surface(state)
        .with_context(|| format!("Failed to create surface '{}'", spec.name))?;
    info!(surface = %surface, name = %spec.name, fps = spec.fps, "producer started");

    let mut report = ProducerReport {
        name: spec.name.clone(),
        ..Default::default()
    };
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / spec.fps.max(1.0)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut frame_number = 0u64;
    let mut vsync_rx = app_vsync.as_ref().map(|source| source.subscribe());

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let timestamp = match (&app_vsync, vsync_rx.as_mut()) {
                    (Some(source), Some(rx)) => {
                        source.request_next_vsync();
                        match tokio::time::timeout(APP_VSYNC_WAIT, rx.recv()).await {
                            Ok(Ok(when)) => when,
                            _ => clock.now(),
                        }
                    }
                    _ => clock.now(),
                };
                let next = frame_number + 1;
                let buffer = BufferHandle {
                    id: next,
                    width: spec.size.0,
                    height: spec.size.1,
                    format: if spec.opaque { PixelFormat::Rgbx8888 } else { PixelFormat::Rgba8888 },
                };
                match producer.on_frame_available(BufferItem::new(next, buffer, timestamp)) {
                    Ok(()) => {
                        frame_number = next;
                        report.frames_queued += 1;
                    }
                    Err(ContractError::FrameQueueClosed { .. }) => {
                        warn!(surface = %surface, "frame queue closed, producer exiting");
                        break;
                    }
                    Err(e) => {
                        report.frames_refused += 1;
                        debug!(surface = %surface, error = %e, "frame refused");
                    }
                }

                if frame_number > 0 && frame_number % MOVE_EVERY == 0 {
                    let (x, y) = random_position(&mut rng, &spec);
                    let move_tx = Transaction::new()
                        .layer(surface, LayerChange::Position { x, y })
                        .animation();
                    // animation submits block until the previous one commits
                    let store = Arc::clone(&store);
                    match tokio::task::spawn_blocking(move || store.submit(move_tx)).await {
                        Ok(SubmitOutcome::TimedOut) => {
                            warn!(surface = %surface, "move transaction timed out");
                        }
                        Ok(_) => report.moves += 1,
                        Err(e) => warn!(surface = %surface, error = %e, "move submit task failed"),
                    }
                }
            }
        }
    }

    report.queue = producer.metrics().snapshot();
    if let Err(e) = store.remove_surface(surface) {
        warn!(surface = %surface, error = %e, "failed to remove surface");
    }
    info!(
        surface = %surface,
        queued = report.frames_queued,
        refused = report.frames_refused,
        "producer stopped"
    );
    Ok(report)
}

fn random_position(rng: &mut StdRng, spec: &ProducerSpec) -> (f64, f64) {
    let max_x = spec.area.0.saturating_sub(spec.size.0).max(1);
    let max_y = spec.area.1.saturating_sub(spec.size.1).max(1);
    (
        rng.random_range(0..max_x) as f64,
        rng.random_range(0..max_y) as f64,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{FrameQueueConfig, ManualClock, TransactionConfig};
    use tokio::sync::Notify;

    fn spec() -> ProducerSpec {
        ProducerSpec {
            name: "app-0".to_string(),
            layer_stack: LayerStackId(0),
            z: 1,
            size: (640, 480),
            area: (1920, 1080),
            fps: 200.0,
            opaque: true,
            seed: 7,
        }
    }

    #[test]
    fn test_position_stays_on_display() {
        let spec = spec();
        let mut rng = StdRng::seed_from_u64(spec.seed);
        for _ in 0..100 {
            let (x, y) = random_position(&mut rng, &spec);
            assert!(x + 640.0 <= 1920.0 && y + 480.0 <= 1080.0, "({x}, {y}) off screen");
        }
    }

    #[tokio::test]
    async fn test_producer_queues_until_shutdown() {
        let store = Arc::new(TransactionStore::new(
            &TransactionConfig::default(),
            &FrameQueueConfig {
                capacity: 4,
                ..FrameQueueConfig::default()
            },
            Arc::new(Notify::new()),
        ));
        let (tx, rx) = watch::channel(false);
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        let task = tokio::spawn(run_producer(Arc::clone(&store), clock, None, spec(), rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        let report = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("producer did not stop")
            .unwrap()
            .unwrap();

        // nothing consumes the queue, so it fills up and then refuses
        assert_eq!(report.frames_queued, 4);
        assert!(report.frames_refused > 0);
        assert_eq!(store.layer_count(), 0, "surface removed on exit");
    }
}

//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约测试（默认配置、事务序列化、区域运算、fence 语义）
//! - 端到端场景：vsync 锁定、监听者唤醒、跨 surface 屏障、present fence 校验
//! - 真实时钟下的完整调度循环

#[cfg(test)]
mod contract_tests {
    use contracts::{
        CompositorConfig, FenceState, FenceTime, LayerChange, Rect, Region, SurfaceId,
        Transaction,
    };
    use serde_json::json;

    #[test]
    fn test_default_config_is_valid() {
        let config = CompositorConfig::default();
        config_loader::ConfigLoader::validate(&config).expect("default config rejected");
        let primary = config.primary_display().expect("no primary display");
        assert!((primary.period_ns() - 16_666_667).abs() <= 1);
    }

    #[test]
    fn test_layer_change_tagged_by_op() {
        let change = LayerChange::Position { x: 1.0, y: 2.0 };
        assert_eq!(
            serde_json::to_value(&change).unwrap(),
            json!({"op": "position", "x": 1.0, "y": 2.0})
        );

        let tx = Transaction::new()
            .layer(SurfaceId(3), LayerChange::Hidden { hidden: true })
            .layer(SurfaceId(3), LayerChange::DeferUntil { barrier: SurfaceId(4), frame_number: 5 })
            .synchronous();
        let text = serde_json::to_string(&tx).unwrap();
        let back: Transaction = serde_json::from_str(&text).unwrap();
        assert_eq!(back, tx);
        assert!(back.flags.synchronous && !back.flags.animation);
    }

    #[test]
    fn test_region_subtract_and_cover() {
        let screen = Region::from_rect(Rect::new(0.0, 0.0, 100.0, 100.0));
        let left = Region::from_rect(Rect::new(0.0, 0.0, 50.0, 100.0));
        let right = screen.subtract(&left);
        assert_eq!(right.area(), 5000.0);
        assert!(screen.covers(&right));
        assert!(right.intersect(&left).is_empty(), "halves overlap");
        assert_eq!(right.union(&left).area(), screen.area());
    }

    #[test]
    fn test_fence_signals_once() {
        let fence = FenceTime::pending();
        let observer = fence.clone();
        assert!(observer.is_pending());
        assert!(fence.signal(100));
        assert!(!fence.signal(200), "second signal accepted");
        assert_eq!(observer.state(), FenceState::Signaled(100));
        assert_eq!(FenceTime::invalid().signal_time(), None);
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{mpsc, Arc, Mutex};
    use std::time::Duration;

    use contracts::{
        BufferHandle, BufferItem, Clock, CompositionResult, Composer, CompositorConfig, ContractError,
        DirectAcquirer, DisplayFrame, FenceTime, LayerChange, LayerStackId, LayerState,
        ManualClock, MonotonicClock, Nsecs, PixelFormat, Scene, SubmitOutcome, Transaction,
        VsyncConfig, VsyncControl,
    };
    use scheduler::{RefreshScheduler, TickOutcome};
    use vsync::{VsyncCallback, VsyncDispatcher, VsyncModel};

    const PERIOD: Nsecs = 16_666_667;
    const T0: Nsecs = 1_000_000_000;

    struct NullControl;

    impl VsyncControl for NullControl {
        fn set_vsync_enabled(&self, _: LayerStackId, _: bool) {}
    }

    /// Presents immediately at the clock's current time.
    struct InstantComposer {
        clock: Arc<dyn Clock>,
        frames: Arc<AtomicU64>,
    }

    impl Composer for InstantComposer {
        fn name(&self) -> &str {
            "instant"
        }

        async fn begin_frame(&mut self, _: &DisplayFrame, _: bool) -> Result<(), ContractError> {
            Ok(())
        }

        async fn compose(&mut self, _: &DisplayFrame, _: &Scene) -> Result<CompositionResult, ContractError> {
            self.frames.fetch_add(1, Ordering::Relaxed);
            Ok(CompositionResult {
                present_fence: FenceTime::signaled(self.clock.now()),
                client_composition: false,
            })
        }
    }

    fn item(frame_number: u64, timestamp: Nsecs) -> BufferItem {
        let buffer = BufferHandle {
            id: frame_number,
            width: 64,
            height: 64,
            format: PixelFormat::Rgba8888,
        };
        BufferItem::new(frame_number, buffer, timestamp)
    }

    fn build_scheduler(clock: Arc<dyn Clock>) -> (RefreshScheduler<InstantComposer>, Arc<AtomicU64>) {
        let frames = Arc::new(AtomicU64::new(0));
        let composer = InstantComposer {
            clock: Arc::clone(&clock),
            frames: Arc::clone(&frames),
        };
        let scheduler = RefreshScheduler::new(
            &CompositorConfig::default(),
            clock,
            Arc::new(NullControl),
            composer,
            Box::new(DirectAcquirer),
        )
        .unwrap();
        (scheduler, frames)
    }

    #[test]
    fn test_clean_hardware_vsync_locks_model() {
        let clock = ManualClock::new(T0);
        let model = VsyncModel::new(&VsyncConfig::default(), Arc::new(clock.clone())).unwrap();
        let mut locked_at = None;
        for i in 0..8 {
            let wants_more = model.add_resync_sample(T0 + i * PERIOD);
            if locked_at.is_none() && !wants_more {
                locked_at = Some(i + 1);
            }
        }
        let locked_at = locked_at.expect("model never locked");
        assert!(locked_at <= 7, "locked at sample {locked_at}");

        let snapshot = model.snapshot();
        assert!(snapshot.locked);
        assert!((snapshot.period - PERIOD).abs() <= 1, "period {}", snapshot.period);
        assert!(snapshot.phase.abs() <= 1, "phase {}", snapshot.phase);
        model.stop();
    }

    #[test]
    fn test_listener_woken_on_model_edges() {
        let clock = Arc::new(MonotonicClock::new());
        let mut dispatcher = VsyncDispatcher::spawn(&VsyncConfig::default(), clock.clone()).unwrap();
        let reference = clock.now();
        dispatcher.update_model(PERIOD, 0, reference);

        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let callback: Arc<dyn VsyncCallback> = Arc::new(move |when: Nsecs| {
            let _ = tx.lock().unwrap().send(when);
        });
        let registered_at = clock.now();
        dispatcher.add_listener("app", 0, callback).unwrap();

        let events: Vec<Nsecs> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).expect("no vsync event within 2s"))
            .collect();
        dispatcher.stop();

        let latency_bound = VsyncConfig::default().max_wakeup_latency_ns;
        assert!(events[0] + latency_bound > registered_at, "event before registration");
        for pair in events.windows(2) {
            assert!(pair[1] > pair[0], "events not increasing: {events:?}");
        }
        for when in &events {
            let offset = (when - reference).rem_euclid(PERIOD);
            assert!(
                offset == 0 || offset >= PERIOD - latency_bound,
                "event {when} offset {offset} not on a model edge"
            );
        }
    }

    #[tokio::test]
    async fn test_deferred_change_commits_once_barrier_latched() {
        let clock = ManualClock::new(T0);
        let (mut scheduler, _) = build_scheduler(Arc::new(clock.clone()));
        scheduler.model().stop();
        scheduler.on_vsync(T0).await;

        let store = Arc::clone(scheduler.store());
        let (a, _producer_a) = store.create_surface(LayerState::new("a", (64, 64))).unwrap();
        let (b, producer_b) = store.create_surface(LayerState::new("b", (64, 64))).unwrap();
        for n in 1..=5 {
            producer_b.on_frame_available(item(n, 0)).unwrap();
        }
        clock.advance(PERIOD);
        assert_eq!(scheduler.on_vsync(T0 + PERIOD).await, TickOutcome::Refreshed);
        assert_eq!(scheduler.coordinator().current_frame_number(b), Some(5));

        let outcome = store.submit(
            Transaction::new()
                .layer(a, LayerChange::Position { x: 10.0, y: 20.0 })
                .layer(a, LayerChange::DeferUntil { barrier: b, frame_number: 5 }),
        );
        assert_eq!(outcome, SubmitOutcome::Queued);

        clock.advance(PERIOD);
        assert_eq!(scheduler.on_vsync(T0 + 2 * PERIOD).await, TickOutcome::Refreshed);
        assert_eq!(store.drawing().layer(a).unwrap().position, (10.0, 20.0));
        let barrier = scheduler.coordinator().surface(b).unwrap();
        assert!(barrier.local_sync_points().is_empty(), "barrier already met");
        scheduler.stop();
    }

    #[test]
    fn test_zero_jitter_present_fences_need_no_resync() {
        let clock = ManualClock::new(T0);
        let model = VsyncModel::new(&VsyncConfig::default(), Arc::new(clock.clone())).unwrap();
        for i in 0..8 {
            model.add_resync_sample(T0 + i * PERIOD);
        }
        let snapshot = model.snapshot();
        let base = snapshot.reference_time + snapshot.phase;
        for k in 1..=8 {
            let fence = FenceTime::signaled(base + (10 + k) * snapshot.period);
            assert!(!model.add_present_fence(fence), "resync requested at fence {k}");
        }
        let snapshot = model.snapshot();
        assert!(snapshot.error_ns2 <= 1, "error {}", snapshot.error_ns2);
        assert!(snapshot.locked);
        model.stop();
    }

    #[tokio::test]
    async fn test_scheduler_runs_on_real_clock() {
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let (mut scheduler, frames) = build_scheduler(Arc::clone(&clock));
        let (id, producer) = scheduler
            .store()
            .create_surface(LayerState::new("app", (64, 64)))
            .unwrap();
        producer.on_frame_available(item(1, clock.now())).unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            scheduler.run(tokio::time::sleep(Duration::from_millis(300))),
        )
        .await
        .expect("scheduler did not stop");
        scheduler.stop();
        result.unwrap();

        let stats = scheduler.stats();
        assert!(stats.ticks >= 1, "no ticks: {stats:?}");
        assert!(stats.commits >= 1);
        assert_eq!(scheduler.coordinator().current_frame_number(id), Some(1));
        assert!(frames.load(Ordering::Relaxed) >= 1, "nothing composed");
    }
}

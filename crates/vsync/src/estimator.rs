//! Refresh period / phase estimator.
//!
//! Two bounded rings feed the estimate:
//! - resync ring (hardware vsync timestamps): period and phase
//! - present ring (present fences): model error only
//!
//! Phase is a circular mean: each sample's residual modulo the period is
//! mapped onto the unit circle so that samples straddling an edge average
//! correctly instead of cancelling out.

use std::f64::consts::PI;
use std::fmt;

use contracts::{FenceState, FenceTime, Nsecs, VsyncConfig};
use nalgebra::Complex;
use ringbuf::{traits::*, HeapRb};
use serde::Serialize;
use tracing::{debug, warn};

/// Zero-error rounds tolerated before each warning.
const ACCEPTABLE_ZERO_ERR_SAMPLES: u64 = 3;

/// Model parameters published to the dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ModelParams {
    pub period: Nsecs,
    pub phase: Nsecs,
    pub reference_time: Nsecs,
}

/// Serializable view of the estimator state.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSnapshot {
    pub period: Nsecs,
    pub phase: Nsecs,
    pub reference_time: Nsecs,
    pub error_ns2: Nsecs,
    pub model_updated: bool,
    pub locked: bool,
    pub refresh_skip_count: u32,
    pub resync_samples: Vec<Nsecs>,
    pub present_samples: usize,
    /// Filled in by the model facade
    pub listener_count: usize,
    pub wakeup_latency_ns: Nsecs,
}

/// Period / phase estimator over bounded sample rings.
pub struct VsyncEstimator {
    resync: HeapRb<Nsecs>,
    present: HeapRb<FenceTime>,
    min_samples_for_update: usize,
    max_samples_without_present: usize,
    error_threshold: Nsecs,
    ignore_present_fences: bool,

    period: Nsecs,
    phase: Nsecs,
    reference_time: Nsecs,
    /// Mean squared present error (ns²)
    error: Nsecs,
    model_updated: bool,
    refresh_skip_count: u32,
    resync_since_present: usize,
    zero_error_rounds: u64,
}

impl fmt::Debug for VsyncEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VsyncEstimator")
            .field("period", &self.period)
            .field("phase", &self.phase)
            .field("reference_time", &self.reference_time)
            .field("error", &self.error)
            .field("resync_len", &self.resync.occupied_len())
            .finish()
    }
}

impl VsyncEstimator {
    pub fn new(config: &VsyncConfig) -> Self {
        Self {
            resync: HeapRb::new(config.max_resync_samples.max(1)),
            present: HeapRb::new(config.num_present_samples.max(1)),
            min_samples_for_update: config.min_resync_samples_for_update.max(4),
            max_samples_without_present: config.max_resync_samples_without_present,
            error_threshold: config.error_threshold_ns2,
            ignore_present_fences: config.ignore_present_fences,
            period: 0,
            phase: 0,
            reference_time: 0,
            error: 0,
            model_updated: false,
            refresh_skip_count: config.refresh_skip_count,
            resync_since_present: 0,
            zero_error_rounds: 0,
        }
    }

    pub fn params(&self) -> ModelParams {
        ModelParams {
            period: self.period,
            phase: self.phase,
            reference_time: self.reference_time,
        }
    }

    pub fn period(&self) -> Nsecs {
        self.period
    }

    pub fn error(&self) -> Nsecs {
        self.error
    }

    pub fn resync_len(&self) -> usize {
        self.resync.occupied_len()
    }

    pub fn is_model_updated(&self) -> bool {
        self.model_updated
    }

    /// Fresh estimate whose present error is within half the threshold.
    pub fn is_locked(&self) -> bool {
        self.model_updated && self.error < self.error_threshold / 2
    }

    /// Record a hardware vsync timestamp.
    ///
    /// Returns true if the published model parameters changed.
    pub fn add_resync_sample(&mut self, timestamp: Nsecs) -> bool {
        let mut changed = false;
        if self.resync.is_empty() {
            self.phase = 0;
            self.reference_time = timestamp;
            changed = true;
        }
        self.resync.push_overwrite(timestamp);

        changed |= self.update_model();

        self.resync_since_present += 1;
        if self.resync_since_present > self.max_samples_without_present + 1 {
            self.reset_error();
        }
        changed
    }

    /// Whether hardware samples are still wanted.
    ///
    /// `has_listeners` is only consulted when present fences are ignored, in
    /// which case hardware vsync stays on while anyone listens.
    pub fn needs_more_samples(&self, has_listeners: bool) -> bool {
        if self.ignore_present_fences {
            return has_listeners;
        }
        !self.is_locked()
    }

    /// Record a present fence. Returns true if a resync is needed.
    pub fn add_present_fence(&mut self, fence: FenceTime) -> bool {
        self.present.push_overwrite(fence);
        self.resync_since_present = 0;
        self.update_error();
        !self.model_updated || self.error > self.error_threshold
    }

    /// Start collecting a fresh batch of resync samples.
    pub fn begin_resync(&mut self) {
        self.model_updated = false;
        self.resync.clear();
    }

    /// Forget everything except the period.
    pub fn reset(&mut self) {
        self.phase = 0;
        self.reference_time = 0;
        self.model_updated = false;
        self.resync.clear();
        self.resync_since_present = 0;
        self.reset_error();
    }

    /// Override the period (e.g. from the display's nominal refresh rate).
    pub fn set_period(&mut self, period: Nsecs) {
        self.period = period;
        self.phase = 0;
        self.reference_time = 0;
        self.model_updated = false;
        self.resync.clear();
        self.resync_since_present = 0;
        self.reset_error();
    }

    /// Returns true if the published model changed.
    pub fn set_refresh_skip_count(&mut self, count: u32) -> bool {
        self.refresh_skip_count = count;
        self.update_model()
    }

    /// Next predicted refresh `period_offset` periods after the upcoming one.
    pub fn compute_next_refresh(&self, now: Nsecs, period_offset: i64) -> Nsecs {
        if self.period <= 0 {
            return now;
        }
        let phase = self.reference_time + self.phase;
        ((now - phase) / self.period + period_offset + 1) * self.period + phase
    }

    pub fn snapshot(&self) -> ModelSnapshot {
        ModelSnapshot {
            period: self.period,
            phase: self.phase,
            reference_time: self.reference_time,
            error_ns2: self.error,
            model_updated: self.model_updated,
            locked: self.is_locked(),
            refresh_skip_count: self.refresh_skip_count,
            resync_samples: self.resync.iter().copied().collect(),
            present_samples: self.present.occupied_len(),
            listener_count: 0,
            wakeup_latency_ns: 0,
        }
    }

    fn update_model(&mut self) -> bool {
        let n = self.resync.occupied_len();
        if n < self.min_samples_for_update {
            return false;
        }

        let samples: Vec<Nsecs> = self.resync.iter().copied().collect();
        let deltas = samples.windows(2).map(|w| w[1] - w[0]);
        let (sum, min, max) = deltas.fold((0, Nsecs::MAX, Nsecs::MIN), |(s, lo, hi), d| {
            (s + d, lo.min(d), hi.max(d))
        });
        let period = (sum - min - max) / (n as Nsecs - 3);
        if period <= 0 {
            warn!(period, samples = n, "non-increasing resync samples, estimate skipped");
            return false;
        }

        let scale = 2.0 * PI / period as f64;
        let mut acc = Complex::new(0.0, 0.0);
        for sample in &samples[1..] {
            let residual = (sample - self.reference_time) % period;
            acc += Complex::from_polar(1.0, residual as f64 * scale);
        }
        acc /= (n - 1) as f64;

        let mut phase = (acc.im.atan2(acc.re) / scale) as Nsecs;
        // keep phase in (-period/2, period/2], exact for odd periods
        if 2 * phase <= -period {
            phase += period;
        }

        self.period = period + period * self.refresh_skip_count as Nsecs;
        self.phase = phase;
        self.model_updated = true;
        debug!(
            period = self.period,
            phase = self.phase,
            samples = n,
            "vsync model updated"
        );
        true
    }

    fn update_error(&mut self) {
        if !self.model_updated || self.period <= 0 {
            return;
        }
        let period = self.period / (1 + self.refresh_skip_count as Nsecs);
        let mut sq_sum: Nsecs = 0;
        let mut count: Nsecs = 0;
        for fence in self.present.iter() {
            let FenceState::Signaled(time) = fence.state() else {
                continue;
            };
            let sample = time - self.reference_time;
            if sample <= self.phase {
                continue;
            }
            let mut err = (sample - self.phase) % period;
            if err > period / 2 {
                err -= period;
            }
            sq_sum = sq_sum.saturating_add(err.saturating_mul(err));
            count += 1;
        }

        if count > 0 {
            self.error = sq_sum / count;
            self.zero_error_rounds = 0;
        } else {
            self.error = 0;
            self.zero_error_rounds += 1;
            if self.zero_error_rounds % ACCEPTABLE_ZERO_ERR_SAMPLES == 0 {
                warn!(
                    rounds = self.zero_error_rounds,
                    "no usable present fences for model error"
                );
            }
        }
        metrics::gauge!("framesched_vsync_model_error_ns2").set(self.error as f64);
    }

    fn reset_error(&mut self) {
        self.present.clear();
        self.error = 0;
        self.zero_error_rounds = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: Nsecs = 16_666_667;
    const T0: Nsecs = 1_000_000_000;

    fn estimator() -> VsyncEstimator {
        VsyncEstimator::new(&VsyncConfig::default())
    }

    #[test]
    fn test_no_estimate_before_min_samples() {
        let mut est = estimator();
        for i in 0..5 {
            est.add_resync_sample(T0 + i * PERIOD);
        }
        assert!(!est.is_model_updated());
        assert_eq!(est.period(), 0);
        assert!(est.needs_more_samples(false));
    }

    #[test]
    fn test_period_excludes_one_min_and_one_max_delta() {
        let mut est = estimator();
        // deltas: 16, 17, 10 (min), 16, 25 (max), 17
        let deltas = [16, 17, 10, 16, 25, 17];
        let mut t = T0;
        est.add_resync_sample(t);
        for d in deltas {
            t += d * 1_000_000;
            est.add_resync_sample(t);
        }
        let n = deltas.len() as Nsecs + 1;
        let expected = ((16 + 17 + 16 + 17) * 1_000_000) / (n - 3);
        assert_eq!(est.period(), expected);
    }

    #[test]
    fn test_perfect_samples_lock_by_seventh() {
        let mut est = estimator();
        let mut locked_at = None;
        for i in 0..8 {
            est.add_resync_sample(T0 + i * PERIOD);
            if locked_at.is_none() && !est.needs_more_samples(false) {
                locked_at = Some(i + 1);
            }
        }
        let locked_at = locked_at.expect("model never locked");
        assert!(locked_at <= 7, "locked at sample {locked_at}");
        assert!((est.period() - PERIOD).abs() <= 1, "period {}", est.period());
        assert!(est.params().phase.abs() <= 1, "phase {}", est.params().phase);
    }

    #[test]
    fn test_phase_in_half_open_interval() {
        for offset in [0, PERIOD / 3, PERIOD / 2, PERIOD - 1, PERIOD / 2 + 7] {
            let mut est = estimator();
            // first sample fixes the reference, the rest are shifted by `offset`
            est.add_resync_sample(T0);
            for i in 1..10 {
                est.add_resync_sample(T0 + offset + i * PERIOD);
            }
            let ModelParams { period, phase, .. } = est.params();
            assert!(
                2 * phase > -period && 2 * phase <= period,
                "offset {offset}: phase {phase} outside (-{period}/2, {period}/2]"
            );
        }
    }

    #[test]
    fn test_phase_range_around_half_period() {
        for period in [PERIOD, PERIOD - 1] {
            let half = period / 2;
            for offset in half - 2..=half + 2 {
                let mut est = estimator();
                est.add_resync_sample(T0);
                for i in 1..10 {
                    est.add_resync_sample(T0 + offset + i * period);
                }
                let ModelParams { period: p, phase, .. } = est.params();
                assert_eq!(p, period, "offset {offset}: period");
                assert!(
                    2 * phase > -p && 2 * phase <= p,
                    "period {p}, offset {offset}: phase {phase} outside (-p/2, p/2]"
                );
            }
        }
    }

    #[test]
    fn test_refresh_skip_scales_published_period() {
        let mut est = estimator();
        for i in 0..8 {
            est.add_resync_sample(T0 + i * PERIOD);
        }
        let base = est.period();
        assert!(est.set_refresh_skip_count(1));
        assert_eq!(est.period(), base * 2);
    }

    #[test]
    fn test_zero_jitter_present_fences_have_zero_error() {
        let mut est = estimator();
        for i in 0..8 {
            est.add_resync_sample(T0 + i * PERIOD);
        }
        let ModelParams {
            period,
            phase,
            reference_time,
        } = est.params();
        let mut wants_resync = false;
        for k in 1..=8 {
            wants_resync |= est.add_present_fence(FenceTime::signaled(
                reference_time + phase + (10 + k) * period,
            ));
        }
        assert!(!wants_resync);
        assert!(est.error() <= 1, "error {}", est.error());
    }

    #[test]
    fn test_drifting_present_fences_request_resync() {
        let mut est = estimator();
        for i in 0..8 {
            est.add_resync_sample(T0 + i * PERIOD);
        }
        // 1 ms off every edge: 1e12 ns² > 1.6e11
        let resync = est.add_present_fence(FenceTime::signaled(T0 + 20 * PERIOD + 1_000_000));
        assert!(resync);
        assert!(est.needs_more_samples(false));
    }

    #[test]
    fn test_pending_and_invalid_fences_ignored() {
        let mut est = estimator();
        for i in 0..8 {
            est.add_resync_sample(T0 + i * PERIOD);
        }
        assert!(!est.add_present_fence(FenceTime::pending()));
        assert!(!est.add_present_fence(FenceTime::invalid()));
        assert_eq!(est.error(), 0);
    }

    #[test]
    fn test_present_fence_without_model_requests_resync() {
        let mut est = estimator();
        assert!(est.add_present_fence(FenceTime::signaled(T0)));
    }

    #[test]
    fn test_rings_never_exceed_bounds() {
        let mut est = estimator();
        for i in 0..100 {
            est.add_resync_sample(T0 + i * PERIOD);
            est.add_present_fence(FenceTime::signaled(T0 + i * PERIOD));
        }
        let snap = est.snapshot();
        assert_eq!(snap.resync_samples.len(), 32);
        assert!(snap.present_samples <= 8);
    }

    #[test]
    fn test_reset_and_set_period_unlock() {
        let mut est = estimator();
        for i in 0..8 {
            est.add_resync_sample(T0 + i * PERIOD);
        }
        assert!(est.is_locked());
        est.reset();
        assert!(!est.is_locked());
        assert_eq!(est.resync_len(), 0);

        est.set_period(8_333_333);
        assert_eq!(est.params().period, 8_333_333);
        assert_eq!(est.params().reference_time, 0);
        assert!(!est.is_locked());
    }

    #[test]
    fn test_compute_next_refresh_is_future_edge() {
        let mut est = estimator();
        for i in 0..8 {
            est.add_resync_sample(T0 + i * PERIOD);
        }
        let ModelParams {
            period,
            phase,
            reference_time,
        } = est.params();
        for now in [T0 + 3, T0 + 10 * PERIOD, T0 + 10 * PERIOD + 5_000_000, T0 - 5] {
            let next = est.compute_next_refresh(now, 0);
            assert!(next > now, "next {next} not after now {now}");
            assert_eq!((next - (reference_time + phase)).rem_euclid(period), 0);
            assert_eq!(est.compute_next_refresh(now, 2), next + 2 * period);
        }
    }
}

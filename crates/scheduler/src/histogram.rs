//! Time between presented frames, bucketed by vsync periods

use contracts::Nsecs;

pub const FRAME_BUCKETS: usize = 8;

/// Wall time spent per number of vsync periods between consecutive frames.
///
/// Bucket `n` accumulates the time of every gap lasting `n` periods; the
/// last bucket takes everything longer.
#[derive(Debug, Clone, Default)]
pub struct FrameHistogram {
    buckets: [Nsecs; FRAME_BUCKETS],
    total: Nsecs,
    frames: u64,
    last_present: Option<Nsecs>,
    skip_next: bool,
}

impl FrameHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// The display was powered off; the next gap is not a frame gap.
    pub fn mark_powered_off(&mut self) {
        self.skip_next = true;
    }

    pub fn record(&mut self, now: Nsecs, interval: Nsecs) {
        if let (Some(last), false) = (self.last_present, self.skip_next) {
            if interval > 0 {
                let elapsed = (now - last).max(0);
                let periods = (elapsed / interval) as usize;
                self.buckets[periods.min(FRAME_BUCKETS - 1)] += elapsed;
                self.total += elapsed;
                self.frames += 1;
                metrics::histogram!("framesched_frame_interval_periods").record(periods as f64);
            }
        }
        self.skip_next = false;
        self.last_present = Some(now);
    }

    pub fn buckets(&self) -> &[Nsecs; FRAME_BUCKETS] {
        &self.buckets
    }

    pub fn total_time(&self) -> Nsecs {
        self.total
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Share of time spent in each bucket.
    pub fn fractions(&self) -> [f64; FRAME_BUCKETS] {
        let mut out = [0.0; FRAME_BUCKETS];
        if self.total > 0 {
            for (slot, bucket) in out.iter_mut().zip(self.buckets) {
                *slot = bucket as f64 / self.total as f64;
            }
        }
        out
    }
}

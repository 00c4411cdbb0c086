//! Compositor timing published to clients

use std::collections::VecDeque;

use contracts::{FenceState, FenceTime, Nsecs};

/// When the compositor will next start work and how long frames take to
/// reach the display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompositorTiming {
    /// Latest time a client can submit and still make the next composition
    pub deadline: Nsecs,
    pub interval: Nsecs,
    /// Composite-to-present latency, snapped to whole vsync intervals
    pub present_latency: Nsecs,
}

/// Tracks (composite time, present fence) pairs and derives
/// [`CompositorTiming`].
#[derive(Debug)]
pub struct CompositorTimingTracker {
    pending: VecDeque<(Nsecs, FenceTime)>,
    capacity: usize,
    sf_phase_offset: Nsecs,
    timing: CompositorTiming,
    last_latency: Option<Nsecs>,
}

impl CompositorTimingTracker {
    pub fn new(capacity: usize, sf_phase_offset: Nsecs) -> Self {
        Self {
            pending: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            sf_phase_offset,
            timing: CompositorTiming::default(),
            last_latency: None,
        }
    }

    pub fn timing(&self) -> CompositorTiming {
        self.timing
    }

    /// Most recent measured composite-to-present latency.
    pub fn last_latency(&self) -> Option<Nsecs> {
        self.last_latency
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Record this frame and refresh the published timing.
    pub fn update(
        &mut self,
        vsync_phase: Nsecs,
        vsync_interval: Nsecs,
        composite_time: Nsecs,
        present: FenceTime,
    ) -> CompositorTiming {
        self.pending.push_back((composite_time, present));

        let mut latency = None;
        while let Some((composite, fence)) = self.pending.front() {
            match fence.state() {
                FenceState::Pending => break,
                FenceState::Signaled(at) => latency = Some(at - composite),
                FenceState::Invalid => {}
            }
            self.pending.pop_front();
        }
        while self.pending.len() > self.capacity {
            self.pending.pop_front();
        }

        if let Some(latency) = latency {
            self.last_latency = Some(latency);
            metrics::histogram!("framesched_composite_to_present_ns").record(latency as f64);
        }
        self.timing = snap(
            self.sf_phase_offset,
            vsync_phase,
            vsync_interval,
            latency.unwrap_or(-1),
        );
        self.timing
    }
}

/// Snap `latency` to the ideal composite-to-present latency plus whole
/// intervals.
pub fn snap(sf_phase_offset: Nsecs, vsync_phase: Nsecs, interval: Nsecs, latency: Nsecs) -> CompositorTiming {
    if interval <= 0 {
        return CompositorTiming::default();
    }
    // `%` truncates toward zero; both signs handled separately
    let mut ideal = if sf_phase_offset > 0 {
        interval - sf_phase_offset % interval
    } else {
        (-sf_phase_offset) % interval
    };
    if ideal <= 0 {
        ideal = interval;
    }
    let extra = (latency - ideal + interval / 2) / interval;
    let present_latency = if extra > 0 {
        ideal + extra * interval
    } else {
        ideal
    };
    CompositorTiming {
        deadline: vsync_phase - ideal,
        interval,
        present_latency,
    }
}

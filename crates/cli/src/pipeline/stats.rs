//! Pipeline statistics and metrics.

use std::time::Duration;

use observability::FrameMetricsAggregator;
use scheduler::{CompositorTiming, SchedulerStats, FRAME_BUCKETS};
use vsync::ModelSnapshot;

use super::producer::ProducerReport;

/// Statistics from a pipeline run
#[derive(Debug, Clone)]
pub struct PipelineStats {
    /// Scheduler counters (ticks, refreshes, commits, latches ...)
    pub scheduler: SchedulerStats,

    /// Total duration of the run
    pub duration: Duration,

    /// Hardware vsync timestamps reported to the model
    pub hw_vsync_events: u64,

    /// Hardware vsync on/off transitions
    pub hw_vsync_toggles: u64,

    /// Final vsync model state
    pub model: ModelSnapshot,

    /// Last published compositor timing
    pub timing: CompositorTiming,

    /// Share of time per number of vsync periods between frames
    pub frame_fractions: [f64; FRAME_BUCKETS],

    pub composed_frames: u64,

    /// Frames with a non-empty dirty region
    pub recomposed_frames: u64,

    pub producers: Vec<ProducerReport>,

    pub metrics: FrameMetricsAggregator,
}

impl PipelineStats {
    /// Refreshes per second
    pub fn fps(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.scheduler.refreshes as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Share of refreshes that had to be skipped, as percentage
    pub fn miss_rate(&self) -> f64 {
        let total = self.scheduler.refreshes + self.scheduler.missed_frames;
        if total > 0 {
            self.scheduler.missed_frames as f64 / total as f64 * 100.0
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                 Frame Scheduler Statistics                   ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Ticks: {}", self.scheduler.ticks);
        println!("   ├─ Refreshes: {} ({:.2}/s)", self.scheduler.refreshes, self.fps());
        println!("   ├─ Commits: {}", self.scheduler.commits);
        println!("   ├─ Latched frames: {}", self.scheduler.latched_frames);
        println!(
            "   ├─ Missed frames: {} ({:.2}%)",
            self.scheduler.missed_frames,
            self.miss_rate()
        );
        println!(
            "   ├─ Composed: {} ({} recomposed, {} errors)",
            self.composed_frames, self.recomposed_frames, self.scheduler.compose_errors
        );
        println!("   └─ Region passes: {}", self.scheduler.region_passes);

        println!("\n⏱  Vsync Model");
        println!(
            "   ├─ Period: {} ns, phase: {} ns",
            self.model.period, self.model.phase
        );
        println!(
            "   ├─ Locked: {}, error: {} ns²",
            self.model.locked, self.model.error_ns2
        );
        println!(
            "   ├─ Hardware vsync: {} events, {} toggles",
            self.hw_vsync_events, self.hw_vsync_toggles
        );
        println!("   ├─ Wake-up latency: {} ns", self.model.wakeup_latency_ns);
        println!(
            "   └─ Present latency: {} ns (deadline {} ns)",
            self.timing.present_latency, self.timing.deadline
        );

        println!("\n🎞  Frame Intervals (periods)");
        for (index, fraction) in self.frame_fractions.iter().enumerate() {
            if *fraction > 0.0 {
                let label = if index == FRAME_BUCKETS - 1 {
                    format!("{index}+")
                } else {
                    index.to_string()
                };
                println!("   ├─ {label:>3}: {:.2}%", fraction * 100.0);
            }
        }

        if !self.producers.is_empty() {
            println!("\n🧵 Producers");
            for report in &self.producers {
                println!(
                    "   ├─ {}: queued {}, latched {}, dropped {}, refused {}, moves {}",
                    report.name,
                    report.frames_queued,
                    report.queue.latched_count,
                    report.queue.dropped_count,
                    report.frames_refused,
                    report.moves
                );
            }
        }

        println!("\n{}", self.metrics.summary());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(refreshes: u64, missed: u64, secs: u64) -> PipelineStats {
        PipelineStats {
            scheduler: SchedulerStats {
                refreshes,
                missed_frames: missed,
                ..Default::default()
            },
            duration: Duration::from_secs(secs),
            hw_vsync_events: 0,
            hw_vsync_toggles: 0,
            model: ModelSnapshot {
                period: 16_666_667,
                phase: 0,
                reference_time: 0,
                error_ns2: 0,
                model_updated: true,
                locked: true,
                refresh_skip_count: 0,
                resync_samples: Vec::new(),
                present_samples: 0,
                listener_count: 1,
                wakeup_latency_ns: 0,
            },
            timing: CompositorTiming::default(),
            frame_fractions: [0.0; FRAME_BUCKETS],
            composed_frames: 0,
            recomposed_frames: 0,
            producers: Vec::new(),
            metrics: FrameMetricsAggregator::new(),
        }
    }

    #[test]
    fn test_fps_and_miss_rate() {
        let clean = stats(600, 0, 10);
        assert!((clean.fps() - 60.0).abs() < 1e-9);
        assert_eq!(clean.miss_rate(), 0.0);

        let missing = stats(30, 10, 1);
        assert!((missing.miss_rate() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_duration() {
        assert_eq!(stats(10, 0, 0).fps(), 0.0);
    }
}

//! Frame scheduler 指标收集模块
//!
//! 基于 vsync 模型快照与帧队列快照记录运行指标, 并在内存中聚合摘要。

use std::collections::HashMap;

use contracts::{Nsecs, NSECS_PER_MS};
use frame_sync::FrameQueueSnapshot;
use metrics::{gauge, histogram};
use vsync::ModelSnapshot;

fn ns_to_ms(ns: Nsecs) -> f64 {
    ns as f64 / NSECS_PER_MS as f64
}

/// 从模型快照记录 vsync 指标
///
/// 每次刷新后调用。
pub fn record_model_snapshot(snapshot: &ModelSnapshot) {
    gauge!("framesched_vsync_period_ns").set(snapshot.period as f64);
    gauge!("framesched_vsync_phase_ns").set(snapshot.phase as f64);
    gauge!("framesched_vsync_locked").set(if snapshot.locked { 1.0 } else { 0.0 });
    gauge!("framesched_vsync_listeners").set(snapshot.listener_count as f64);
    gauge!("framesched_vsync_resync_buffered").set(snapshot.resync_samples.len() as f64);
    gauge!("framesched_vsync_present_buffered").set(snapshot.present_samples as f64);
}

/// 记录单个 surface 的帧队列状态
pub fn record_frame_queue(surface: &str, snapshot: &FrameQueueSnapshot) {
    gauge!("framesched_queue_depth", "surface" => surface.to_string())
        .set(snapshot.queue_len as f64);
    gauge!("framesched_queue_refused", "surface" => surface.to_string())
        .set(snapshot.refused_count as f64);
    gauge!("framesched_queue_quarantined", "surface" => surface.to_string())
        .set(if snapshot.quarantined { 1.0 } else { 0.0 });
}

/// 记录合成到显示的延迟
pub fn record_present_latency_ns(latency: Nsecs) {
    histogram!("framesched_present_latency_ms").record(ns_to_ms(latency));
}

/// 帧调度指标聚合器
///
/// 在内存中聚合指标，便于统计和输出摘要。
#[derive(Debug, Clone, Default)]
pub struct FrameMetricsAggregator {
    /// 观测到的模型快照数
    pub samples: u64,

    /// 模型处于锁定状态的快照数
    pub locked_samples: u64,

    /// 估计周期统计 (毫秒)
    pub period_stats: RunningStats,

    /// 模型误差统计 (ns²)
    pub error_stats: RunningStats,

    /// 合成到显示延迟统计 (毫秒)
    pub present_latency_stats: RunningStats,

    /// 帧间隔统计 (毫秒)
    pub frame_interval_stats: RunningStats,

    /// 各 surface 最后一次的队列快照
    pub queues: HashMap<String, FrameQueueSnapshot>,

    last_present: Option<Nsecs>,
}

impl FrameMetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 更新模型统计
    pub fn observe_model(&mut self, snapshot: &ModelSnapshot) {
        self.samples += 1;
        if snapshot.locked {
            self.locked_samples += 1;
        }
        if snapshot.period > 0 {
            self.period_stats.push(ns_to_ms(snapshot.period));
        }
        self.error_stats.push(snapshot.error_ns2 as f64);
    }

    /// 更新队列快照 (覆盖旧值)
    pub fn observe_queue(&mut self, surface: &str, snapshot: FrameQueueSnapshot) {
        self.queues.insert(surface.to_string(), snapshot);
    }

    /// 记录一帧的呈现时间
    pub fn observe_present(&mut self, present_time: Nsecs) {
        if let Some(last) = self.last_present.replace(present_time) {
            self.frame_interval_stats.push(ns_to_ms(present_time - last));
        }
    }

    pub fn observe_present_latency(&mut self, latency: Nsecs) {
        self.present_latency_stats.push(ns_to_ms(latency));
    }

    /// 生成摘要报告
    pub fn summary(&self) -> MetricsSummary {
        let (latched, dropped, refused) = self.queues.values().fold((0, 0, 0), |acc, q| {
            (
                acc.0 + q.latched_count,
                acc.1 + q.dropped_count,
                acc.2 + q.refused_count,
            )
        });
        MetricsSummary {
            samples: self.samples,
            lock_rate: if self.samples > 0 {
                self.locked_samples as f64 / self.samples as f64 * 100.0
            } else {
                0.0
            },
            period_ms: StatsSummary::from(&self.period_stats),
            model_error_ns2: StatsSummary::from(&self.error_stats),
            present_latency_ms: StatsSummary::from(&self.present_latency_stats),
            frame_interval_ms: StatsSummary::from(&self.frame_interval_stats),
            frames_latched: latched,
            frames_dropped: dropped,
            frames_refused: refused,
        }
    }

    /// 重置统计
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 指标摘要
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub samples: u64,
    pub lock_rate: f64,
    pub period_ms: StatsSummary,
    pub model_error_ns2: StatsSummary,
    pub present_latency_ms: StatsSummary,
    pub frame_interval_ms: StatsSummary,
    pub frames_latched: u64,
    pub frames_dropped: u64,
    pub frames_refused: u64,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Frame Scheduler Summary ===")?;
        writeln!(
            f,
            "Model samples: {} (locked {:.2}%)",
            self.samples, self.lock_rate
        )?;
        writeln!(f, "Vsync period (ms): {}", self.period_ms)?;
        writeln!(f, "Model error (ns²): {}", self.model_error_ns2)?;
        writeln!(f, "Present latency (ms): {}", self.present_latency_ms)?;
        writeln!(f, "Frame interval (ms): {}", self.frame_interval_ms)?;
        writeln!(
            f,
            "Frames latched/dropped/refused: {}/{}/{}",
            self.frames_latched, self.frames_dropped, self.frames_refused
        )?;
        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            self.m2 += delta * (value - self.mean);
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(period: Nsecs, locked: bool) -> ModelSnapshot {
        ModelSnapshot {
            period,
            phase: 0,
            reference_time: 0,
            error_ns2: 0,
            model_updated: true,
            locked,
            refresh_skip_count: 0,
            resync_samples: Vec::new(),
            present_samples: 0,
            listener_count: 1,
            wakeup_latency_ns: 0,
        }
    }

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            stats.push(v);
        }

        assert_eq!(stats.count(), 5);
        assert!((stats.mean() - 3.0).abs() < 1e-10);
        assert!((stats.min() - 1.0).abs() < 1e-10);
        assert!((stats.max() - 5.0).abs() < 1e-10);
        assert!((stats.variance() - 2.5).abs() < 1e-10);
    }

    #[test]
    fn test_aggregator_model_and_present() {
        let mut aggregator = FrameMetricsAggregator::new();
        aggregator.observe_model(&snapshot(16_000_000, true));
        aggregator.observe_model(&snapshot(0, false));
        aggregator.observe_present(0);
        aggregator.observe_present(16_000_000);
        aggregator.observe_present(48_000_000);

        let summary = aggregator.summary();
        assert_eq!(summary.samples, 2);
        assert!((summary.lock_rate - 50.0).abs() < 1e-9);
        assert_eq!(summary.period_ms.count, 1, "unknown period not recorded");
        assert_eq!(summary.frame_interval_ms.count, 2);
        assert!((summary.frame_interval_ms.max - 32.0).abs() < 1e-9);
    }

    #[test]
    fn test_queue_snapshots_replace() {
        let mut aggregator = FrameMetricsAggregator::new();
        let mut queue = FrameQueueSnapshot {
            latched_count: 3,
            dropped_count: 1,
            ..Default::default()
        };
        aggregator.observe_queue("video", queue);
        queue.latched_count = 5;
        aggregator.observe_queue("video", queue);
        aggregator.observe_queue(
            "ui",
            FrameQueueSnapshot {
                refused_count: 2,
                ..Default::default()
            },
        );

        let summary = aggregator.summary();
        assert_eq!(summary.frames_latched, 5);
        assert_eq!(summary.frames_dropped, 1);
        assert_eq!(summary.frames_refused, 2);
    }

    #[test]
    fn test_summary_display() {
        let summary = MetricsSummary {
            samples: 100,
            lock_rate: 95.0,
            frames_latched: 42,
            ..Default::default()
        };
        let output = format!("{summary}");
        assert!(output.contains("Model samples: 100"));
        assert!(output.contains("95.00%"));
        assert!(output.contains("42/0/0"));
        assert!(output.contains("N/A"));
    }
}

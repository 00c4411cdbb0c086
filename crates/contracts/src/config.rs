//! Compositor configuration contracts shared across crates.
//!
//! Constructed once (by `config_loader` or `Default`) and passed by
//! reference into every component.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{period_from_hz, LayerStackId, Nsecs};

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CompositorConfig {
    /// Vsync model and dispatcher tuning
    #[validate(nested)]
    pub vsync: VsyncConfig,

    /// Transaction store limits
    #[validate(nested)]
    pub transaction: TransactionConfig,

    /// Per-surface frame queue
    #[validate(nested)]
    pub frame_queue: FrameQueueConfig,

    /// Refresh scheduler policy
    #[validate(nested)]
    pub scheduler: SchedulerConfig,

    /// Attached displays (the first one drives vsync)
    #[validate(nested)]
    pub displays: Vec<DisplayConfig>,

    /// Logging and metrics
    pub observability: ObservabilityOptions,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            vsync: VsyncConfig::default(),
            transaction: TransactionConfig::default(),
            frame_queue: FrameQueueConfig::default(),
            scheduler: SchedulerConfig::default(),
            displays: vec![DisplayConfig::default()],
            observability: ObservabilityOptions::default(),
        }
    }
}

impl CompositorConfig {
    /// Display that feeds hardware vsync into the model.
    pub fn primary_display(&self) -> Option<&DisplayConfig> {
        self.displays.first()
    }
}

/// Vsync model / dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct VsyncConfig {
    /// Resync ring capacity
    #[validate(range(min = 4, max = 1024))]
    pub max_resync_samples: usize,
    /// Samples required before the period is estimated
    #[validate(range(min = 4))]
    pub min_resync_samples_for_update: usize,
    /// Present ring capacity
    #[validate(range(min = 1, max = 256))]
    pub num_present_samples: usize,
    /// Resync samples tolerated without a present fence before the error
    /// estimate is discarded
    pub max_resync_samples_without_present: usize,
    /// Mean squared present error (ns²) above which a resync is requested
    #[validate(range(min = 1))]
    pub error_threshold_ns2: i64,
    /// Minimum spacing between two events of one listener, as a fraction of
    /// the period
    #[validate(range(min = 0.0, max = 1.0))]
    pub min_event_spacing_ratio: f64,
    /// Cap on the learned wake-up latency
    #[validate(range(min = 0))]
    pub max_wakeup_latency_ns: Nsecs,
    /// Number of hardware refreshes skipped per software vsync
    #[validate(range(max = 16))]
    pub refresh_skip_count: u32,
    /// Do not use present fences to validate the model
    pub ignore_present_fences: bool,
    /// Phase offset of the client (app) vsync listener
    pub app_phase_offset_ns: Nsecs,
    /// Phase offset of the compositor's own vsync listener
    pub sf_phase_offset_ns: Nsecs,
    /// Resync requests closer together than this are ignored
    pub resync_rate_limit_ms: u64,
}

impl Default for VsyncConfig {
    fn default() -> Self {
        Self {
            max_resync_samples: 32,
            min_resync_samples_for_update: 6,
            num_present_samples: 8,
            max_resync_samples_without_present: 4,
            error_threshold_ns2: 160_000_000_000,
            min_event_spacing_ratio: 0.6,
            max_wakeup_latency_ns: 1_500_000,
            refresh_skip_count: 0,
            ignore_present_fences: false,
            app_phase_offset_ns: 1_000_000,
            sf_phase_offset_ns: 1_000_000,
            resync_rate_limit_ms: 500,
        }
    }
}

/// Transaction store configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TransactionConfig {
    /// Upper bound on a synchronous submitter's wait
    #[validate(range(min = 1))]
    pub sync_timeout_ms: u64,
    /// Maximum number of live surfaces
    #[validate(range(min = 1))]
    pub max_layers: usize,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            sync_timeout_ms: 5_000,
            max_layers: 4_096,
        }
    }
}

/// Frame queue configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct FrameQueueConfig {
    /// Bound of each surface's producer queue
    #[validate(range(min = 1))]
    pub capacity: usize,
    /// Latch buffers before their acquire fence signals
    pub latch_unsignaled: bool,
    /// Buffers timestamped further than this in the future are presented
    /// immediately (the timestamp is not plausible)
    #[validate(range(min = 1))]
    pub present_plausibility_ms: u64,
}

impl Default for FrameQueueConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            latch_unsignaled: false,
            present_plausibility_ms: 1_000,
        }
    }
}

/// Refresh scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Skip a tick while the previous GPU-composed frame has not presented
    pub propagate_backpressure: bool,
    /// Composite/present pairs kept for compositor timing
    #[validate(range(min = 1, max = 256))]
    pub compositor_timing_samples: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            propagate_backpressure: true,
            compositor_timing_samples: 16,
        }
    }
}

/// Display configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DisplayConfig {
    pub layer_stack: LayerStackId,
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(range(min = 1))]
    pub width: u32,
    #[validate(range(min = 1))]
    pub height: u32,
    #[validate(range(min = 1.0, max = 1000.0))]
    pub refresh_rate_hz: f64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            layer_stack: LayerStackId(0),
            name: "primary".to_string(),
            width: 1920,
            height: 1080,
            refresh_rate_hz: 60.0,
        }
    }
}

impl DisplayConfig {
    pub fn period_ns(&self) -> Nsecs {
        period_from_hz(self.refresh_rate_hz)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormatOption {
    Json,
    #[default]
    Pretty,
    Compact,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityOptions {
    pub log_format: LogFormatOption,
    pub log_level: String,
    /// Prometheus listener port (None = disabled)
    pub metrics_port: Option<u16>,
}

impl Default for ObservabilityOptions {
    fn default() -> Self {
        Self {
            log_format: LogFormatOption::Pretty,
            log_level: "info".to_string(),
            metrics_port: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CompositorConfig::default();
        assert!(config.validate().is_ok(), "{:?}", config.validate());
        assert_eq!(config.vsync.error_threshold_ns2, 400 * 400 * 1_000_000);
        assert_eq!(config.primary_display().map(|d| d.period_ns()), Some(16_666_667));
    }

    #[test]
    fn test_range_violation_reported() {
        let mut config = CompositorConfig::default();
        config.vsync.min_event_spacing_ratio = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_event_spacing_ratio"), "got: {err}");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: CompositorConfig =
            serde_json::from_str(r#"{ "vsync": { "refresh_skip_count": 1 } }"#).unwrap();
        assert_eq!(config.vsync.refresh_skip_count, 1);
        assert_eq!(config.vsync.max_resync_samples, 32);
        assert_eq!(config.displays.len(), 1);
    }
}

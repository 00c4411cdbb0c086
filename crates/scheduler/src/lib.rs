//! # Scheduler
//!
//! 刷新调度：每个 vsync 一次 tick，把事务、帧和合成串起来。
//!
//! 负责：
//! - `RefreshScheduler`：invalidate（提交事务、latch 帧）→ refresh（区域计算、逐显示器合成）
//! - 背压：上一帧未上屏时跳过本次 tick
//! - 硬件 vsync 开关策略与限速 resync（`HwVsyncController`）
//! - vsync 分发线程 → 调度任务的一次性事件桥（`VsyncEventSource`）
//! - 按 app 相位偏移向客户端广播 vsync（`AppVsyncSource`），请求时限速 resync
//! - 合成时序（deadline / present latency 对齐）与帧间隔直方图
//!
//! ## 使用示例
//!
//! ```ignore
//! use scheduler::RefreshScheduler;
//!
//! let mut scheduler = RefreshScheduler::new(&config, clock, control, composer, acquirer)?;
//! let store = scheduler.store().clone();
//! let (surface, producer) = store.create_surface(LayerState::new("app", (1920, 1080)))?;
//!
//! scheduler.run(async { tokio::signal::ctrl_c().await.ok(); }).await?;
//! ```

mod app_vsync;
mod error;
mod event_source;
mod histogram;
mod hw_vsync;
mod scheduler;
mod timing;

pub use app_vsync::AppVsyncSource;
pub use error::SchedulerError;
pub use event_source::VsyncEventSource;
pub use histogram::{FrameHistogram, FRAME_BUCKETS};
pub use hw_vsync::HwVsyncController;
pub use scheduler::{RefreshScheduler, SchedulerStats, TickOutcome};
pub use timing::{snap, CompositorTiming, CompositorTimingTracker};

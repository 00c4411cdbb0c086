//! # Frame Sync
//!
//! 每个 surface 的帧队列与跨 surface 帧屏障。
//!
//! 负责：
//! - 生产者侧有界帧队列（帧号严格递增，满则拒绝）
//! - 每个刷新周期每个 surface 至多锁存一帧
//! - `defer_until` 同步点：帧可用 + 事务已应用后才释放
//! - 内容获取失败后的隔离（quarantine）

mod coordinator;
mod metrics;
mod queue;
mod surface;
mod sync_point;

pub use coordinator::{Deferral, SyncCoordinator};
pub use metrics::{FrameQueueMetrics, FrameQueueSnapshot};
pub use queue::{frame_channel, FrameConsumer, FrameProducer, ProducerEvent};
pub use surface::{LatchOutcome, SurfaceFrames};
pub use sync_point::SyncPoint;

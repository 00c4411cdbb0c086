//! # Vsync
//!
//! 软件 vsync 模型与分发线程。
//!
//! 负责：
//! - 从硬件 vsync 时间戳估计刷新周期与相位（环形缓冲 + 圆周均值）
//! - 用 present fence 校验模型误差，漂移时请求重新同步
//! - 在独立线程上按相位偏移唤醒各监听者（含唤醒延迟补偿）
//!
//! ## 使用示例
//!
//! ```ignore
//! use std::sync::Arc;
//! use contracts::{MonotonicClock, VsyncConfig};
//! use vsync::VsyncModel;
//!
//! let model = VsyncModel::new(&VsyncConfig::default(), Arc::new(MonotonicClock::new()))?;
//! model.add_event_listener("app", 1_000_000, Arc::new(|when| println!("vsync at {when}")))?;
//!
//! // hardware vsync thread
//! let wants_more = model.add_resync_sample(timestamp);
//! ```

mod dispatcher;
mod estimator;
mod listener;
mod model;

pub use dispatcher::VsyncDispatcher;
pub use estimator::{ModelParams, ModelSnapshot, VsyncEstimator};
pub use listener::{next_event_time, DispatchModel, Listener, VsyncCallback};
pub use model::VsyncModel;

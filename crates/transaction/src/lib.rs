//! # Transaction
//!
//! 客户端场景修改的暂存与提交。
//!
//! 负责：
//! - 通用双缓冲 `CommitBuffer`（暂存 → 原子发布不可变快照）
//! - `TransactionStore`：current / drawing 场景、每个 surface 的待提交状态队列
//! - 同步 / 动画事务的有界等待
//! - 通过 `SyncCoordinator` 解析 `defer_until` 屏障

mod commit_buffer;
mod state;
mod store;

pub use commit_buffer::CommitBuffer;
pub use state::CurrentState;
pub use store::{CommitOutcome, TransactionStore};

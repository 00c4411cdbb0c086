//! # Regions
//!
//! 可见区域计算：决定每个显示器这一帧画什么、重画哪里。
//!
//! 负责：
//! - 按 layer stack 的 Z 序遍历（负 Z 的子节点 / relative 在锚点之前）
//! - 每个 surface 的 visible / covered / visible-non-transparent 区域
//! - 每个显示器的 opaque / dirty / undefined 区域与可见 surface 列表
//! - 跨帧保存区域状态以计算增量 dirty
//!
//! 只有在 visible regions dirty 时才重新计算；对同一快照重复计算结果相同。

mod compositor;
mod traversal;

pub use compositor::{RegionCompositor, RegionPass, SurfaceRegions};
pub use traversal::z_order;

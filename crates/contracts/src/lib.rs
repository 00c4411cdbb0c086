//! # Contracts
//!
//! Frozen interface contracts shared by every compositor crate: ids,
//! geometry, layer/display state, transactions, fences, clocks,
//! configuration and the traits implemented by external collaborators.
//! Business crates depend on this crate only, never on each other in reverse.
//!
//! ## Time Model
//! - All timestamps are `Nsecs` (signed nanoseconds) on one monotonic clock
//! - Frame numbers are per-surface and start at 1

mod collaborator;
mod config;
mod display;
mod error;
mod fence;
mod geometry;
mod ids;
mod layer;
mod name;
mod scene;
mod time;
mod transaction;

pub use collaborator::*;
pub use config::*;
pub use display::*;
pub use error::*;
pub use fence::*;
pub use geometry::*;
pub use ids::*;
pub use layer::*;
pub use name::Name;
pub use scene::*;
pub use time::*;
pub use transaction::*;

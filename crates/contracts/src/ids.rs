//! Stable identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable surface identity.
///
/// Allocated monotonically by the transaction store and never reused, so a
/// stale id held in a parent/relative link simply fails to resolve instead
/// of aliasing a newer surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceId(pub u64);

impl SurfaceId {
    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Layer stack id: groups the surfaces shown on one display.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LayerStackId(pub u32);

impl fmt::Display for LayerStackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stack{}", self.0)
    }
}

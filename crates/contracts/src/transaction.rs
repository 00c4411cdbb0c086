//! Transaction - ordered batch of scene mutations submitted by clients.

use serde::{Deserialize, Serialize};

use crate::{LayerStackId, Rect, Region, ScalingMode, SurfaceId};

/// One mutation of a surface's current state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LayerChange {
    Position { x: f64, y: f64 },
    /// Z among siblings; clears any relative-Z link
    Layer { z: i32 },
    /// Z relative to another surface's position in the traversal
    RelativeLayer { relative_to: SurfaceId, z: i32 },
    Size { width: u32, height: u32 },
    Alpha { alpha: f32 },
    Matrix { matrix: [f64; 4] },
    TransparentRegion { region: Region },
    Hidden { hidden: bool },
    Opaque { opaque: bool },
    Secure { secure: bool },
    Crop { crop: Option<Rect> },
    FinalCrop { crop: Option<Rect> },
    /// Ignored for surfaces that have a parent
    LayerStack { layer_stack: LayerStackId },
    /// Hold the surface's pending state until `barrier` shows `frame_number`
    DeferUntil { barrier: SurfaceId, frame_number: u64 },
    /// Move every child of this surface under `new_parent`
    ReparentChildren { new_parent: SurfaceId },
    /// Detach every descendant from its client: they stay on screen but
    /// later changes to them are ignored
    DetachChildren,
    OverrideScalingMode { mode: Option<ScalingMode> },
}

/// One mutation of a display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DisplayChange {
    Viewport { viewport: Rect },
    Size { width: u32, height: u32 },
    PowerMode { powered_off: bool },
}

/// Submission semantics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFlags {
    /// Block the submitter until the next commit (bounded)
    pub synchronous: bool,
    /// Part of an animation: waits for the previous animation commit first
    pub animation: bool,
}

/// Ordered batch of mutations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub layer_changes: Vec<(SurfaceId, LayerChange)>,
    pub display_changes: Vec<(LayerStackId, DisplayChange)>,
    pub flags: TransactionFlags,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layer(mut self, surface: SurfaceId, change: LayerChange) -> Self {
        self.layer_changes.push((surface, change));
        self
    }

    pub fn display(mut self, layer_stack: LayerStackId, change: DisplayChange) -> Self {
        self.display_changes.push((layer_stack, change));
        self
    }

    pub fn synchronous(mut self) -> Self {
        self.flags.synchronous = true;
        self
    }

    pub fn animation(mut self) -> Self {
        self.flags.animation = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.layer_changes.is_empty() && self.display_changes.is_empty()
    }
}

/// What kind of work a set of mutations requires at the next commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionNeeded {
    /// Some surface's current state changed
    pub transaction: bool,
    /// Geometry or Z order changed: visible regions must be recomputed
    pub traversal: bool,
    /// Some display's state changed
    pub display: bool,
}

impl TransactionNeeded {
    pub const NONE: Self = Self {
        transaction: false,
        traversal: false,
        display: false,
    };

    pub fn any(&self) -> bool {
        self.transaction || self.traversal || self.display
    }

    pub fn merge(&mut self, other: TransactionNeeded) {
        self.transaction |= other.transaction;
        self.traversal |= other.traversal;
        self.display |= other.display;
    }
}

/// Outcome of a submission from the submitter's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Asynchronous submission accepted
    Queued,
    /// Synchronous submission observed a commit
    Committed,
    /// Synchronous wait gave up; the transaction may or may not be applied
    TimedOut,
}

//! Current (client-side) state and mutation rules

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use contracts::{
    DisplayChange, DisplayState, LayerChange, LayerStackId, LayerState, SurfaceId,
    TransactionNeeded,
};
use frame_sync::{FrameConsumer, SyncPoint};
use tracing::warn;

/// Barrier attached to a pending state.
#[derive(Debug, Clone)]
pub(crate) enum Gate {
    Open,
    /// Recorded at submit time; resolved against the coordinator at commit
    Unresolved { barrier: SurfaceId, frame_number: u64 },
    /// Waiting for `point`'s frame on `barrier`
    Waiting {
        barrier: SurfaceId,
        point: Arc<SyncPoint>,
    },
}

/// Snapshot of a surface's current state queued for the drawing state.
#[derive(Debug, Clone)]
pub(crate) struct PendingState {
    pub state: LayerState,
    pub gate: Gate,
}

/// Per-surface current state.
#[derive(Debug)]
pub(crate) struct LayerRecord {
    pub state: LayerState,
    pub pending: VecDeque<PendingState>,
    /// Changed since the last push onto `pending`
    pub modified: bool,
    /// Detached from its client; further changes are ignored
    pub detached: bool,
}

impl LayerRecord {
    pub fn new(state: LayerState) -> Self {
        Self {
            state,
            pending: VecDeque::new(),
            modified: true,
            detached: false,
        }
    }

    fn touch(&mut self) {
        self.state.sequence += 1;
        self.modified = true;
    }

    /// Remote sync points held by this surface's pending states.
    pub fn release_remote_points(&mut self) {
        for entry in self.pending.drain(..) {
            if let Gate::Waiting { point, .. } = entry.gate {
                point.set_transaction_applied();
            }
        }
    }
}

/// Everything clients mutate between commits.
#[derive(Debug, Default)]
pub struct CurrentState {
    pub(crate) layers: BTreeMap<SurfaceId, LayerRecord>,
    pub(crate) displays: BTreeMap<LayerStackId, DisplayState>,
    pub(crate) needed: TransactionNeeded,
    /// Created since the last commit; consumers wait for registration
    pub(crate) added: Vec<(SurfaceId, FrameConsumer)>,
    pub(crate) removed: Vec<SurfaceId>,
}

const TRANSACTION: TransactionNeeded = TransactionNeeded {
    transaction: true,
    traversal: false,
    display: false,
};

const TRAVERSAL: TransactionNeeded = TransactionNeeded {
    transaction: true,
    traversal: true,
    display: false,
};

impl CurrentState {
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn contains(&self, id: SurfaceId) -> bool {
        self.layers.contains_key(&id)
    }

    /// Work required at the next commit.
    pub fn needs_commit(&self) -> bool {
        self.needed.any() || !self.added.is_empty() || !self.removed.is_empty()
    }

    pub(crate) fn children_of(&self, id: SurfaceId) -> Vec<SurfaceId> {
        self.layers
            .iter()
            .filter(|(_, r)| r.state.parent == Some(id))
            .map(|(child, _)| *child)
            .collect()
    }

    /// `id` and all descendants.
    pub(crate) fn subtree(&self, id: SurfaceId) -> Vec<SurfaceId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !self.contains(current) || out.contains(&current) {
                continue;
            }
            out.push(current);
            stack.extend(self.children_of(current));
        }
        out
    }

    /// Apply one layer mutation to the current state.
    pub(crate) fn apply_layer_change(
        &mut self,
        id: SurfaceId,
        change: LayerChange,
    ) -> TransactionNeeded {
        // links are validated before the record is borrowed
        match &change {
            LayerChange::RelativeLayer { relative_to, .. } if !self.contains(*relative_to) => {
                warn!(surface = %id, relative_to = %relative_to, "relative layer target not found");
                return TransactionNeeded::NONE;
            }
            LayerChange::ReparentChildren { new_parent } => {
                return self.reparent_children(id, *new_parent);
            }
            LayerChange::DetachChildren => {
                self.detach_children(id);
                return TransactionNeeded::NONE;
            }
            _ => {}
        }

        let Some(record) = self.layers.get_mut(&id) else {
            return TransactionNeeded::NONE;
        };
        let has_parent = record.state.parent.is_some();
        let s = &mut record.state;

        match change {
            LayerChange::Position { x, y } => {
                if s.position == (x, y) {
                    return TransactionNeeded::NONE;
                }
                s.position = (x, y);
            }
            LayerChange::Layer { z } => {
                if s.z == z && s.relative_of.is_none() {
                    return TransactionNeeded::NONE;
                }
                s.z = z;
                s.relative_of = None;
            }
            LayerChange::RelativeLayer { relative_to, z } => {
                if s.z == z && s.relative_of == Some(relative_to) {
                    return TransactionNeeded::NONE;
                }
                s.z = z;
                s.relative_of = Some(relative_to);
            }
            LayerChange::Size { width, height } => {
                if s.size == (width, height) {
                    return TransactionNeeded::NONE;
                }
                // size alone does not bump the sequence
                s.size = (width, height);
                record.modified = true;
                return TRAVERSAL;
            }
            LayerChange::Alpha { alpha } => {
                if s.alpha == alpha {
                    return TransactionNeeded::NONE;
                }
                s.alpha = alpha;
            }
            LayerChange::Matrix { matrix } => {
                if s.matrix == matrix {
                    return TransactionNeeded::NONE;
                }
                s.matrix = matrix;
            }
            LayerChange::TransparentRegion { region } => {
                if s.transparent_region == region {
                    return TransactionNeeded::NONE;
                }
                s.transparent_region = region;
            }
            LayerChange::Hidden { hidden } => {
                if s.flags.hidden == hidden {
                    return TransactionNeeded::NONE;
                }
                s.flags.hidden = hidden;
            }
            LayerChange::Opaque { opaque } => {
                if s.flags.opaque == opaque {
                    return TransactionNeeded::NONE;
                }
                s.flags.opaque = opaque;
            }
            LayerChange::Secure { secure } => {
                if s.flags.secure == secure {
                    return TransactionNeeded::NONE;
                }
                s.flags.secure = secure;
            }
            LayerChange::Crop { crop } => {
                if s.crop == crop {
                    return TransactionNeeded::NONE;
                }
                s.crop = crop;
            }
            LayerChange::FinalCrop { crop } => {
                if s.final_crop == crop {
                    return TransactionNeeded::NONE;
                }
                s.final_crop = crop;
            }
            LayerChange::LayerStack { layer_stack } => {
                if has_parent {
                    warn!(surface = %id, "layer stack can only be set on top-level surfaces");
                    return TransactionNeeded::NONE;
                }
                if s.layer_stack == layer_stack {
                    return TransactionNeeded::NONE;
                }
                s.layer_stack = layer_stack;
                record.touch();
                return TransactionNeeded {
                    display: true,
                    ..TRAVERSAL
                };
            }
            LayerChange::DeferUntil {
                barrier,
                frame_number,
            } => {
                // Everything staged so far waits for the barrier frame; a
                // deferral alone triggers no work.
                record.pending.push_back(PendingState {
                    state: s.clone(),
                    gate: Gate::Unresolved {
                        barrier,
                        frame_number,
                    },
                });
                record.modified = false;
                return TRANSACTION;
            }
            LayerChange::OverrideScalingMode { mode } => {
                if s.override_scaling_mode == mode {
                    return TransactionNeeded::NONE;
                }
                s.override_scaling_mode = mode;
                record.modified = true;
                return TRANSACTION;
            }
            LayerChange::ReparentChildren { .. } | LayerChange::DetachChildren => {
                return TransactionNeeded::NONE;
            }
        }

        record.touch();
        TRAVERSAL
    }

    fn reparent_children(&mut self, id: SurfaceId, new_parent: SurfaceId) -> TransactionNeeded {
        if !self.contains(new_parent) {
            warn!(surface = %id, new_parent = %new_parent, "reparent target not found");
            return TransactionNeeded::NONE;
        }
        let children = self.children_of(id);
        if children.is_empty() {
            return TransactionNeeded::NONE;
        }
        for child in children {
            // a surface never becomes its own ancestor
            if self.subtree(child).contains(&new_parent) {
                warn!(surface = %child, new_parent = %new_parent, "reparent would create a cycle");
                continue;
            }
            if let Some(record) = self.layers.get_mut(&child) {
                record.state.parent = Some(new_parent);
                record.touch();
            }
        }
        TRAVERSAL
    }

    fn detach_children(&mut self, id: SurfaceId) {
        for child in self.subtree(id).into_iter().skip(1) {
            if let Some(record) = self.layers.get_mut(&child) {
                record.detached = true;
            }
        }
    }

    pub(crate) fn apply_display_change(
        &mut self,
        layer_stack: LayerStackId,
        change: DisplayChange,
    ) -> TransactionNeeded {
        let Some(display) = self.displays.get_mut(&layer_stack) else {
            warn!(layer_stack = %layer_stack, "display change for unknown display");
            return TransactionNeeded::NONE;
        };
        let changed = match change {
            DisplayChange::Viewport { viewport } => {
                let changed = display.viewport != viewport;
                display.viewport = viewport;
                changed
            }
            DisplayChange::Size { width, height } => {
                let changed = (display.width, display.height) != (width, height);
                display.width = width;
                display.height = height;
                changed
            }
            DisplayChange::PowerMode { powered_off } => {
                let changed = display.powered_off != powered_off;
                display.powered_off = powered_off;
                changed
            }
        };
        if changed {
            TransactionNeeded {
                transaction: false,
                traversal: false,
                display: true,
            }
        } else {
            TransactionNeeded::NONE
        }
    }
}

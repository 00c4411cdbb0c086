//! Scene - arena of surfaces keyed by id plus the displays showing them.
//!
//! Parent and relative-Z links are plain ids. Every lookup goes through the
//! arena, so a link to a removed surface resolves to `None` instead of
//! dangling.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Affine, DisplayState, LayerStackId, LayerState, SurfaceId};

/// Guards ancestor walks against accidental cycles.
const MAX_DEPTH: usize = 128;

/// One committed (or current) view of all surfaces and displays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub layers: BTreeMap<SurfaceId, LayerState>,
    pub displays: BTreeMap<LayerStackId, DisplayState>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layer(&self, id: SurfaceId) -> Option<&LayerState> {
        self.layers.get(&id)
    }

    pub fn contains(&self, id: SurfaceId) -> bool {
        self.layers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Live parent of `id`, if any.
    pub fn parent_of(&self, id: SurfaceId) -> Option<SurfaceId> {
        self.layer(id)?.parent.filter(|p| self.contains(*p))
    }

    /// Live relative-Z anchor of `id`, if any.
    pub fn relative_anchor_of(&self, id: SurfaceId) -> Option<SurfaceId> {
        self.layer(id)?.relative_of.filter(|r| self.contains(*r))
    }

    /// Direct children of `id`, in id order.
    pub fn children_of(&self, id: SurfaceId) -> Vec<SurfaceId> {
        self.layers
            .iter()
            .filter(|(_, l)| l.parent == Some(id))
            .map(|(child, _)| *child)
            .collect()
    }

    /// Surfaces whose relative-Z anchor is `id`.
    pub fn relatives_of(&self, id: SurfaceId) -> Vec<SurfaceId> {
        self.layers
            .iter()
            .filter(|(_, l)| l.relative_of == Some(id))
            .map(|(rel, _)| *rel)
            .collect()
    }

    /// Chain `id, parent, grandparent, ...` up to the root.
    pub fn ancestry(&self, id: SurfaceId) -> Vec<SurfaceId> {
        let mut chain = Vec::new();
        let mut cursor = Some(id).filter(|id| self.contains(*id));
        while let Some(current) = cursor {
            if chain.len() >= MAX_DEPTH || chain.contains(&current) {
                break;
            }
            chain.push(current);
            cursor = self.parent_of(current);
        }
        chain
    }

    /// Layer stack of the root ancestor.
    pub fn layer_stack_of(&self, id: SurfaceId) -> Option<LayerStackId> {
        let root = *self.ancestry(id).last()?;
        Some(self.layer(root)?.layer_stack)
    }

    /// Hidden by itself or by any ancestor.
    pub fn is_hidden_by_policy(&self, id: SurfaceId) -> bool {
        self.ancestry(id)
            .iter()
            .any(|a| self.layer(*a).is_some_and(|l| l.flags.hidden))
    }

    /// Own alpha multiplied by every ancestor's.
    pub fn effective_alpha(&self, id: SurfaceId) -> f32 {
        self.ancestry(id)
            .iter()
            .filter_map(|a| self.layer(*a))
            .map(|l| l.alpha)
            .product()
    }

    /// Layer space → layer-stack space.
    pub fn effective_transform(&self, id: SurfaceId) -> Affine {
        self.ancestry(id)
            .iter()
            .filter_map(|a| self.layer(*a))
            .fold(Affine::IDENTITY, |acc, l| l.local_transform() * acc)
    }

    /// `id` plus every descendant.
    pub fn subtree(&self, id: SurfaceId) -> Vec<SurfaceId> {
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
}

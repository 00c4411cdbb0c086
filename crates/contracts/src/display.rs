//! Display state and per-display composition output.

use serde::{Deserialize, Serialize};

use crate::{LayerStackId, Name, Rect, Region, SurfaceId};

/// Client-controlled display state (committed together with layers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayState {
    pub layer_stack: LayerStackId,
    pub name: Name,
    pub width: u32,
    pub height: u32,
    /// Region of the layer stack shown on this display
    pub viewport: Rect,
    /// Blank the display (no composition)
    pub powered_off: bool,
}

impl DisplayState {
    pub fn new(layer_stack: LayerStackId, name: impl Into<Name>, width: u32, height: u32) -> Self {
        Self {
            layer_stack,
            name: name.into(),
            width,
            height,
            viewport: Rect::new(0.0, 0.0, width as f64, height as f64),
            powered_off: false,
        }
    }

    /// Screen bounds in display space.
    pub fn bounds(&self) -> Rect {
        Rect::new(0.0, 0.0, self.width as f64, self.height as f64)
    }
}

/// Result of a region pass for one display, handed to composition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplayFrame {
    pub layer_stack: LayerStackId,
    pub name: Name,
    /// Visible surfaces, back to front
    pub visible_layers: Vec<SurfaceId>,
    /// Union of opaque regions of visible surfaces
    pub opaque: Region,
    /// Area that must be repainted this cycle
    pub dirty: Region,
    /// Area not covered by any opaque surface
    pub undefined: Region,
}

//! Per-surface client state and producer-submitted frame items.

use serde::{Deserialize, Serialize};

use crate::{Affine, FenceTime, LayerStackId, Name, Nsecs, Rect, Region, SurfaceId};

/// Pixel layout of a buffer; decides whether content can be opaque.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    #[default]
    Rgba8888,
    Rgbx8888,
    Rgb888,
    Rgb565,
    Bgra8888,
    RgbaFp16,
    Rgba1010102,
}

impl PixelFormat {
    /// True if the format carries an alpha channel.
    pub fn has_alpha(self) -> bool {
        matches!(
            self,
            PixelFormat::Rgba8888
                | PixelFormat::Bgra8888
                | PixelFormat::RgbaFp16
                | PixelFormat::Rgba1010102
        )
    }
}

/// How a buffer whose size differs from the layer size is fitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMode {
    /// Layer takes the buffer's size
    #[default]
    Freeze,
    /// Buffer is scaled to the layer's requested size
    ScaleToWindow,
    /// Buffer is cropped to the layer's requested size
    ScaleCrop,
}

/// Producer content handle. Opaque to the core apart from its geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferHandle {
    pub id: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl BufferHandle {
    pub fn bounds(&self) -> Rect {
        Rect::new(0.0, 0.0, self.width as f64, self.height as f64)
    }
}

/// One producer-submitted frame waiting in a surface's frame queue.
#[derive(Debug, Clone)]
pub struct BufferItem {
    /// Per-surface frame number (1 starts a new epoch)
    pub frame_number: u64,
    pub buffer: BufferHandle,
    /// Signals once the producer finished rendering into `buffer`
    pub acquire_fence: FenceTime,
    /// Desired present time
    pub timestamp: Nsecs,
    /// Source crop; `None` uses the whole buffer
    pub crop: Option<Rect>,
    pub scaling_mode: ScalingMode,
    /// May be latched without waiting for the acquire fence
    pub is_droppable: bool,
    /// Single-buffer mode: present on every refresh
    pub auto_refresh: bool,
}

impl BufferItem {
    pub fn new(frame_number: u64, buffer: BufferHandle, timestamp: Nsecs) -> Self {
        Self {
            frame_number,
            buffer,
            acquire_fence: FenceTime::signaled(timestamp.max(0)),
            timestamp,
            crop: None,
            scaling_mode: ScalingMode::default(),
            is_droppable: false,
            auto_refresh: false,
        }
    }

    pub fn with_acquire_fence(mut self, fence: FenceTime) -> Self {
        self.acquire_fence = fence;
        self
    }
}

/// Client-controlled visibility flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerFlags {
    pub hidden: bool,
    /// Content is declared opaque regardless of pixel format
    pub opaque: bool,
    pub secure: bool,
}

/// The client-facing state of one surface.
///
/// Lives three times: *current* (mutated by transactions), queued copies in
/// the pending FIFO, and *drawing* (read by composition).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerState {
    pub name: Name,
    /// Only meaningful on top-level surfaces; children inherit their root's
    pub layer_stack: LayerStackId,
    pub z: i32,
    pub position: (f64, f64),
    /// Requested size (width, height)
    pub size: (u32, u32),
    pub alpha: f32,
    /// 2x2 matrix (dsdx, dtdx, dsdy, dtdy)
    pub matrix: [f64; 4],
    pub crop: Option<Rect>,
    pub final_crop: Option<Rect>,
    /// Area the client promises is fully transparent (layer space)
    pub transparent_region: Region,
    pub flags: LayerFlags,
    pub parent: Option<SurfaceId>,
    /// Relative-Z anchor; when set, `z` orders this surface among the
    /// anchor's children instead of its own siblings
    pub relative_of: Option<SurfaceId>,
    pub override_scaling_mode: Option<ScalingMode>,
    /// Bumped on every change that moves pixels on screen
    pub sequence: u64,
}

impl LayerState {
    pub fn new(name: impl Into<Name>, size: (u32, u32)) -> Self {
        Self {
            name: name.into(),
            layer_stack: LayerStackId::default(),
            z: 0,
            position: (0.0, 0.0),
            size,
            alpha: 1.0,
            matrix: [1.0, 0.0, 0.0, 1.0],
            crop: None,
            final_crop: None,
            transparent_region: Region::new(),
            flags: LayerFlags::default(),
            parent: None,
            relative_of: None,
            override_scaling_mode: None,
            sequence: 0,
        }
    }

    /// Transform from layer space to parent space.
    pub fn local_transform(&self) -> Affine {
        let [a, b, c, d] = self.matrix;
        Affine::new([a, b, c, d, self.position.0, self.position.1])
    }

    /// Layer-space bounds of the requested size.
    pub fn bounds(&self) -> Rect {
        let bounds = Rect::new(0.0, 0.0, self.size.0 as f64, self.size.1 as f64);
        match self.crop {
            Some(crop) => bounds.intersect(crop),
            None => bounds,
        }
    }
}

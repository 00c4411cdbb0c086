//! Interfaces of the external collaborators around the scheduling core.
//!
//! - `VsyncControl`: hardware vsync on/off per display
//! - `Composer`: per-display composition, returns a present fence
//! - `ContentAcquirer`: turns a queued buffer into sampleable content
//! - `LatchedContent`: what a surface currently shows (for region math)

use crate::{
    BufferHandle, BufferItem, ContractError, DisplayFrame, FenceTime, LayerStackId, Nsecs, Rect,
    ScalingMode, Scene, SurfaceId,
};

/// Hardware vsync event control.
pub trait VsyncControl: Send + Sync {
    fn set_vsync_enabled(&self, display: LayerStackId, enabled: bool);
}

/// Result of composing one display.
#[derive(Debug, Clone)]
pub struct CompositionResult {
    /// Signals when the frame reaches the glass
    pub present_fence: FenceTime,
    /// At least one surface went through GPU (client) composition
    pub client_composition: bool,
}

/// Composition collaborator.
///
/// Called once per display per refresh from the main context.
#[trait_variant::make(Composer: Send)]
pub trait LocalComposer {
    /// Composer name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Start a frame; `must_recompose` is false when nothing on this display
    /// changed and the previous frame may be re-presented.
    async fn begin_frame(
        &mut self,
        frame: &DisplayFrame,
        must_recompose: bool,
    ) -> Result<(), ContractError>;

    /// Compose and present the frame.
    async fn compose(
        &mut self,
        frame: &DisplayFrame,
        scene: &Scene,
    ) -> Result<CompositionResult, ContractError>;
}

/// Outcome of turning a queued buffer into the surface's active content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireResult {
    Acquired,
    /// Not due yet; keep it queued and retry on a later refresh
    PresentLater,
    /// Refused (e.g. wrong size for a frozen surface); drop only this item
    Rejected,
    /// Content could not be acquired; the surface is quarantined
    Failed(String),
}

/// Content-acquisition collaborator (texture upload / image binding).
pub trait ContentAcquirer: Send {
    fn acquire(&mut self, surface: SurfaceId, item: &BufferItem, expected_present: Nsecs)
        -> AcquireResult;
}

/// Acquirer that accepts every buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectAcquirer;

impl ContentAcquirer for DirectAcquirer {
    fn acquire(&mut self, _: SurfaceId, _: &BufferItem, _: Nsecs) -> AcquireResult {
        AcquireResult::Acquired
    }
}

/// Content currently latched on a surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContentInfo {
    pub buffer: BufferHandle,
    pub crop: Option<Rect>,
    pub scaling_mode: ScalingMode,
    pub frame_number: u64,
}

/// Read access to latched content, keyed by surface.
pub trait LatchedContent {
    fn content(&self, surface: SurfaceId) -> Option<ContentInfo>;

    /// Surfaces whose sideband stream replaced buffer content.
    fn has_sideband(&self, _surface: SurfaceId) -> bool {
        false
    }
}

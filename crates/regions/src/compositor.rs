//! RegionCompositor - visible, covered, opaque and dirty regions per display

use std::collections::{BTreeMap, BTreeSet};

use contracts::{
    preserves_rects, transform_bounds, Affine, DisplayFrame, DisplayState, LatchedContent,
    LayerStackId, Rect, Region, Scene, SurfaceId,
};
use tracing::{debug, instrument, trace};

use crate::traversal::z_order;

/// Regions of one surface, kept until the next pass. Layer-stack space.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SurfaceRegions {
    pub layer_stack: LayerStackId,
    pub visible: Region,
    pub covered: Region,
    pub visible_non_transparent: Region,
}

/// Output of one pass over a drawing scene.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionPass {
    pub frames: BTreeMap<LayerStackId, DisplayFrame>,
    pub surfaces: BTreeMap<SurfaceId, SurfaceRegions>,
}

/// Geometry of a surface that takes part in a pass.
struct Footprint {
    bounds: Region,
    opaque: Region,
    transparent: Region,
}

#[derive(Debug)]
pub struct RegionCompositor {
    surfaces: BTreeMap<SurfaceId, SurfaceRegions>,
    frames: BTreeMap<LayerStackId, DisplayFrame>,
    visible_regions_dirty: bool,
    content_dirty: BTreeSet<SurfaceId>,
    passes: u64,
}

impl Default for RegionCompositor {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionCompositor {
    pub fn new() -> Self {
        Self {
            surfaces: BTreeMap::new(),
            frames: BTreeMap::new(),
            visible_regions_dirty: true,
            content_dirty: BTreeSet::new(),
            passes: 0,
        }
    }

    /// Geometry changed somewhere; the next `rebuild` recomputes.
    pub fn invalidate(&mut self) {
        self.visible_regions_dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.visible_regions_dirty
    }

    /// Number of passes actually computed.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// These surfaces must be repainted in full at the next pass.
    pub fn mark_content_dirty(&mut self, ids: impl IntoIterator<Item = SurfaceId>) {
        self.content_dirty.extend(ids);
    }

    /// New content on `id` without a geometry change: repaint where it is
    /// visible.
    pub fn invalidate_surface(&mut self, scene: &Scene, id: SurfaceId) {
        let Some(regions) = self.surfaces.get(&id) else {
            return;
        };
        let visible = regions.visible.clone();
        let layer_stack = regions.layer_stack;
        for display in scene.displays.values().filter(|d| d.layer_stack == layer_stack) {
            let dirty = to_display(display, &visible);
            if let Some(frame) = self.frames.get_mut(&display.layer_stack) {
                frame.dirty.union_with(&dirty);
            }
        }
    }

    /// Force a full repaint of every display.
    pub fn repaint_everything(&mut self, scene: &Scene) {
        for display in scene.displays.values() {
            if let Some(frame) = self.frames.get_mut(&display.layer_stack) {
                frame.dirty = Region::from_rect(display.bounds());
            }
        }
    }

    pub fn frames(&self) -> &BTreeMap<LayerStackId, DisplayFrame> {
        &self.frames
    }

    pub fn frame(&self, layer_stack: LayerStackId) -> Option<&DisplayFrame> {
        self.frames.get(&layer_stack)
    }

    pub fn surface(&self, id: SurfaceId) -> Option<&SurfaceRegions> {
        self.surfaces.get(&id)
    }

    /// The display has been composed; its dirty area is clean again.
    pub fn finish_frame(&mut self, layer_stack: LayerStackId) {
        if let Some(frame) = self.frames.get_mut(&layer_stack) {
            frame.dirty.clear();
        }
    }

    /// Recompute if visible regions are dirty. Returns true if a pass ran.
    ///
    /// Dirty areas accumulate until `finish_frame`.
    #[instrument(name = "regions_rebuild", skip_all, fields(layers = scene.len()))]
    pub fn rebuild(&mut self, scene: &Scene, content: &dyn LatchedContent) -> bool {
        if !self.visible_regions_dirty {
            return false;
        }
        let pass = self.compute(scene, content);

        let mut frames = pass.frames;
        for (layer_stack, frame) in frames.iter_mut() {
            if let Some(previous) = self.frames.get(layer_stack) {
                frame.dirty.union_with(&previous.dirty);
            }
            metrics::gauge!("framesched_visible_layers", "display" => frame.name.to_string())
                .set(frame.visible_layers.len() as f64);
        }
        self.frames = frames;
        self.surfaces = pass.surfaces;
        self.content_dirty.clear();
        self.visible_regions_dirty = false;
        self.passes += 1;
        metrics::counter!("framesched_region_passes_total").increment(1);
        debug!(displays = self.frames.len(), pass = self.passes, "visible regions rebuilt");
        true
    }

    /// One pass over `scene` against the persisted regions. Does not
    /// modify the compositor.
    pub fn compute(&self, scene: &Scene, content: &dyn LatchedContent) -> RegionPass {
        let mut pass = RegionPass::default();
        let mut stack_dirty: BTreeMap<LayerStackId, Region> = BTreeMap::new();

        for display in scene.displays.values() {
            let (frame, dirty) = self.compute_display(scene, content, display, &mut pass.surfaces);
            stack_dirty.insert(display.layer_stack, dirty);
            pass.frames.insert(display.layer_stack, frame);
        }

        // Surfaces that left a stack (removed, hidden, moved) expose what
        // they used to cover.
        for (id, old) in &self.surfaces {
            let still_there = pass
                .surfaces
                .get(id)
                .is_some_and(|new| new.layer_stack == old.layer_stack);
            if !still_there {
                if let Some(dirty) = stack_dirty.get_mut(&old.layer_stack) {
                    dirty.union_with(&old.visible);
                }
                trace!(surface = %id, "surface left its layer stack");
            }
        }

        for display in scene.displays.values() {
            if let (Some(frame), Some(dirty)) = (
                pass.frames.get_mut(&display.layer_stack),
                stack_dirty.get(&display.layer_stack),
            ) {
                frame.dirty = to_display(display, dirty);
            }
        }
        pass
    }

    fn compute_display(
        &self,
        scene: &Scene,
        content: &dyn LatchedContent,
        display: &DisplayState,
        surfaces: &mut BTreeMap<SurfaceId, SurfaceRegions>,
    ) -> (DisplayFrame, Region) {
        let order = z_order(scene, display.layer_stack);
        let mut above_opaque = Region::new();
        let mut above_covered = Region::new();
        let mut dirty = Region::new();

        // front to back
        for id in order.iter().rev() {
            let Some(footprint) = footprint(scene, content, *id) else {
                continue;
            };
            let mut visible = footprint.bounds;
            let covered = above_covered.intersect(&visible);
            above_covered.union_with(&visible);
            visible.subtract_with(&above_opaque);

            let old = self
                .surfaces
                .get(id)
                .filter(|old| old.layer_stack == display.layer_stack)
                .cloned()
                .unwrap_or_default();
            let mut surface_dirty = if self.content_dirty.contains(id) {
                visible.union(&old.visible)
            } else {
                let new_exposed = visible.subtract(&covered);
                let old_exposed = old.visible.subtract(&old.covered);
                visible
                    .intersect(&old.covered)
                    .union(&new_exposed.subtract(&old_exposed))
            };
            surface_dirty.subtract_with(&above_opaque);
            dirty.union_with(&surface_dirty);
            above_opaque.union_with(&footprint.opaque);

            let visible_non_transparent = visible.subtract(&footprint.transparent);
            surfaces.insert(
                *id,
                SurfaceRegions {
                    layer_stack: display.layer_stack,
                    visible,
                    covered,
                    visible_non_transparent,
                },
            );
        }

        let bounds = display.bounds();
        let visible_layers = order
            .into_iter()
            .filter(|id| {
                surfaces.get(id).is_some_and(|regions| {
                    !to_display(display, &regions.visible_non_transparent).is_empty()
                })
            })
            .collect();
        let opaque = to_display(display, &above_opaque);
        let undefined = Region::from_rect(bounds).subtract(&opaque);
        let frame = DisplayFrame {
            layer_stack: display.layer_stack,
            name: display.name.clone(),
            visible_layers,
            opaque,
            dirty: Region::new(),
            undefined,
        };
        (frame, dirty)
    }
}

/// Screen footprint of a visible surface, `None` if it draws nothing.
fn footprint(scene: &Scene, content: &dyn LatchedContent, id: SurfaceId) -> Option<Footprint> {
    let layer = scene.layer(id)?;
    let info = content.content(id);
    if scene.is_hidden_by_policy(id) {
        return None;
    }
    let alpha = scene.effective_alpha(id);
    if alpha <= 0.0 || (info.is_none() && !content.has_sideband(id)) {
        return None;
    }

    let bounds = Region::from_rect(screen_bounds(scene, id));
    if bounds.is_empty() {
        return None;
    }
    let transform = scene.effective_transform(id);
    let simple = preserves_rects(&transform);
    let translucent = !(layer.flags.opaque || info.is_some_and(|i| !i.buffer.format.has_alpha()));

    let transparent = if translucent && simple {
        layer.transparent_region.transform(&transform)
    } else {
        Region::new()
    };
    let opaque = if alpha >= 1.0 && !translucent && simple {
        bounds.clone()
    } else {
        Region::new()
    };
    Some(Footprint {
        bounds,
        opaque,
        transparent,
    })
}

/// Layer-stack space bounds, clipped by final crop and every ancestor.
fn screen_bounds(scene: &Scene, id: SurfaceId) -> Rect {
    let mut clip: Option<Rect> = None;
    for ancestor in scene.ancestry(id).into_iter().rev() {
        let Some(layer) = scene.layer(ancestor) else {
            continue;
        };
        let mut window = transform_bounds(&scene.effective_transform(ancestor), layer.bounds());
        if let Some(final_crop) = layer.final_crop {
            window = window.intersect(final_crop);
        }
        if let Some(parent) = clip {
            window = parent.intersect(window);
        }
        clip = Some(window);
    }
    clip.unwrap_or(Rect::ZERO)
}

/// Layer-stack space → display space, clipped to the display.
fn display_transform(display: &DisplayState) -> Affine {
    let viewport = display.viewport;
    if viewport.width() <= 0.0 || viewport.height() <= 0.0 {
        return Affine::IDENTITY;
    }
    let sx = display.width as f64 / viewport.width();
    let sy = display.height as f64 / viewport.height();
    Affine::scale_non_uniform(sx, sy) * Affine::translate((-viewport.x0, -viewport.y0))
}

fn to_display(display: &DisplayState, region: &Region) -> Region {
    region
        .transform(&display_transform(display))
        .intersect_rect(display.bounds())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{BufferHandle, ContentInfo, LayerState, PixelFormat, ScalingMode};

    /// Every listed surface has latched content of the given format.
    #[derive(Default)]
    struct FakeContent(BTreeMap<SurfaceId, PixelFormat>);

    impl LatchedContent for FakeContent {
        fn content(&self, surface: SurfaceId) -> Option<ContentInfo> {
            self.0.get(&surface).map(|format| ContentInfo {
                buffer: BufferHandle {
                    id: surface.0,
                    width: 100,
                    height: 100,
                    format: *format,
                },
                crop: None,
                scaling_mode: ScalingMode::default(),
                frame_number: 1,
            })
        }
    }

    const STACK: LayerStackId = LayerStackId(0);

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Rect {
        Rect::new(x0, y0, x1, y1)
    }

    fn scene() -> Scene {
        let mut scene = Scene::new();
        scene
            .displays
            .insert(STACK, DisplayState::new(STACK, "primary", 100, 100));
        scene
    }

    fn add(scene: &mut Scene, content: &mut FakeContent, id: u64, z: i32, at: (f64, f64), size: (u32, u32)) {
        let mut layer = LayerState::new(format!("s{id}"), size);
        layer.z = z;
        layer.position = at;
        scene.layers.insert(SurfaceId(id), layer);
        content.0.insert(SurfaceId(id), PixelFormat::Rgbx8888);
    }

    #[test]
    fn test_first_pass_dirties_visible_area() {
        let mut scene = scene();
        let mut content = FakeContent::default();
        add(&mut scene, &mut content, 1, 0, (0.0, 0.0), (50, 50));

        let mut compositor = RegionCompositor::new();
        assert!(compositor.rebuild(&scene, &content));
        let frame = compositor.frame(STACK).unwrap();
        assert_eq!(frame.visible_layers, vec![SurfaceId(1)]);
        assert_eq!(frame.dirty, Region::from_rect(rect(0.0, 0.0, 50.0, 50.0)));
        assert_eq!(frame.opaque, Region::from_rect(rect(0.0, 0.0, 50.0, 50.0)));
        assert_eq!(frame.undefined.area(), 100.0 * 100.0 - 50.0 * 50.0);
    }

    #[test]
    fn test_opaque_surface_occludes_lower() {
        let mut scene = scene();
        let mut content = FakeContent::default();
        add(&mut scene, &mut content, 1, 0, (0.0, 0.0), (100, 100));
        add(&mut scene, &mut content, 2, 1, (0.0, 0.0), (100, 100));

        let mut compositor = RegionCompositor::new();
        compositor.rebuild(&scene, &content);
        let frame = compositor.frame(STACK).unwrap();
        assert_eq!(frame.visible_layers, vec![SurfaceId(2)], "bottom surface fully occluded");
        let bottom = compositor.surface(SurfaceId(1)).unwrap();
        assert!(bottom.visible.is_empty());
        assert_eq!(bottom.covered.area(), 100.0 * 100.0);
    }

    #[test]
    fn test_translucent_surface_does_not_occlude() {
        let mut scene = scene();
        let mut content = FakeContent::default();
        add(&mut scene, &mut content, 1, 0, (0.0, 0.0), (100, 100));
        add(&mut scene, &mut content, 2, 1, (0.0, 0.0), (100, 100));
        content.0.insert(SurfaceId(2), PixelFormat::Rgba8888);

        let mut compositor = RegionCompositor::new();
        compositor.rebuild(&scene, &content);
        let frame = compositor.frame(STACK).unwrap();
        assert_eq!(frame.visible_layers, vec![SurfaceId(1), SurfaceId(2)]);
        assert_eq!(frame.opaque.area(), 100.0 * 100.0, "bottom is still opaque");

        // alpha below one also makes a surface translucent
        content.0.insert(SurfaceId(2), PixelFormat::Rgbx8888);
        scene.layers.get_mut(&SurfaceId(2)).unwrap().alpha = 0.5;
        compositor.invalidate();
        compositor.rebuild(&scene, &content);
        assert_eq!(compositor.frame(STACK).unwrap().visible_layers.len(), 2);
    }

    #[test]
    fn test_hidden_and_contentless_surfaces_skipped() {
        let mut scene = scene();
        let mut content = FakeContent::default();
        add(&mut scene, &mut content, 1, 0, (0.0, 0.0), (10, 10));
        add(&mut scene, &mut content, 2, 0, (20.0, 0.0), (10, 10));
        add(&mut scene, &mut content, 3, 0, (40.0, 0.0), (10, 10));
        scene.layers.get_mut(&SurfaceId(1)).unwrap().flags.hidden = true;
        content.0.remove(&SurfaceId(2));

        let mut compositor = RegionCompositor::new();
        compositor.rebuild(&scene, &content);
        assert_eq!(compositor.frame(STACK).unwrap().visible_layers, vec![SurfaceId(3)]);
        assert!(compositor.surface(SurfaceId(1)).is_none());
    }

    #[test]
    fn test_child_clipped_to_parent() {
        let mut scene = scene();
        let mut content = FakeContent::default();
        add(&mut scene, &mut content, 1, 0, (10.0, 10.0), (20, 20));
        add(&mut scene, &mut content, 2, 0, (15.0, 15.0), (50, 50));
        scene.layers.get_mut(&SurfaceId(2)).unwrap().parent = Some(SurfaceId(1));

        let mut compositor = RegionCompositor::new();
        compositor.rebuild(&scene, &content);
        let child = compositor.surface(SurfaceId(2)).unwrap();
        // child sits at (25,25) in screen space, clipped to parent (10..30)
        assert_eq!(child.visible, Region::from_rect(rect(25.0, 25.0, 30.0, 30.0)));
    }

    #[test]
    fn test_rebuild_only_when_dirty() {
        let mut scene = scene();
        let mut content = FakeContent::default();
        add(&mut scene, &mut content, 1, 0, (0.0, 0.0), (10, 10));

        let mut compositor = RegionCompositor::new();
        assert!(compositor.rebuild(&scene, &content));
        assert!(!compositor.rebuild(&scene, &content), "clean compositor must not recompute");
        assert_eq!(compositor.passes(), 1);
    }

    #[test]
    fn test_repeat_pass_is_identical() {
        let mut scene = scene();
        let mut content = FakeContent::default();
        add(&mut scene, &mut content, 1, 0, (0.0, 0.0), (60, 60));
        add(&mut scene, &mut content, 2, 1, (30.0, 30.0), (60, 60));

        let mut compositor = RegionCompositor::new();
        compositor.rebuild(&scene, &content);
        let first = compositor.compute(&scene, &content);
        let second = compositor.compute(&scene, &content);
        assert_eq!(first, second);

        // an unchanged scene has nothing newly exposed
        compositor.finish_frame(STACK);
        compositor.invalidate();
        compositor.rebuild(&scene, &content);
        assert!(compositor.frame(STACK).unwrap().dirty.is_empty());
        assert_eq!(first.surfaces, compositor.surfaces);
    }

    #[test]
    fn test_move_dirties_old_and_new_area() {
        let mut scene = scene();
        let mut content = FakeContent::default();
        add(&mut scene, &mut content, 1, 0, (0.0, 0.0), (10, 10));

        let mut compositor = RegionCompositor::new();
        compositor.rebuild(&scene, &content);
        compositor.finish_frame(STACK);

        scene.layers.get_mut(&SurfaceId(1)).unwrap().position = (50.0, 50.0);
        compositor.mark_content_dirty([SurfaceId(1)]);
        compositor.invalidate();
        compositor.rebuild(&scene, &content);
        let dirty = &compositor.frame(STACK).unwrap().dirty;
        assert_eq!(dirty.area(), 200.0);
        assert!(dirty.contains((5.0, 5.0).into()));
        assert!(dirty.contains((55.0, 55.0).into()));
    }

    #[test]
    fn test_removed_surface_exposes_lower() {
        let mut scene = scene();
        let mut content = FakeContent::default();
        add(&mut scene, &mut content, 1, 0, (0.0, 0.0), (100, 100));
        add(&mut scene, &mut content, 2, 1, (0.0, 0.0), (20, 20));

        let mut compositor = RegionCompositor::new();
        compositor.rebuild(&scene, &content);
        compositor.finish_frame(STACK);

        scene.layers.remove(&SurfaceId(2));
        compositor.invalidate();
        compositor.rebuild(&scene, &content);
        let frame = compositor.frame(STACK).unwrap();
        assert_eq!(frame.dirty, Region::from_rect(rect(0.0, 0.0, 20.0, 20.0)));
        assert_eq!(frame.visible_layers, vec![SurfaceId(1)]);
    }

    #[test]
    fn test_invalidate_surface_marks_visible_area() {
        let mut scene = scene();
        let mut content = FakeContent::default();
        add(&mut scene, &mut content, 1, 0, (10.0, 10.0), (10, 10));

        let mut compositor = RegionCompositor::new();
        compositor.rebuild(&scene, &content);
        compositor.finish_frame(STACK);
        compositor.invalidate_surface(&scene, SurfaceId(1));
        assert_eq!(
            compositor.frame(STACK).unwrap().dirty,
            Region::from_rect(rect(10.0, 10.0, 20.0, 20.0))
        );
    }

    #[test]
    fn test_viewport_scales_into_display() {
        let mut scene = scene();
        let mut content = FakeContent::default();
        add(&mut scene, &mut content, 1, 0, (0.0, 0.0), (50, 50));
        scene.displays.get_mut(&STACK).unwrap().viewport = rect(0.0, 0.0, 50.0, 50.0);

        let mut compositor = RegionCompositor::new();
        compositor.rebuild(&scene, &content);
        let frame = compositor.frame(STACK).unwrap();
        assert_eq!(frame.opaque, Region::from_rect(rect(0.0, 0.0, 100.0, 100.0)));
        assert!(frame.undefined.is_empty());
    }
}

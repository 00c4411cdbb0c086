//! Screen-space geometry: rectangles, affine transforms and regions.
//!
//! Coordinates are `f64` (kurbo) but every value produced by the compositor
//! is integral: bounds are rounded out after transformation, so region
//! arithmetic stays exact.

use serde::{Deserialize, Serialize};

pub use kurbo::{Affine, Point, Rect, Size, Vec2};

/// True if `rect` has no area.
#[inline]
pub fn is_degenerate(rect: &Rect) -> bool {
    !(rect.width() > 0.0 && rect.height() > 0.0)
}

/// True if the transform maps axis-aligned rectangles onto axis-aligned
/// rectangles (scale, translation, flips and 90° rotations).
pub fn preserves_rects(transform: &Affine) -> bool {
    let [a, b, c, d, _, _] = transform.as_coeffs();
    (b == 0.0 && c == 0.0) || (a == 0.0 && d == 0.0)
}

/// Bounding box of `rect` under `transform`, expanded to integer pixels.
pub fn transform_bounds(transform: &Affine, rect: Rect) -> Rect {
    transform.transform_rect_bbox(rect).expand()
}

/// Set of pixels as a list of pairwise-disjoint, non-empty rectangles.
///
/// Operations are deterministic: the same inputs always produce the same
/// rectangle list, so two passes over an unchanged scene compare equal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Region {
    rects: Vec<Rect>,
}

impl Region {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rect(rect: Rect) -> Self {
        let rect = rect.abs();
        if is_degenerate(&rect) {
            Self::new()
        } else {
            Self { rects: vec![rect] }
        }
    }

    pub fn from_rects(rects: impl IntoIterator<Item = Rect>) -> Self {
        let mut region = Self::new();
        for rect in rects {
            region.union_with(&Self::from_rect(rect));
        }
        region
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    pub fn clear(&mut self) {
        self.rects.clear();
    }

    /// Total covered area.
    pub fn area(&self) -> f64 {
        self.rects.iter().map(|r| r.area()).sum()
    }

    /// Smallest rectangle containing the region (zero rect when empty).
    pub fn bounds(&self) -> Rect {
        let mut iter = self.rects.iter();
        match iter.next() {
            Some(first) => iter.fold(*first, |acc, r| acc.union(*r)),
            None => Rect::ZERO,
        }
    }

    pub fn contains(&self, point: Point) -> bool {
        self.rects.iter().any(|r| r.contains(point))
    }

    /// True if every pixel of `other` is also in `self`.
    pub fn covers(&self, other: &Region) -> bool {
        other.subtract(self).is_empty()
    }

    /// `self ∪ other`.
    pub fn union(&self, other: &Region) -> Region {
        let mut out = self.clone();
        out.union_with(other);
        out
    }

    pub fn union_with(&mut self, other: &Region) {
        if other.is_empty() {
            return;
        }
        let fresh = other.subtract(self);
        self.rects.extend(fresh.rects);
    }

    /// `self ∩ other`.
    pub fn intersect(&self, other: &Region) -> Region {
        let mut rects = Vec::new();
        for a in &self.rects {
            for b in &other.rects {
                let r = a.intersect(*b);
                if !is_degenerate(&r) {
                    rects.push(r);
                }
            }
        }
        Region { rects }
    }

    pub fn intersect_rect(&self, rect: Rect) -> Region {
        self.intersect(&Region::from_rect(rect))
    }

    /// `self − other`.
    pub fn subtract(&self, other: &Region) -> Region {
        let mut rects = self.rects.clone();
        for cut in &other.rects {
            let mut next = Vec::with_capacity(rects.len());
            for r in rects {
                subtract_rect(r, *cut, &mut next);
            }
            rects = next;
            if rects.is_empty() {
                break;
            }
        }
        Region { rects }
    }

    pub fn subtract_with(&mut self, other: &Region) {
        if !other.is_empty() && !self.is_empty() {
            *self = self.subtract(other);
        }
    }

    pub fn translate(&self, offset: Vec2) -> Region {
        Region {
            rects: self.rects.iter().map(|r| *r + offset).collect(),
        }
    }

    /// Map every rectangle through `transform`.
    ///
    /// Only exact for rect-preserving transforms; others yield the union of
    /// bounding boxes.
    pub fn transform(&self, transform: &Affine) -> Region {
        Region::from_rects(self.rects.iter().map(|r| transform_bounds(transform, *r)))
    }
}

impl From<Rect> for Region {
    fn from(rect: Rect) -> Self {
        Region::from_rect(rect)
    }
}

/// Push the pieces of `a − b` (at most four) into `out`.
fn subtract_rect(a: Rect, b: Rect, out: &mut Vec<Rect>) {
    let overlap = a.intersect(b);
    if is_degenerate(&overlap) {
        out.push(a);
        return;
    }
    if overlap.y0 > a.y0 {
        out.push(Rect::new(a.x0, a.y0, a.x1, overlap.y0));
    }
    if overlap.x0 > a.x0 {
        out.push(Rect::new(a.x0, overlap.y0, overlap.x0, overlap.y1));
    }
    if overlap.x1 < a.x1 {
        out.push(Rect::new(overlap.x1, overlap.y0, a.x1, overlap.y1));
    }
    if overlap.y1 < a.y1 {
        out.push(Rect::new(a.x0, overlap.y1, a.x1, a.y1));
    }
}

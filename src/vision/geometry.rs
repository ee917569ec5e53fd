//! Geometry over quadrilateral text boxes
//!
//! Everything here is pure. Extents are always derived from the corners on
//! demand and never stored alongside a region.

use serde::{Deserialize, Serialize};

use crate::vision::TextRegion;

/// A 2D point in image-space pixels (or view-space units after transform)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned bounding extents of a set of corners
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Extents {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl Extents {
    /// Reduce 4 corners to their component-wise min/max
    pub fn of(corners: &[Point; 4]) -> Self {
        let mut extents = Self {
            min_x: corners[0].x,
            min_y: corners[0].y,
            max_x: corners[0].x,
            max_y: corners[0].y,
        };
        for p in &corners[1..] {
            extents.min_x = extents.min_x.min(p.x);
            extents.min_y = extents.min_y.min(p.y);
            extents.max_x = extents.max_x.max(p.x);
            extents.max_y = extents.max_y.max(p.y);
        }
        extents
    }

    /// A zero-size extent at a single point
    pub fn at(point: Point) -> Self {
        Self {
            min_x: point.x,
            min_y: point.y,
            max_x: point.x,
            max_y: point.y,
        }
    }

    pub fn width(&self) -> f32 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f32 {
        self.max_y - self.min_y
    }

    /// Midpoint of the extents as (cx, cy)
    pub fn center(&self) -> (f32, f32) {
        (
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }
}

/// Component-wise min/max over the region's 4 corners
pub fn extents(region: &TextRegion) -> Extents {
    Extents::of(&region.corners)
}

/// Vertical size of the region (`maxY - minY`), 0 for degenerate boxes
pub fn height(region: &TextRegion) -> f32 {
    extents(region).height()
}

pub fn width(region: &TextRegion) -> f32 {
    extents(region).width()
}

/// Midpoint of the region's extents
pub fn center(region: &TextRegion) -> (f32, f32) {
    extents(region).center()
}

/// Image-space to view-space mapping for a fit-to-view image
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenTransform {
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl Default for ScreenTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl ScreenTransform {
    pub const IDENTITY: Self = Self {
        scale: 1.0,
        offset_x: 0.0,
        offset_y: 0.0,
    };

    pub fn new(scale: f32, offset_x: f32, offset_y: f32) -> Self {
        Self {
            scale,
            offset_x,
            offset_y,
        }
    }

    /// Fit an image into a view, preserving aspect ratio and centering it.
    ///
    /// An image with a non-positive dimension gets scale 0, which collapses
    /// every mapped box to a point at the view center.
    pub fn fit(image_size: (f32, f32), view_size: (f32, f32)) -> Self {
        let (image_w, image_h) = image_size;
        let (view_w, view_h) = view_size;

        let scale = if image_w > 0.0 && image_h > 0.0 {
            (view_w / image_w).min(view_h / image_h).max(0.0)
        } else {
            0.0
        };

        Self {
            scale,
            offset_x: (view_w - image_w * scale) / 2.0,
            offset_y: (view_h - image_h * scale) / 2.0,
        }
    }

    pub fn apply_x(&self, x: f32) -> f32 {
        x * self.scale + self.offset_x
    }

    pub fn apply_y(&self, y: f32) -> f32 {
        y * self.scale + self.offset_y
    }

    pub fn apply(&self, point: Point) -> Point {
        Point::new(self.apply_x(point.x), self.apply_y(point.y))
    }

    /// Map image-space extents into view space
    pub fn apply_extents(&self, extents: &Extents) -> Extents {
        // A negative scale would flip min and max
        let a = self.apply(Point::new(extents.min_x, extents.min_y));
        let b = self.apply(Point::new(extents.max_x, extents.max_y));
        Extents {
            min_x: a.x.min(b.x),
            min_y: a.y.min(b.y),
            max_x: a.x.max(b.x),
            max_y: a.y.max(b.y),
        }
    }
}

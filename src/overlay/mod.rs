//! Overlay Synthesis
//!
//! Turns a reading order into an invisible text layer positioned over the
//! displayed photo. Each region becomes a transparent run sized and
//! letter-spaced to cover the original glyphs, and each gap becomes a
//! transparent space or newline run, so a drag-select over the photo copies
//! the reading-order transcript. Nothing visible is drawn.

use serde::Serialize;

use crate::layout::{LayoutParams, ReadingOrder, Separator};
use crate::vision::geometry::{Extents, Point, ScreenTransform};

/// Rendered-width measurement supplied by the presentation layer
pub trait TextMeasurer {
    /// Width of `text` rendered at `font_size` with no extra letter spacing
    fn measure(&self, text: &str, font_size: f32) -> f32;
}

impl<F> TextMeasurer for F
where
    F: Fn(&str, f32) -> f32,
{
    fn measure(&self, text: &str, font_size: f32) -> f32 {
        self(text, font_size)
    }
}

/// Fixed per-character advance estimate, for callers with no font at hand
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdvanceMeasurer {
    /// Advance of one character as a fraction of the font size
    pub advance_ratio: f32,
}

impl Default for AdvanceMeasurer {
    fn default() -> Self {
        Self { advance_ratio: 0.55 }
    }
}

impl TextMeasurer for AdvanceMeasurer {
    fn measure(&self, text: &str, font_size: f32) -> f32 {
        text.chars().count() as f32 * font_size * self.advance_ratio
    }
}

/// What an overlay run stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// Text of one recognized region
    Text,
    /// Space between two regions on the same line
    Space,
    /// Line break between two lines
    LineBreak,
}

impl From<Separator> for RunKind {
    fn from(separator: Separator) -> Self {
        match separator {
            Separator::SameLine => RunKind::Space,
            Separator::NewLine => RunKind::LineBreak,
        }
    }
}

/// One invisible, selectable text run in view space
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayRun {
    pub kind: RunKind,
    pub text: String,
    /// View-space rectangle; zero-sized for separator anchors
    pub rect: Extents,
    pub font_size: f32,
    /// Extra advance added after every character but the last
    pub letter_spacing: f32,
}

/// Invisible text layer for one displayed image
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct OverlayLayer {
    pub transform: ScreenTransform,
    pub runs: Vec<OverlayRun>,
}

impl OverlayLayer {
    /// The text a full selection over the layer copies
    pub fn plain_text(&self) -> String {
        self.runs.iter().map(|r| r.text.as_str()).collect()
    }

    /// Runs that carry region text
    pub fn text_runs(&self) -> impl Iterator<Item = &OverlayRun> {
        self.runs.iter().filter(|r| r.kind == RunKind::Text)
    }
}

/// Per-character spacing that stretches `natural_width` to `target_width`.
///
/// Returns 0 for single characters and non-positive natural widths. The
/// result may be negative but is always finite.
pub fn letter_spacing(text: &str, target_width: f32, natural_width: f32) -> f32 {
    let char_count = text.chars().count();
    if char_count <= 1 || !(natural_width > 0.0) {
        return 0.0;
    }

    let spacing = (target_width - natural_width) / (char_count - 1) as f32;
    if spacing.is_finite() {
        spacing
    } else {
        0.0
    }
}

/// Build the invisible text layer for an ordered set of regions
pub fn synthesize(
    order: &ReadingOrder,
    transform: &ScreenTransform,
    measurer: &dyn TextMeasurer,
    params: &LayoutParams,
) -> OverlayLayer {
    let mut runs = Vec::with_capacity(order.regions.len() * 2);

    let rects: Vec<Extents> = order
        .regions
        .iter()
        .map(|r| sanitize(transform.apply_extents(&r.extents())))
        .collect();

    for (i, region) in order.regions.iter().enumerate() {
        let rect = rects[i];
        let font_size = (rect.height() * params.font_size_factor).max(0.0);
        let natural_width = if font_size > 0.0 {
            measurer.measure(&region.text, font_size)
        } else {
            0.0
        };

        runs.push(OverlayRun {
            kind: RunKind::Text,
            text: region.text.clone(),
            rect,
            font_size,
            letter_spacing: letter_spacing(&region.text, rect.width(), natural_width),
        });

        let (Some(separator), Some(next)) = (order.separators.get(i), rects.get(i + 1)) else {
            continue;
        };

        // Anchored at the end of this region, halfway between the two centers
        let anchor = Point::new(rect.max_x, (rect.center().1 + next.center().1) / 2.0);
        runs.push(OverlayRun {
            kind: RunKind::from(*separator),
            text: separator.as_str().to_string(),
            rect: Extents::at(anchor),
            font_size,
            letter_spacing: 0.0,
        });
    }

    OverlayLayer {
        transform: *transform,
        runs,
    }
}

/// Collapse non-finite coordinates to 0 so downstream layout never sees NaN
fn sanitize(extents: Extents) -> Extents {
    let fix = |v: f32| if v.is_finite() { v } else { 0.0 };
    Extents {
        min_x: fix(extents.min_x),
        min_y: fix(extents.min_y),
        max_x: fix(extents.max_x),
        max_y: fix(extents.max_y),
    }
}

//! Reading-Order Layout
//!
//! Reconstructs human reading order (top-to-bottom, left-to-right) from an
//! unordered set of recognized text regions, and classifies the gap between
//! each pair of consecutive regions as a space or a line break.

use serde::{Deserialize, Serialize};

use crate::vision::geometry::{self, ScreenTransform};
use crate::vision::TextRegion;

/// Fraction of the average region height under which two vertical centers
/// count as the same line
pub const DEFAULT_LINE_THRESHOLD_FACTOR: f32 = 0.6;

/// Fraction of the on-screen box height used as the overlay font size
pub const DEFAULT_FONT_SIZE_FACTOR: f32 = 0.7;

/// Tunable layout constants
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutParams {
    /// Multiplier on the average region height that yields the line threshold
    pub line_threshold_factor: f32,
    /// Multiplier on the on-screen box height that yields the font size
    pub font_size_factor: f32,
}

impl Default for LayoutParams {
    fn default() -> Self {
        Self {
            line_threshold_factor: DEFAULT_LINE_THRESHOLD_FACTOR,
            font_size_factor: DEFAULT_FONT_SIZE_FACTOR,
        }
    }
}

/// Gap classification between two consecutive regions in reading order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Separator {
    /// Same visual line, joined by a single space
    SameLine,
    /// Different lines, joined by a line break
    NewLine,
}

impl Separator {
    /// The text this separator contributes to a transcript
    pub fn as_str(&self) -> &'static str {
        match self {
            Separator::SameLine => " ",
            Separator::NewLine => "\n",
        }
    }
}

/// Regions in reading order with one separator per adjacent pair
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ReadingOrder {
    /// Permutation of the input regions
    pub regions: Vec<TextRegion>,
    /// `separators[i]` sits between `regions[i]` and `regions[i + 1]`
    pub separators: Vec<Separator>,
    /// Line threshold used for classification, in view-space units
    pub line_threshold: f32,
}

impl ReadingOrder {
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Region texts joined by their separators
    pub fn transcript(&self) -> String {
        let mut out = String::new();
        for (i, region) in self.regions.iter().enumerate() {
            if i > 0 {
                out.push_str(self.separators[i - 1].as_str());
            }
            out.push_str(&region.text);
        }
        out
    }

    /// Split the ordered regions at every line break
    pub fn lines(&self) -> Vec<LineGroup> {
        let mut lines = Vec::new();
        let mut current: Vec<TextRegion> = Vec::new();

        for (i, region) in self.regions.iter().enumerate() {
            current.push(region.clone());
            let ends_line = self
                .separators
                .get(i)
                .map(|s| *s == Separator::NewLine)
                .unwrap_or(true);
            if ends_line {
                lines.push(LineGroup::new(std::mem::take(&mut current)));
            }
        }

        lines
    }
}

/// Regions judged to lie on one visual line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineGroup {
    pub regions: Vec<TextRegion>,
    /// Mean vertical center of the member regions (image space)
    pub center_y: f32,
    /// Mean height of the member regions (image space)
    pub average_height: f32,
}

impl LineGroup {
    fn new(regions: Vec<TextRegion>) -> Self {
        let count = regions.len().max(1) as f32;
        let center_y = regions.iter().map(|r| geometry::center(r).1).sum::<f32>() / count;
        let average_height = regions.iter().map(geometry::height).sum::<f32>() / count;
        Self {
            regions,
            center_y,
            average_height,
        }
    }

    /// Member texts joined by single spaces
    pub fn text(&self) -> String {
        self.regions
            .iter()
            .map(|r| r.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Arithmetic mean of region heights, 0 for an empty slice
pub fn average_height(regions: &[TextRegion]) -> f32 {
    if regions.is_empty() {
        return 0.0;
    }
    regions.iter().map(geometry::height).sum::<f32>() / regions.len() as f32
}

/// Same-line threshold in view-space units
pub fn line_threshold(regions: &[TextRegion], scale: f32, params: &LayoutParams) -> f32 {
    average_height(regions) * params.line_threshold_factor * scale
}

/// Order regions for reading and classify the gaps between them.
///
/// Sorting is by top edge, then left edge; the sort is stable so fully tied
/// regions keep their input order.
pub fn group_lines(
    regions: &[TextRegion],
    transform: &ScreenTransform,
    params: &LayoutParams,
) -> ReadingOrder {
    if regions.is_empty() {
        return ReadingOrder::default();
    }

    let threshold = line_threshold(regions, transform.scale, params);

    let mut keyed: Vec<(geometry::Extents, &TextRegion)> =
        regions.iter().map(|r| (geometry::extents(r), r)).collect();
    keyed.sort_by(|(a, _), (b, _)| {
        a.min_y
            .total_cmp(&b.min_y)
            .then_with(|| a.min_x.total_cmp(&b.min_x))
    });

    let separators = keyed
        .windows(2)
        .map(|pair| {
            let current = view_center_y(&pair[0].0, transform);
            let next = view_center_y(&pair[1].0, transform);
            if (current - next).abs() < threshold {
                Separator::SameLine
            } else {
                Separator::NewLine
            }
        })
        .collect();

    ReadingOrder {
        regions: keyed.into_iter().map(|(_, r)| r.clone()).collect(),
        separators,
        line_threshold: threshold,
    }
}

/// Reading-order transcript in image space
pub fn transcribe(regions: &[TextRegion], params: &LayoutParams) -> String {
    group_lines(regions, &ScreenTransform::IDENTITY, params).transcript()
}

fn view_center_y(extents: &geometry::Extents, transform: &ScreenTransform) -> f32 {
    (extents.min_y + extents.max_y) / 2.0 * transform.scale + transform.offset_y
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(text: &str, min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> TextRegion {
        TextRegion::from_extents(text, min_x, min_y, max_x, max_y, 0.9)
    }

    fn sample() -> Vec<TextRegion> {
        vec![
            boxed("Второй", 0.0, 40.0, 80.0, 60.0),
            boxed("мир", 90.0, 2.0, 130.0, 22.0),
            boxed("Привет", 0.0, 0.0, 80.0, 20.0),
        ]
    }

    #[test]
    fn test_reading_order_example() {
        let order = group_lines(&sample(), &ScreenTransform::IDENTITY, &LayoutParams::default());

        let texts: Vec<&str> = order.regions.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["Привет", "мир", "Второй"]);
        assert_eq!(order.separators, vec![Separator::SameLine, Separator::NewLine]);
        assert!((order.line_threshold - 12.0).abs() < 1e-4);
        assert_eq!(order.transcript(), "Привет мир\nВторой");
    }

    #[test]
    fn test_empty_input() {
        let order = group_lines(&[], &ScreenTransform::IDENTITY, &LayoutParams::default());
        assert!(order.is_empty());
        assert!(order.separators.is_empty());
        assert_eq!(order.line_threshold, 0.0);
        assert_eq!(order.transcript(), "");
        assert_eq!(average_height(&[]), 0.0);
    }

    #[test]
    fn test_single_region() {
        let regions = vec![boxed("one", 5.0, 5.0, 40.0, 20.0)];
        let order = group_lines(&regions, &ScreenTransform::IDENTITY, &LayoutParams::default());
        assert_eq!(order.len(), 1);
        assert!(order.separators.is_empty());
        assert_eq!(order.transcript(), "one");
    }

    #[test]
    fn test_threshold_boundary_is_strict() {
        // Height 20, factor 0.5 -> threshold exactly 10
        let params = LayoutParams {
            line_threshold_factor: 0.5,
            ..LayoutParams::default()
        };

        // Centers 10 and 20: difference equals the threshold
        let at_threshold = vec![boxed("a", 0.0, 0.0, 10.0, 20.0), boxed("b", 20.0, 10.0, 30.0, 30.0)];
        let order = group_lines(&at_threshold, &ScreenTransform::IDENTITY, &params);
        assert_eq!(order.line_threshold, 10.0);
        assert_eq!(order.separators, vec![Separator::NewLine]);

        // Centers 10 and 19.5: just under the threshold
        let below = vec![boxed("a", 0.0, 0.0, 10.0, 20.0), boxed("b", 20.0, 9.5, 30.0, 29.5)];
        let order = group_lines(&below, &ScreenTransform::IDENTITY, &params);
        assert_eq!(order.separators, vec![Separator::SameLine]);
    }

    #[test]
    fn test_identical_top_edges_order_by_left_edge() {
        let regions = vec![
            boxed("c", 200.0, 10.0, 240.0, 30.0),
            boxed("a", 0.0, 10.0, 40.0, 30.0),
            boxed("b", 100.0, 10.0, 140.0, 30.0),
        ];
        let order = group_lines(&regions, &ScreenTransform::IDENTITY, &LayoutParams::default());
        assert_eq!(order.transcript(), "a b c");
    }

    #[test]
    fn test_full_ties_keep_input_order() {
        let regions = vec![
            boxed("first", 0.0, 0.0, 10.0, 10.0),
            boxed("second", 0.0, 0.0, 10.0, 10.0),
        ];
        let order = group_lines(&regions, &ScreenTransform::IDENTITY, &LayoutParams::default());
        assert_eq!(order.regions[0].text, "first");
        assert_eq!(order.regions[1].text, "second");
    }

    #[test]
    fn test_all_zero_height_forces_line_breaks() {
        let regions = vec![
            boxed("a", 0.0, 0.0, 10.0, 0.0),
            boxed("b", 20.0, 0.0, 30.0, 0.0),
            boxed("c", 0.0, 5.0, 10.0, 5.0),
        ];
        let order = group_lines(&regions, &ScreenTransform::IDENTITY, &LayoutParams::default());
        assert_eq!(order.line_threshold, 0.0);
        // A zero difference is not below a zero threshold either
        assert_eq!(order.separators, vec![Separator::NewLine, Separator::NewLine]);
    }

    #[test]
    fn test_threshold_scales_with_view() {
        let regions = sample();
        let t = ScreenTransform::new(2.0, 10.0, 30.0);
        let order = group_lines(&regions, &t, &LayoutParams::default());
        assert!((order.line_threshold - 24.0).abs() < 1e-4);
        // Offsets shift both centers equally so classification is unchanged
        assert_eq!(order.separators, vec![Separator::SameLine, Separator::NewLine]);
    }

    #[test]
    fn test_output_is_permutation_and_deterministic() {
        let regions = vec![
            boxed("e", 50.0, 80.0, 90.0, 95.0),
            boxed("a", 0.0, 0.0, 30.0, 15.0),
            boxed("d", 0.0, 78.0, 40.0, 96.0),
            boxed("b", 40.0, 1.0, 70.0, 16.0),
            boxed("c", 10.0, 40.0, 60.0, 58.0),
        ];
        let params = LayoutParams::default();
        let first = group_lines(&regions, &ScreenTransform::IDENTITY, &params);
        let second = group_lines(&regions, &ScreenTransform::IDENTITY, &params);
        assert_eq!(first, second);

        assert_eq!(first.len(), regions.len());
        for region in &regions {
            let expected = regions.iter().filter(|r| *r == region).count();
            let actual = first.regions.iter().filter(|r| *r == region).count();
            assert_eq!(expected, actual);
        }
        assert_eq!(first.transcript(), "a b\nc\nd e");
    }

    #[test]
    fn test_lines_split_at_line_breaks() {
        let order = group_lines(&sample(), &ScreenTransform::IDENTITY, &LayoutParams::default());
        let lines = order.lines();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text(), "Привет мир");
        assert!((lines[0].center_y - 11.0).abs() < 1e-4);
        assert!((lines[0].average_height - 20.0).abs() < 1e-4);
        assert_eq!(lines[1].text(), "Второй");
        assert!((lines[1].center_y - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_transcribe_uses_image_space() {
        assert_eq!(transcribe(&sample(), &LayoutParams::default()), "Привет мир\nВторой");
    }
}

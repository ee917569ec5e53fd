//! Model output postprocessing
//!
//! Turns the DB probability map into text boxes, decodes CTC recognition
//! output against a character dictionary, and folds stray periods back into
//! the word they end.

use anyhow::{Context, Result};
use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};
use imageproc::geometry::min_area_rect;
use std::path::Path;

use crate::vision::geometry;
use crate::vision::{Point, TextRegion};

/// Load a recognition dictionary, one character per line
pub fn load_dictionary(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read dictionary {:?}", path))?;
    parse_dictionary(&content).with_context(|| format!("Invalid dictionary {:?}", path))
}

/// Parse dictionary text. Line endings are stripped, blank lines skipped.
pub fn parse_dictionary(content: &str) -> Result<Vec<String>> {
    let entries: Vec<String> = content
        .split('\n')
        .map(|line| line.trim_end_matches(['\r', '\n']))
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    if entries.is_empty() {
        anyhow::bail!("dictionary has no entries");
    }
    Ok(entries)
}

/// Greedy CTC decoding of `[steps, classes]` probabilities.
///
/// Class 0 is the blank and class `i` is dictionary entry `i - 1`. Classes
/// without an entry decode as a space. Returns the text and the mean
/// probability of the emitted characters.
pub fn ctc_decode(probs: &[f32], steps: usize, classes: usize, dictionary: &[String]) -> (String, f32) {
    let mut text = String::new();
    let mut score_sum = 0.0f32;
    let mut emitted = 0usize;
    let mut previous = 0usize;

    for step in probs.chunks_exact(classes.max(1)).take(steps) {
        let (index, score) = step
            .iter()
            .copied()
            .enumerate()
            .fold((0usize, f32::NEG_INFINITY), |best, (i, p)| {
                if p > best.1 {
                    (i, p)
                } else {
                    best
                }
            });

        if index == 0 || index == previous {
            previous = index;
            continue;
        }
        previous = index;

        let entry = dictionary.get(index - 1).map(String::as_str).unwrap_or(" ");
        if entry.trim().is_empty() {
            // Collapse runs of spaces and never lead with one
            if !text.is_empty() && !text.ends_with(' ') {
                text.push(' ');
            }
        } else {
            text.push_str(entry);
        }
        score_sum += score;
        emitted += 1;
    }

    let text = text.trim_end().to_string();
    let confidence = if emitted > 0 {
        score_sum / emitted as f32
    } else {
        0.0
    };
    (text, confidence)
}

/// Box extraction parameters for the DB detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DbParams {
    /// Probability above which a pixel counts as text
    pub box_threshold: f32,
    /// Minimum mean probability inside a kept box
    pub box_score_threshold: f32,
    pub unclip_ratio: f32,
    /// Minimum short side of a kept box, in probability map pixels
    pub min_box_size: f32,
    pub max_candidates: usize,
}

impl Default for DbParams {
    fn default() -> Self {
        Self {
            box_threshold: 0.3,
            box_score_threshold: 0.6,
            unclip_ratio: 1.5,
            min_box_size: 3.0,
            max_candidates: 1000,
        }
    }
}

/// A detected box in probability map coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedBox {
    /// Top-left, top-right, bottom-right, bottom-left
    pub corners: [Point; 4],
    pub score: f32,
}

/// Extract text boxes from a `width * height` row-major probability map
pub fn extract_boxes(prob: &[f32], width: usize, height: usize, params: &DbParams) -> Vec<DetectedBox> {
    if width == 0 || height == 0 || prob.len() < width * height {
        return Vec::new();
    }

    let mask = GrayImage::from_fn(width as u32, height as u32, |x, y| {
        let p = prob[y as usize * width + x as usize];
        image::Luma([if p > params.box_threshold { 255 } else { 0 }])
    });

    let mut boxes = Vec::new();
    let contours = find_contours::<i32>(&mask);

    for contour in contours
        .iter()
        .filter(|c| matches!(c.border_type, BorderType::Outer))
        .take(params.max_candidates)
    {
        if contour.points.len() <= 2 {
            continue;
        }

        let rect = min_area_rect(&contour.points)
            .map(|p| Point::new(p.x as f32, p.y as f32));
        let rect = order_by_angle(rect);
        if short_side(&rect) < params.min_box_size {
            continue;
        }

        let score = mean_score(prob, width, height, &rect);
        if score < params.box_score_threshold {
            continue;
        }

        let expanded = unclip(&rect, params.unclip_ratio);
        if short_side(&expanded) < params.min_box_size + 2.0 {
            continue;
        }

        boxes.push(DetectedBox {
            corners: order_corners(expanded),
            score,
        });
    }

    boxes
}

/// Map probability map corners back to the source image, clamped to its bounds
pub fn scale_to_source(
    corners: &[Point; 4],
    ratio_w: f32,
    ratio_h: f32,
    source_width: u32,
    source_height: u32,
) -> [Point; 4] {
    corners.map(|p| {
        Point::new(
            (p.x / ratio_w).clamp(0.0, source_width as f32),
            (p.y / ratio_h).clamp(0.0, source_height as f32),
        )
    })
}

/// Fold regions reading exactly "." into the region they follow on the same
/// line, when the period starts past that region's right edge.
///
/// `line_threshold_factor` scales the mean region height into the vertical
/// tolerance for "same line". The remaining regions keep their input order.
pub fn merge_detached_periods(regions: Vec<TextRegion>, line_threshold_factor: f32) -> Vec<TextRegion> {
    if regions.len() < 2 {
        return regions;
    }

    let extents: Vec<_> = regions.iter().map(geometry::extents).collect();
    let tolerance = regions.iter().map(geometry::height).sum::<f32>() / regions.len() as f32
        * line_threshold_factor;
    let is_period = |i: usize| regions[i].text == ".";

    let mut target: Vec<Option<usize>> = vec![None; regions.len()];
    for dot in (0..regions.len()).filter(|&i| is_period(i)) {
        let (dot_x, dot_y) = extents[dot].center();

        // Nearest region to the left of the period on its line
        let previous = (0..regions.len())
            .filter(|&j| j != dot)
            .filter(|&j| (extents[j].center().1 - dot_y).abs() < tolerance)
            .filter(|&j| extents[j].center().0 < dot_x)
            .max_by(|&a, &b| extents[a].center().0.total_cmp(&extents[b].center().0));

        if let Some(prev) = previous {
            if !is_period(prev) && dot_x > extents[prev].max_x {
                target[dot] = Some(prev);
            }
        }
    }

    let mut merged = regions;
    for &prev in target.iter().flatten() {
        merged[prev].text.push('.');
    }

    merged
        .into_iter()
        .zip(target)
        .filter_map(|(region, target)| target.is_none().then_some(region))
        .collect()
}

fn distance(a: Point, b: Point) -> f32 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}

fn short_side(rect: &[Point; 4]) -> f32 {
    distance(rect[0], rect[1]).min(distance(rect[1], rect[2]))
}

/// Sort corners counterclockwise around their centroid so neighbors share an edge
fn order_by_angle(rect: [Point; 4]) -> [Point; 4] {
    let cx = rect.iter().map(|p| p.x).sum::<f32>() / 4.0;
    let cy = rect.iter().map(|p| p.y).sum::<f32>() / 4.0;
    let mut sorted = rect;
    sorted.sort_by(|a, b| {
        let ta = (a.y - cy).atan2(a.x - cx);
        let tb = (b.y - cy).atan2(b.x - cx);
        ta.total_cmp(&tb)
    });
    sorted
}

/// Push each side of an edge-ordered rectangle outward by
/// `area * ratio / perimeter`
fn unclip(rect: &[Point; 4], ratio: f32) -> [Point; 4] {
    let w = distance(rect[0], rect[1]);
    let h = distance(rect[0], rect[3]);
    let perimeter = 2.0 * (w + h);
    if perimeter <= 0.0 || w <= 0.0 || h <= 0.0 {
        return *rect;
    }
    let d = w * h * ratio / perimeter;

    let u = Point::new((rect[1].x - rect[0].x) / w * d, (rect[1].y - rect[0].y) / w * d);
    let v = Point::new((rect[3].x - rect[0].x) / h * d, (rect[3].y - rect[0].y) / h * d);

    [
        Point::new(rect[0].x - u.x - v.x, rect[0].y - u.y - v.y),
        Point::new(rect[1].x + u.x - v.x, rect[1].y + u.y - v.y),
        Point::new(rect[2].x + u.x + v.x, rect[2].y + u.y + v.y),
        Point::new(rect[3].x - u.x + v.x, rect[3].y - u.y + v.y),
    ]
}

/// Reorder to top-left, top-right, bottom-right, bottom-left
fn order_corners(rect: [Point; 4]) -> [Point; 4] {
    let mut by_x = rect;
    by_x.sort_by(|a, b| a.x.total_cmp(&b.x));

    let (tl, bl) = if by_x[0].y <= by_x[1].y {
        (by_x[0], by_x[1])
    } else {
        (by_x[1], by_x[0])
    };
    let (tr, br) = if by_x[2].y <= by_x[3].y {
        (by_x[2], by_x[3])
    } else {
        (by_x[3], by_x[2])
    };
    [tl, tr, br, bl]
}

/// Mean probability over the axis-aligned bounds of a box
fn mean_score(prob: &[f32], width: usize, height: usize, rect: &[Point; 4]) -> f32 {
    let bounds = geometry::Extents::of(rect);
    let x0 = (bounds.min_x.floor().max(0.0) as usize).min(width - 1);
    let x1 = (bounds.max_x.ceil().max(0.0) as usize).min(width - 1);
    let y0 = (bounds.min_y.floor().max(0.0) as usize).min(height - 1);
    let y1 = (bounds.max_y.ceil().max(0.0) as usize).min(height - 1);

    let mut sum = 0.0f32;
    let mut count = 0usize;
    for y in y0..=y1 {
        let row = &prob[y * width..(y + 1) * width];
        sum += row[x0..=x1].iter().sum::<f32>();
        count += x1 - x0 + 1;
    }

    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dictionary(chars: &[&str]) -> Vec<String> {
        chars.iter().map(|c| c.to_string()).collect()
    }

    /// One-hot probabilities for a class sequence
    fn one_hot(sequence: &[usize], classes: usize) -> Vec<f32> {
        let mut probs = vec![0.0; sequence.len() * classes];
        for (t, &class) in sequence.iter().enumerate() {
            probs[t * classes + class] = 0.9;
        }
        probs
    }

    #[test]
    fn test_parse_dictionary_strips_line_endings() {
        let dict = parse_dictionary("а\r\nб\n\nв\n").unwrap();
        assert_eq!(dict, dictionary(&["а", "б", "в"]));
    }

    #[test]
    fn test_parse_dictionary_keeps_space_entry() {
        let dict = parse_dictionary("a\n \nb").unwrap();
        assert_eq!(dict, dictionary(&["a", " ", "b"]));
    }

    #[test]
    fn test_empty_dictionary_is_rejected() {
        assert!(parse_dictionary("").is_err());
        assert!(parse_dictionary("\r\n\n").is_err());
    }

    #[test]
    fn test_load_dictionary_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("dict.txt");
        std::fs::write(&path, "x\ny\n").unwrap();
        assert_eq!(load_dictionary(&path).unwrap(), dictionary(&["x", "y"]));

        assert!(load_dictionary(&dir.path().join("missing.txt")).is_err());
    }

    #[test]
    fn test_ctc_collapses_repeats_and_blanks() {
        let dict = dictionary(&["a", "b", "l"]);
        // a a _ b l _ l
        let probs = one_hot(&[1, 1, 0, 2, 3, 0, 3], 5);
        let (text, confidence) = ctc_decode(&probs, 7, 5, &dict);
        assert_eq!(text, "abll");
        assert!((confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_ctc_space_class_rules() {
        let dict = dictionary(&["a", "b"]);
        // Class 3 has no entry and decodes as a space
        let probs = one_hot(&[3, 1, 3, 0, 3, 2, 3], 4);
        let (text, _) = ctc_decode(&probs, 7, 4, &dict);
        assert_eq!(text, "a b");
    }

    #[test]
    fn test_ctc_all_blank() {
        let dict = dictionary(&["a"]);
        let probs = one_hot(&[0, 0, 0], 2);
        let (text, confidence) = ctc_decode(&probs, 3, 2, &dict);
        assert_eq!(text, "");
        assert_eq!(confidence, 0.0);
    }

    fn block_map(width: usize, height: usize, x: std::ops::Range<usize>, y: std::ops::Range<usize>) -> Vec<f32> {
        let mut prob = vec![0.0; width * height];
        for row in y {
            for col in x.clone() {
                prob[row * width + col] = 1.0;
            }
        }
        prob
    }

    #[test]
    fn test_extract_single_box() {
        let prob = block_map(40, 20, 10..30, 5..15);
        let boxes = extract_boxes(&prob, 40, 20, &DbParams::default());
        assert_eq!(boxes.len(), 1);

        let detected = &boxes[0];
        assert!(detected.score > 0.6);
        let bounds = geometry::Extents::of(&detected.corners);
        // Unclipped beyond the mask
        assert!(bounds.min_x < 10.0 && bounds.max_x > 29.0);
        assert!(bounds.min_y < 5.0 && bounds.max_y > 14.0);
        // Top-left first, bottom-left last
        assert!(detected.corners[0].x < detected.corners[1].x);
        assert!(detected.corners[0].y < detected.corners[3].y);
    }

    #[test]
    fn test_extract_drops_tiny_and_faint_boxes() {
        // 2x2 speck
        let speck = block_map(40, 20, 5..7, 5..7);
        assert!(extract_boxes(&speck, 40, 20, &DbParams::default()).is_empty());

        // Above the pixel threshold but below the box score threshold
        let faint: Vec<f32> = block_map(40, 20, 10..30, 5..15)
            .into_iter()
            .map(|p| p * 0.4)
            .collect();
        assert!(extract_boxes(&faint, 40, 20, &DbParams::default()).is_empty());
    }

    #[test]
    fn test_extract_two_boxes() {
        let mut prob = block_map(60, 40, 5..25, 5..12);
        for (i, p) in block_map(60, 40, 30..55, 25..32).into_iter().enumerate() {
            prob[i] += p;
        }
        let boxes = extract_boxes(&prob, 60, 40, &DbParams::default());
        assert_eq!(boxes.len(), 2);
    }

    #[test]
    fn test_extract_empty_map() {
        assert!(extract_boxes(&[], 0, 0, &DbParams::default()).is_empty());
        assert!(extract_boxes(&vec![0.0; 100], 10, 10, &DbParams::default()).is_empty());
    }

    #[test]
    fn test_scale_to_source_clamps() {
        let corners = [
            Point::new(-4.0, 2.0),
            Point::new(50.0, 2.0),
            Point::new(50.0, 10.0),
            Point::new(-4.0, 10.0),
        ];
        let scaled = scale_to_source(&corners, 0.5, 0.5, 80, 100);
        assert_eq!(scaled[0], Point::new(0.0, 4.0));
        assert_eq!(scaled[1], Point::new(80.0, 4.0));
        assert_eq!(scaled[2], Point::new(80.0, 20.0));
    }

    #[test]
    fn test_detached_period_merges_into_previous_word() {
        let regions = vec![
            TextRegion::from_extents("Конец", 0.0, 0.0, 50.0, 20.0, 0.9),
            TextRegion::from_extents(".", 52.0, 12.0, 56.0, 20.0, 0.5),
            TextRegion::from_extents("Next", 0.0, 40.0, 40.0, 60.0, 0.9),
        ];
        let merged = merge_detached_periods(regions, 0.6);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].text, "Конец.");
        assert_eq!(merged[1].text, "Next");
    }

    #[test]
    fn test_period_overlapping_word_is_kept() {
        let regions = vec![
            TextRegion::from_extents("word", 0.0, 0.0, 50.0, 20.0, 0.9),
            TextRegion::from_extents(".", 45.0, 10.0, 49.0, 20.0, 0.5),
        ];
        let merged = merge_detached_periods(regions, 0.6);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].text, "word");
    }

    #[test]
    fn test_consecutive_periods_merge_once() {
        let regions = vec![
            TextRegion::from_extents("wait", 0.0, 0.0, 40.0, 20.0, 0.9),
            TextRegion::from_extents(".", 42.0, 10.0, 46.0, 20.0, 0.5),
            TextRegion::from_extents(".", 48.0, 10.0, 52.0, 20.0, 0.5),
        ];
        let merged = merge_detached_periods(regions, 0.6);
        let texts: Vec<&str> = merged.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["wait.", "."]);
    }

    #[test]
    fn test_period_on_other_line_is_kept() {
        let regions = vec![
            TextRegion::from_extents("top", 0.0, 0.0, 30.0, 20.0, 0.9),
            TextRegion::from_extents(".", 40.0, 50.0, 44.0, 58.0, 0.5),
        ];
        let merged = merge_detached_periods(regions, 0.6);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].text, "top");
    }
}

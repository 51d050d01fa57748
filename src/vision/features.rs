//! Signature feature matching
//!
//! Keypoint-based comparison of two signature images: FAST-9 corners, binary
//! patch descriptors, mutual-nearest-neighbor Hamming matching, and a
//! similarity score derived from the average match distance.

use anyhow::Result;
use image::GrayImage;
use imageproc::corners::{corners_fast9, Corner};
use imageproc::filter::gaussian_blur_f32;
use std::path::Path;
use tracing::debug;

use crate::config::MatcherSettings;
use crate::vision::preprocess;

/// Half-width of the square patch each descriptor is sampled from.
const PATCH_RADIUS: u32 = 15;

/// Comparisons per descriptor; one bit each.
const DESCRIPTOR_BITS: usize = 256;

/// Smoothing applied before intensity comparisons, as in ORB/BRIEF.
const SMOOTHING_SIGMA: f32 = 2.0;

/// One intensity comparison inside the sampling patch.
#[derive(Debug, Clone, Copy)]
struct TestPair {
    x0: i32,
    y0: i32,
    x1: i32,
    y1: i32,
}

/// A keypoint with its 256-bit binary descriptor.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub x: u32,
    pub y: u32,
    bits: [u64; DESCRIPTOR_BITS / 64],
}

impl Descriptor {
    /// Number of differing bits between two descriptors.
    pub fn hamming_distance(&self, other: &Descriptor) -> u32 {
        self.bits
            .iter()
            .zip(other.bits.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

/// A matched descriptor pair.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorMatch {
    /// Index into the first descriptor set
    pub query: usize,
    /// Index into the second descriptor set
    pub train: usize,
    /// Hamming distance between the pair
    pub distance: u32,
}

/// Fixed pseudo-random sampling pattern.
///
/// The pattern must be identical for every descriptor ever produced, so it is
/// generated from a hard-coded xorshift seed. Samples stay two pixels clear of
/// the patch edge to leave room for the smoothing kernel.
fn sampling_pattern() -> Vec<TestPair> {
    let span = (PATCH_RADIUS - 2) as u64;
    let mut state = 0x9E37_79B9_7F4A_7C15u64;
    let mut coord = move || -> i32 {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state % (2 * span + 1)) as i32 - span as i32
    };
    (0..DESCRIPTOR_BITS)
        .map(|_| TestPair {
            x0: coord(),
            y0: coord(),
            x1: coord(),
            y1: coord(),
        })
        .collect()
}

/// Signature comparator over a fixed grayscale canvas.
pub struct SignatureMatcher {
    settings: MatcherSettings,
    pattern: Vec<TestPair>,
}

impl SignatureMatcher {
    pub fn new(settings: MatcherSettings) -> Self {
        Self {
            settings,
            pattern: sampling_pattern(),
        }
    }

    /// Detect keypoints and compute their descriptors.
    ///
    /// Corners are ranked by FAST score and capped at `max_keypoints`; corners
    /// too close to the border for a full sampling patch are dropped.
    pub fn describe(&self, image: &GrayImage) -> Vec<Descriptor> {
        let (width, height) = image.dimensions();
        if width <= 2 * PATCH_RADIUS || height <= 2 * PATCH_RADIUS {
            return Vec::new();
        }

        let mut corners = corners_fast9(image, self.settings.fast_threshold);
        corners.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        corners.truncate(self.settings.max_keypoints);

        let smoothed = gaussian_blur_f32(image, SMOOTHING_SIGMA);
        corners
            .iter()
            .filter(|c| {
                c.x >= PATCH_RADIUS
                    && c.y >= PATCH_RADIUS
                    && c.x + PATCH_RADIUS < width
                    && c.y + PATCH_RADIUS < height
            })
            .map(|c| self.sample(&smoothed, c))
            .collect()
    }

    fn sample(&self, smoothed: &GrayImage, corner: &Corner) -> Descriptor {
        let cx = corner.x as i32;
        let cy = corner.y as i32;
        let mut bits = [0u64; DESCRIPTOR_BITS / 64];
        for (i, pair) in self.pattern.iter().enumerate() {
            let a = smoothed
                .get_pixel((cx + pair.x0) as u32, (cy + pair.y0) as u32)
                .0[0];
            let b = smoothed
                .get_pixel((cx + pair.x1) as u32, (cy + pair.y1) as u32)
                .0[0];
            if a < b {
                bits[i / 64] |= 1 << (i % 64);
            }
        }
        Descriptor {
            x: corner.x,
            y: corner.y,
            bits,
        }
    }

    /// Compare two already-normalized canvases and return a similarity score.
    pub fn compare_images(&self, first: &GrayImage, second: &GrayImage) -> f32 {
        let query = self.describe(first);
        let train = self.describe(second);
        let matches = match_descriptors(&query, &train);
        debug!(
            "{} x {} descriptors, {} mutual matches",
            query.len(),
            train.len(),
            matches.len()
        );
        calculate_similarity(&matches)
    }

    /// Load two signature images, normalize both to the canvas, and compare.
    pub fn compare_files(&self, first: &Path, second: &Path) -> Result<f32> {
        let a = preprocess::load_canvas(
            first,
            self.settings.canvas_width,
            self.settings.canvas_height,
        )?;
        let b = preprocess::load_canvas(
            second,
            self.settings.canvas_width,
            self.settings.canvas_height,
        )?;
        Ok(self.compare_images(&a, &b))
    }
}

/// One-to-one mutual-nearest-neighbor matching under Hamming distance.
///
/// A pair survives only when each descriptor is the other's nearest neighbor
/// (cross-check). Matches come back sorted by ascending distance.
pub fn match_descriptors(query: &[Descriptor], train: &[Descriptor]) -> Vec<DescriptorMatch> {
    if query.is_empty() || train.is_empty() {
        return Vec::new();
    }

    let forward: Vec<usize> = query.iter().map(|q| nearest(q, train)).collect();
    let backward: Vec<usize> = train.iter().map(|t| nearest(t, query)).collect();

    let mut matches: Vec<DescriptorMatch> = forward
        .iter()
        .enumerate()
        .filter(|(qi, &ti)| backward[ti] == *qi)
        .map(|(qi, &ti)| DescriptorMatch {
            query: qi,
            train: ti,
            distance: query[qi].hamming_distance(&train[ti]),
        })
        .collect();
    matches.sort_by_key(|m| m.distance);
    matches
}

fn nearest(descriptor: &Descriptor, pool: &[Descriptor]) -> usize {
    let mut best = 0;
    let mut best_distance = u32::MAX;
    for (i, candidate) in pool.iter().enumerate() {
        let distance = descriptor.hamming_distance(candidate);
        if distance < best_distance {
            best = i;
            best_distance = distance;
        }
    }
    best
}

/// Similarity from matched-descriptor distances: `max(0, 100 - mean distance)`.
///
/// Returns 0 when nothing matched, which covers blank or unreadable crops
/// where no descriptor survives.
pub fn calculate_similarity(matches: &[DescriptorMatch]) -> f32 {
    if matches.is_empty() {
        return 0.0;
    }
    let total: f32 = matches.iter().map(|m| m.distance as f32).sum();
    let average = total / matches.len() as f32;
    (100.0 - average).max(0.0)
}

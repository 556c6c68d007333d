use image::{imageops, DynamicImage, GrayImage, RgbImage};
use imageproc::{
    contrast::{otsu_level, threshold, ThresholdType},
    edges::canny,
    filter::median_filter,
    hough::{detect_lines, LineDetectionOptions, PolarLine},
};
use nalgebra::{Rotation2, Vector2};
use tracing::instrument;

use crate::util::{median, sample_replicate};

pub const MAX_SKEW_DEGREES: f32 = 10.0;
/// Corrections smaller than this are left alone.
pub const MIN_SKEW_DEGREES: f32 = 0.5;

const CANNY_LOW: f32 = 50.0;
const CANNY_HIGH: f32 = 150.0;
const HOUGH_VOTES: u32 = 80;
const HOUGH_SUPPRESSION_RADIUS: u32 = 8;
const MAX_LINES: usize = 200;

/// Estimates the small rotation of the dominant straight lines in `image`.
///
/// Returns the median line angle in degrees, normalized into (-90, 90] and
/// limited to `±max_degrees`, or `None` when no usable line is found. A
/// positive angle means lines descend to the right.
#[instrument(level = "trace", skip(image))]
pub fn detect_skew_angle(image: &RgbImage, max_degrees: f32) -> Option<f32> {
    let gray = DynamicImage::ImageRgb8(image.clone()).into_luma8();
    let gray = median_filter(&gray, 1, 1);
    let level = otsu_level(&gray);
    let mut binary = threshold(&gray, level, ThresholdType::Binary);
    imageops::invert(&mut binary);
    let edges = canny(&binary, CANNY_LOW, CANNY_HIGH);

    let lines = detect_lines(
        &edges,
        LineDetectionOptions {
            vote_threshold: HOUGH_VOTES,
            suppression_radius: HOUGH_SUPPRESSION_RADIUS,
        },
    );
    log::trace!("Found {} candidate lines", lines.len());

    // detect_lines yields lines in angle order, so rank by support first
    let mut ranked = lines
        .iter()
        .map(|line| (line_support(&edges, line), line))
        .collect::<Vec<_>>();
    ranked.sort_by(|a, b| b.0.cmp(&a.0));

    let mut angles = ranked
        .into_iter()
        .take(MAX_LINES)
        .map(|(_, line)| normalize_angle(line.angle_in_degrees as f32 - 90.0))
        .filter(|angle| angle.abs() <= max_degrees)
        .collect::<Vec<_>>();
    median(&mut angles)
}

/// Number of edge pixels lying on `line`, the vote count it got in the
/// accumulator up to rounding.
fn line_support(edges: &GrayImage, line: &PolarLine) -> u32 {
    let (width, height) = edges.dimensions();
    let (sin, cos) = (line.angle_in_degrees as f32).to_radians().sin_cos();
    let (x0, y0) = (line.r * cos, line.r * sin);
    let reach = (width + height) as i32;
    (-reach..=reach)
        .filter(|t| {
            let x = (x0 - *t as f32 * sin).round();
            let y = (y0 + *t as f32 * cos).round();
            x >= 0.0
                && y >= 0.0
                && (x as u32) < width
                && (y as u32) < height
                && edges.get_pixel(x as u32, y as u32)[0] > 0
        })
        .count() as u32
}

fn normalize_angle(mut angle: f32) -> f32 {
    if angle > 90.0 {
        angle -= 180.0;
    }
    if angle <= -90.0 {
        angle += 180.0;
    }
    angle
}

/// Rotates `image` about its center so that lines at `degrees` become level.
/// Output keeps the input size; uncovered pixels replicate the nearest edge.
pub fn rotate_replicate(image: &RgbImage, degrees: f32) -> RgbImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }
    let center = Vector2::new(width as f32 / 2.0, height as f32 / 2.0);
    let rotation = Rotation2::new(degrees.to_radians());
    RgbImage::from_fn(width, height, |x, y| {
        let source = rotation * (Vector2::new(x as f32, y as f32) - center) + center;
        sample_replicate(image, source.x, source.y)
    })
}

/// Detects and removes a small skew. Returns the image unchanged when the
/// estimate is missing or under [`MIN_SKEW_DEGREES`].
pub fn deskew(image: RgbImage) -> RgbImage {
    match detect_skew_angle(&image, MAX_SKEW_DEGREES) {
        Some(angle) if angle.abs() >= MIN_SKEW_DEGREES => {
            log::debug!("Deskewing crop by {angle:.2} degrees");
            rotate_replicate(&image, angle)
        }
        _ => image,
    }
}

use crate::{PositionMap, RegionBox};

pub const DEFAULT_LONG_RATIO: f32 = 2.0;

/// Width over height, `+inf` for zero-height boxes.
pub fn aspect_ratio(rect: &RegionBox) -> f32 {
    let height = rect.height();
    if height > 0 {
        rect.width() as f32 / height as f32
    } else {
        f32::INFINITY
    }
}

/// Splits boxes into `(normal, long)`; a box is long when its aspect ratio is
/// strictly greater than `threshold`.
pub fn partition_by_aspect(boxes: &PositionMap, threshold: f32) -> (PositionMap, PositionMap) {
    let mut normal = PositionMap::new();
    let mut long = PositionMap::new();
    for (class, rect) in boxes.iter() {
        if aspect_ratio(rect) > threshold {
            long.push(class, *rect);
        } else {
            normal.push(class, *rect);
        }
    }
    (normal, long)
}

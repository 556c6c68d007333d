use float_ord::FloatOrd;
use ndarray::ArrayView2;
use tracing::instrument;

use crate::{Detection, RegionBox, RegionClass};

/// Thresholds for turning raw detector cells into detections.
#[derive(Debug, Clone, Copy)]
pub struct DecodeOptions {
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            input_size: 640,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
        }
    }
}

/// Decodes `(cx, cy, w, h, p_0..p_n)` rows into detections in original-image
/// coordinates and runs per-class non-max suppression.
#[instrument(level = "debug", skip(predictions))]
pub fn decode_detections(
    predictions: ArrayView2<f32>,
    image_width: u32,
    image_height: u32,
    options: DecodeOptions,
) -> Vec<Detection> {
    let x_scale = image_width as f32 / options.input_size as f32;
    let y_scale = image_height as f32 / options.input_size as f32;

    let candidates = predictions
        .rows()
        .into_iter()
        .filter(|row| row.len() > 4)
        .filter_map(|row| {
            let (class_index, score) = row
                .iter()
                .skip(4)
                .enumerate()
                .max_by_key(|(_, score)| FloatOrd(**score))
                .map(|(index, score)| (index, *score))?;
            if score <= options.confidence_threshold {
                return None;
            }
            let class = RegionClass::from_index(class_index)?;
            let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
            let clamp_x = |v: f32| ((v * x_scale).round() as i32).clamp(0, image_width as i32);
            let clamp_y = |v: f32| ((v * y_scale).round() as i32).clamp(0, image_height as i32);
            let rect = RegionBox::new(
                clamp_x(cx - w / 2.0),
                clamp_y(cy - h / 2.0),
                clamp_x(cx + w / 2.0),
                clamp_y(cy + h / 2.0),
            );
            (!rect.is_degenerate()).then_some(Detection { rect, class, score })
        })
        .collect::<Vec<_>>();
    log::debug!("{} candidates above confidence threshold", candidates.len());

    let kept = non_max_suppression(candidates, options.iou_threshold);
    log::debug!("{} detections after non-max suppression", kept.len());
    kept
}

/// Greedy per-class NMS. Output is grouped by class in class order and sorted
/// by descending score within a class.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        a.class
            .cmp(&b.class)
            .then_with(|| FloatOrd(b.score).cmp(&FloatOrd(a.score)))
    });

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    let mut class_start = 0;
    for detection in detections {
        if kept
            .last()
            .map_or(true, |last| last.class != detection.class)
        {
            class_start = kept.len();
        }
        let suppressed = kept[class_start..]
            .iter()
            .any(|other| other.rect.iou(&detection.rect) > iou_threshold);
        if !suppressed {
            kept.push(detection);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn cell(cx: f32, cy: f32, w: f32, h: f32, class: usize, score: f32) -> Vec<f32> {
        let mut row = vec![cx, cy, w, h];
        row.extend((0..RegionClass::ALL.len()).map(|i| if i == class { score } else { 0.01 }));
        row
    }

    fn grid(cells: &[Vec<f32>]) -> Array2<f32> {
        let width = cells[0].len();
        Array2::from_shape_vec((cells.len(), width), cells.concat()).unwrap()
    }

    #[test]
    fn scales_to_original_image() {
        let predictions = grid(&[cell(320.0, 320.0, 64.0, 128.0, 3, 0.9)]);
        let detections = decode_detections(predictions.view(), 1280, 320, DecodeOptions::default());
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class, RegionClass::Label);
        assert_eq!(detections[0].rect, RegionBox::new(576, 128, 704, 192));
    }

    #[test]
    fn drops_low_confidence_and_clamps() {
        let predictions = grid(&[
            cell(100.0, 100.0, 50.0, 50.0, 0, 0.25),
            cell(0.0, 0.0, 100.0, 100.0, 1, 0.8),
        ]);
        let detections = decode_detections(predictions.view(), 640, 640, DecodeOptions::default());
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].rect, RegionBox::new(0, 0, 50, 50));
    }

    #[test]
    fn nms_is_per_class() {
        let a = Detection {
            rect: RegionBox::new(0, 0, 100, 100),
            class: RegionClass::Label,
            score: 0.9,
        };
        let b = Detection { score: 0.8, ..a };
        let c = Detection {
            class: RegionClass::Map,
            score: 0.7,
            ..a
        };
        let d = Detection {
            rect: RegionBox::new(200, 200, 300, 300),
            score: 0.95,
            ..a
        };
        let kept = non_max_suppression(vec![b, c, a, d], 0.45);
        assert_eq!(kept, vec![d, a, c]);
    }

    #[test]
    fn nms_keeps_boxes_at_threshold() {
        let a = Detection {
            rect: RegionBox::new(0, 0, 100, 100),
            class: RegionClass::Label,
            score: 0.9,
        };
        // IoU of 50/150 = 0.33
        let b = Detection {
            rect: RegionBox::new(50, 0, 150, 100),
            score: 0.6,
            ..a
        };
        assert_eq!(non_max_suppression(vec![a, b], 0.45).len(), 2);
        assert_eq!(non_max_suppression(vec![a, b], 0.3).len(), 1);
    }
}

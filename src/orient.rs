use image::{imageops, RgbImage};
use tracing::instrument;

use crate::{deskew::deskew, ocr::TextRecognizer, Crop, TextToken};

/// Default text score a crop needs before it is deskewed. Tied to the scale
/// of tesseract's 0-100 confidences; recalibrate for other recognizers.
pub const DEFAULT_BLANK_SCORE_CUTOFF: f32 = 50.0;

#[derive(Debug, Clone, Copy)]
pub struct OrientOptions {
    pub auto_orient: bool,
    pub deskew: bool,
    pub blank_score_cutoff: f32,
}

impl Default for OrientOptions {
    fn default() -> Self {
        Self {
            auto_orient: true,
            deskew: true,
            blank_score_cutoff: DEFAULT_BLANK_SCORE_CUTOFF,
        }
    }
}

/// The rotation picked for a crop, in counter-clockwise quarter turns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rotation {
    pub quarter_turns: u8,
    pub score: f32,
}

/// Sum of `confidence * max(1, alphanumeric chars)` over tokens with signal.
pub fn text_score(tokens: &[TextToken]) -> f32 {
    tokens
        .iter()
        .filter(|token| token.has_signal())
        .map(|token| {
            let alnum = token.text.chars().filter(|c| c.is_alphanumeric()).count();
            token.confidence * alnum.max(1) as f32
        })
        .sum()
}

/// Rotates counter-clockwise by `quarter_turns` × 90°.
pub fn rotate_quarter_turns(image: &RgbImage, quarter_turns: u8) -> RgbImage {
    match quarter_turns % 4 {
        0 => image.clone(),
        1 => imageops::rotate270(image),
        2 => imageops::rotate180(image),
        _ => imageops::rotate90(image),
    }
}

/// Turns crops upright by asking an OCR engine which quarter turn reads best.
pub struct Orienter {
    recognizer: Box<dyn TextRecognizer>,
    options: OrientOptions,
}

impl Orienter {
    pub fn new(recognizer: impl TextRecognizer + 'static, options: OrientOptions) -> Self {
        Self::from_boxed(Box::new(recognizer), options)
    }

    pub fn from_boxed(recognizer: Box<dyn TextRecognizer>, options: OrientOptions) -> Self {
        Self {
            recognizer,
            options,
        }
    }

    fn score(&self, image: &RgbImage) -> f32 {
        match self.recognizer.recognize(image) {
            Ok(tokens) => text_score(&tokens),
            Err(err) => {
                log::warn!("OCR scoring failed, treating rotation as blank: {err}");
                0.0
            }
        }
    }

    /// Scores the four quarter turns and returns the best. Ties go to the
    /// earliest turn.
    #[instrument(level = "trace", skip(self, image))]
    pub fn best_rotation(&self, image: &RgbImage) -> (Rotation, RgbImage) {
        let mut best: Option<(Rotation, RgbImage)> = None;
        for quarter_turns in 0..4u8 {
            let candidate = rotate_quarter_turns(image, quarter_turns);
            let score = self.score(&candidate);
            log::trace!("Rotation {} scored {score}", quarter_turns as u32 * 90);
            if best.as_ref().map_or(true, |(rotation, _)| score > rotation.score) {
                best = Some((
                    Rotation {
                        quarter_turns,
                        score,
                    },
                    candidate,
                ));
            }
        }
        best.unwrap_or_else(|| {
            (
                Rotation {
                    quarter_turns: 0,
                    score: 0.0,
                },
                image.clone(),
            )
        })
    }

    /// Rotates the crop upright and, if it carries enough text, removes a
    /// small skew. The source box is left as it was in the source image.
    #[instrument(level = "debug", skip(self, crop), fields(class = %crop.class))]
    pub fn orient(&self, crop: Crop) -> Crop {
        if !self.options.auto_orient {
            return crop;
        }
        let (rotation, mut image) = self.best_rotation(&crop.image);
        if rotation.quarter_turns != 0 {
            log::debug!(
                "Rotating {} crop by {} degrees (score {})",
                crop.class,
                rotation.quarter_turns as u32 * 90,
                rotation.score
            );
        }
        if self.options.deskew && rotation.score >= self.options.blank_score_cutoff {
            image = deskew(image);
        }
        Crop { image, ..crop }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::OcrError, RegionBox, RegionClass};
    use image::Rgb;
    use imageproc::{drawing::draw_polygon_mut, point::Point};

    const MARK: Rgb<u8> = Rgb([255, 0, 0]);

    /// Reads well only when the marker pixel sits in the top-left corner.
    fn marker_reader(image: &RgbImage) -> Result<Vec<TextToken>, OcrError> {
        if *image.get_pixel(0, 0) == MARK {
            Ok(vec![TextToken::new("Herbarium", 90.0), TextToken::new("-", 10.0)])
        } else {
            Ok(vec![TextToken::new("l1", 20.0)])
        }
    }

    fn marked_crop(corner: (u32, u32)) -> Crop {
        let mut image = RgbImage::new(40, 20);
        image.put_pixel(corner.0, corner.1, MARK);
        Crop {
            image,
            source: RegionBox::new(0, 0, 40, 20),
            class: RegionClass::Label,
        }
    }

    fn no_deskew() -> OrientOptions {
        OrientOptions {
            deskew: false,
            ..OrientOptions::default()
        }
    }

    #[test]
    fn scoring_weights_alphanumerics() {
        let tokens = [
            TextToken::new("ab1!", 10.0),
            TextToken::new("--", 5.0),
            TextToken::new("ignored", 0.0),
            TextToken::new("", 99.0),
        ];
        assert_eq!(text_score(&tokens), 35.0);
    }

    #[test]
    fn quarter_turns_are_counter_clockwise() {
        let mut image = RgbImage::new(3, 2);
        image.put_pixel(2, 0, MARK);
        let turned = rotate_quarter_turns(&image, 1);
        assert_eq!(turned.dimensions(), (2, 3));
        assert_eq!(*turned.get_pixel(0, 0), MARK);
    }

    #[test]
    fn picks_the_reading_rotation() {
        let orienter = Orienter::new(marker_reader, no_deskew());
        // top-right corner needs one counter-clockwise turn
        let crop = orienter.orient(marked_crop((39, 0)));
        assert_eq!(crop.image.dimensions(), (20, 40));
        assert_eq!(*crop.image.get_pixel(0, 0), MARK);
        assert_eq!(crop.source, RegionBox::new(0, 0, 40, 20));
    }

    #[test]
    fn upright_crop_is_stable() {
        let orienter = Orienter::new(marker_reader, no_deskew());
        let once = orienter.orient(marked_crop((0, 0)));
        let (rotation, _) = orienter.best_rotation(&once.image);
        assert_eq!(rotation.quarter_turns, 0);
        assert_eq!(rotation.score, 90.0 * 9.0 + 10.0);
    }

    #[test]
    fn ties_keep_the_first_rotation() {
        let flat = |_: &RgbImage| -> Result<Vec<TextToken>, OcrError> {
            Ok(vec![TextToken::new("same", 50.0)])
        };
        let orienter = Orienter::new(flat, no_deskew());
        let (rotation, _) = orienter.best_rotation(&RgbImage::new(4, 2));
        assert_eq!(rotation.quarter_turns, 0);
    }

    #[test]
    fn failing_ocr_leaves_crop_alone() {
        let broken = |_: &RgbImage| -> Result<Vec<TextToken>, OcrError> {
            Err(OcrError::Other("engine missing".into()))
        };
        let orienter = Orienter::new(broken, OrientOptions::default());
        let crop = marked_crop((39, 0));
        let original = crop.image.clone();
        assert_eq!(orienter.orient(crop).image, original);
    }

    #[test]
    fn disabled_orientation_is_a_no_op() {
        let orienter = Orienter::new(
            marker_reader,
            OrientOptions {
                auto_orient: false,
                ..OrientOptions::default()
            },
        );
        let crop = marked_crop((39, 19));
        let original = crop.image.clone();
        assert_eq!(orienter.orient(crop).image, original);
    }

    /// A dark band across a white crop, descending 5° to the right.
    fn tilted_crop() -> Crop {
        let mut image = RgbImage::from_pixel(320, 200, Rgb([255, 255, 255]));
        let slope = 5f32.to_radians().tan();
        let y_at = |x: f32| 100.0 + (x - 160.0) * slope;
        let poly = [
            Point::new(10, y_at(10.0) as i32 - 6),
            Point::new(310, y_at(310.0) as i32 - 6),
            Point::new(310, y_at(310.0) as i32 + 6),
            Point::new(10, y_at(10.0) as i32 + 6),
        ];
        draw_polygon_mut(&mut image, &poly, Rgb([0, 0, 0]));
        Crop {
            image,
            source: RegionBox::new(0, 0, 320, 200),
            class: RegionClass::Label,
        }
    }

    /// Scores every rotation the same, so the crop is never turned.
    fn steady_reader(
        confidence: f32,
    ) -> impl Fn(&RgbImage) -> Result<Vec<TextToken>, OcrError> + Send + Sync {
        move |_: &RgbImage| Ok(vec![TextToken::new("a", confidence)])
    }

    #[test]
    fn deskews_at_the_cutoff() {
        let orienter = Orienter::new(
            steady_reader(DEFAULT_BLANK_SCORE_CUTOFF),
            OrientOptions::default(),
        );
        let crop = tilted_crop();
        let original = crop.image.clone();
        let oriented = orienter.orient(crop);
        assert_eq!(oriented.image.dimensions(), original.dimensions());
        assert_ne!(oriented.image, original);
    }

    #[test]
    fn skips_deskew_below_the_cutoff() {
        let orienter = Orienter::new(
            steady_reader(DEFAULT_BLANK_SCORE_CUTOFF - 0.1),
            OrientOptions::default(),
        );
        let crop = tilted_crop();
        let original = crop.image.clone();
        assert_eq!(orienter.orient(crop).image, original);
    }

    #[test]
    fn skips_deskew_when_disabled() {
        let orienter = Orienter::new(steady_reader(90.0), no_deskew());
        let crop = tilted_crop();
        let original = crop.image.clone();
        assert_eq!(orienter.orient(crop).image, original);
    }
}

//! Debug overlay: outlines and labels every box of a position map.

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
    rect::Rect,
};
use tracing::instrument;

use crate::{CollageError, PositionMap, RegionBox, RegionClass};

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const BOX_THICKNESS: i32 = 2;
const FONT_SCALE: f32 = 14.0;
/// Tab width per character when no font is available to measure with.
const FALLBACK_CHAR_WIDTH: u32 = 7;

/// Font used for overlay labels. Without one only the label tabs are drawn.
#[derive(Default)]
pub struct OverlayStyle {
    pub font: Option<FontVec>,
    pub font_scale: f32,
}

impl OverlayStyle {
    pub fn with_font_path(path: &Path) -> Result<Self, CollageError> {
        let data = std::fs::read(path)?;
        let font = FontVec::try_from_vec(data).map_err(|_| {
            CollageError::Config(format!("failed to parse font file {}", path.display()))
        })?;
        Ok(Self {
            font: Some(font),
            font_scale: FONT_SCALE,
        })
    }

    fn scale(&self) -> PxScale {
        PxScale::from(if self.font_scale > 0.0 {
            self.font_scale
        } else {
            FONT_SCALE
        })
    }
}

pub fn label_text(class: RegionClass, rect: &RegionBox) -> String {
    format!("{class} [{}, {}, {}, {}]", rect.x1, rect.y1, rect.x2, rect.y2)
}

/// Returns a copy of `canvas` with every box outlined and labelled.
#[instrument(level = "debug", skip_all)]
pub fn draw_overlay(canvas: &RgbImage, positions: &PositionMap, style: &OverlayStyle) -> RgbImage {
    let mut overlay = canvas.clone();
    for (class, rect) in positions.iter() {
        draw_box(&mut overlay, rect);
        draw_label(&mut overlay, &label_text(class, rect), rect, style);
    }
    overlay
}

fn draw_box(image: &mut RgbImage, rect: &RegionBox) {
    for inset in 0..BOX_THICKNESS {
        let width = rect.width() - 2 * inset;
        let height = rect.height() - 2 * inset;
        if width <= 0 || height <= 0 {
            break;
        }
        let outline = Rect::at(rect.x1 + inset, rect.y1 + inset).of_size(width as u32, height as u32);
        draw_hollow_rect_mut(image, outline, BOX_COLOR);
    }
}

fn draw_label(image: &mut RgbImage, text: &str, rect: &RegionBox, style: &OverlayStyle) {
    let scale = style.scale();
    let (text_width, text_height) = match &style.font {
        Some(font) => text_size(scale, font, text),
        None => (
            text.chars().count() as u32 * FALLBACK_CHAR_WIDTH,
            scale.y.ceil() as u32,
        ),
    };
    let tab_height = text_height + 4;
    // above the box, or just inside it when there is no room
    let tab_y = if rect.y1 >= tab_height as i32 {
        rect.y1 - tab_height as i32
    } else {
        rect.y1
    };
    if text_width == 0 {
        return;
    }
    draw_filled_rect_mut(
        image,
        Rect::at(rect.x1, tab_y).of_size(text_width, tab_height),
        BOX_COLOR,
    );
    if let Some(font) = &style.font {
        draw_text_mut(image, TEXT_COLOR, rect.x1, tab_y + 2, scale, font, text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_leaves_the_source_untouched() {
        let canvas = RgbImage::new(200, 100);
        let positions: PositionMap = [(RegionClass::Label, RegionBox::new(10, 40, 110, 90))]
            .into_iter()
            .collect();
        let overlay = draw_overlay(&canvas, &positions, &OverlayStyle::default());

        assert!(canvas.pixels().all(|p| *p == Rgb([0, 0, 0])));
        assert_eq!(*overlay.get_pixel(10, 60), BOX_COLOR);
        assert_eq!(*overlay.get_pixel(11, 60), BOX_COLOR);
        assert_eq!(*overlay.get_pixel(12, 60), Rgb([0, 0, 0]));
        // label tab sits above the box
        assert_eq!(*overlay.get_pixel(12, 30), BOX_COLOR);
    }

    #[test]
    fn label_lists_class_and_coordinates() {
        assert_eq!(
            label_text(RegionClass::AttachedItem, &RegionBox::new(1, 2, 3, 4)),
            "attached_item [1, 2, 3, 4]"
        );
    }
}

use image::{imageops, RgbImage};

use crate::{Crop, RegionBox, RegionClass};

/// Copies the pixels under `rect` out of `image`, clamped to the image.
/// Returns `None` when nothing is left after clamping.
pub fn extract_crop(image: &RgbImage, rect: RegionBox, class: RegionClass) -> Option<Crop> {
    let x1 = rect.x1.clamp(0, image.width() as i32) as u32;
    let y1 = rect.y1.clamp(0, image.height() as i32) as u32;
    let x2 = rect.x2.clamp(0, image.width() as i32) as u32;
    let y2 = rect.y2.clamp(0, image.height() as i32) as u32;
    if x2 <= x1 || y2 <= y1 {
        log::debug!("Skipping empty {class} crop at {rect:?}");
        return None;
    }
    log::trace!("Slicing {class} crop at {rect:?}");
    let pixels = imageops::crop_imm(image, x1, y1, x2 - x1, y2 - y1).to_image();
    Some(Crop {
        image: pixels,
        source: rect,
        class,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn crops_pixels_and_keeps_source_box() {
        let mut image = RgbImage::new(20, 10);
        image.put_pixel(5, 3, Rgb([9, 8, 7]));
        let crop = extract_crop(&image, RegionBox::new(5, 3, 15, 8), RegionClass::Map).unwrap();
        assert_eq!((crop.width(), crop.height()), (10, 5));
        assert_eq!(crop.image.get_pixel(0, 0), &Rgb([9, 8, 7]));
        assert_eq!(crop.source, RegionBox::new(5, 3, 15, 8));
    }

    #[test]
    fn zero_area_is_discarded() {
        let image = RgbImage::new(20, 10);
        assert!(extract_crop(&image, RegionBox::new(5, 3, 5, 8), RegionClass::Map).is_none());
        assert!(extract_crop(&image, RegionBox::new(25, 3, 30, 8), RegionClass::Map).is_none());
    }

    #[test]
    fn partially_outside_is_clamped() {
        let image = RgbImage::new(20, 10);
        let crop = extract_crop(&image, RegionBox::new(-5, 5, 30, 20), RegionClass::Map).unwrap();
        assert_eq!((crop.width(), crop.height()), (20, 5));
    }
}

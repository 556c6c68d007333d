use image::{imageops::FilterType, DynamicImage, Pixel, Rgb};
use ndarray::{Array3, Array4, Axis};
use tracing::instrument;

/// Resizes to `size`×`size` (no letterboxing) and lays the pixels out as a
/// `1×3×size×size` tensor scaled to [0, 1].
#[instrument(level = "debug", skip(image))]
pub(crate) fn to_input_tensor(image: &DynamicImage, size: u32) -> Array4<f32> {
    let image = image
        .resize_exact(size, size, FilterType::Triangle)
        .to_rgb32f();
    Array3::<f32>::from_shape_fn(
        (3, image.height() as usize, image.width() as usize),
        |(ch, y, x)| image.get_pixel(x as u32, y as u32).channels()[ch],
    )
    .insert_axis(Axis(0))
}

/// Median with the two middle values averaged for even counts.
pub(crate) fn median(values: &mut [f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f32::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Bilinear sample with out-of-range coordinates clamped to the nearest edge.
pub(crate) fn sample_replicate(image: &image::RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let max_x = (image.width() - 1) as f32;
    let max_y = (image.height() - 1) as f32;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);
    let x0 = x.floor();
    let y0 = y.floor();
    let x1 = (x0 + 1.0).min(max_x);
    let y1 = (y0 + 1.0).min(max_y);
    let fx = x - x0;
    let fy = y - y0;

    let p00 = image.get_pixel(x0 as u32, y0 as u32);
    let p10 = image.get_pixel(x1 as u32, y0 as u32);
    let p01 = image.get_pixel(x0 as u32, y1 as u32);
    let p11 = image.get_pixel(x1 as u32, y1 as u32);

    let mut out = [0u8; 3];
    for (ch, value) in out.iter_mut().enumerate() {
        let top = p00[ch] as f32 * (1.0 - fx) + p10[ch] as f32 * fx;
        let bottom = p01[ch] as f32 * (1.0 - fx) + p11[ch] as f32 * fx;
        *value = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn median_even_and_odd() {
        assert_eq!(median(&mut []), None);
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut [4.0, 1.0, 2.0, 3.0]), Some(2.5));
    }

    #[test]
    fn input_tensor_shape_and_range() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(30, 10, Rgb([255, 0, 51])));
        let tensor = to_input_tensor(&image, 64);
        assert_eq!(tensor.shape(), &[1, 3, 64, 64]);
        assert!((tensor[[0, 0, 5, 5]] - 1.0).abs() < 1e-6);
        assert!(tensor[[0, 1, 5, 5]].abs() < 1e-6);
        assert!((tensor[[0, 2, 5, 5]] - 0.2).abs() < 1e-3);
    }

    #[test]
    fn replicate_sampling_clamps() {
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(0, 0, Rgb([10, 10, 10]));
        image.put_pixel(1, 0, Rgb([30, 30, 30]));
        assert_eq!(sample_replicate(&image, -5.0, 0.0), Rgb([10, 10, 10]));
        assert_eq!(sample_replicate(&image, 7.0, 3.0), Rgb([30, 30, 30]));
        assert_eq!(sample_replicate(&image, 0.5, 0.0), Rgb([20, 20, 20]));
    }
}

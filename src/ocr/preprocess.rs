use image::{DynamicImage, GrayImage, Luma};
use imageproc::filter::{gaussian_blur_f32, median_filter};
use tracing::debug;

use crate::config::{coerce_odd, PreprocessSettings, DEFAULT_BLUR_KERNEL_SIZE, DEFAULT_THRESHOLD_BLOCK_SIZE};

/// Grayscale, median blur, then adaptive binarization.
pub fn preprocess_page(image: &DynamicImage, settings: &PreprocessSettings) -> GrayImage {
    let gray = image.to_luma8();
    if gray.width() == 0 || gray.height() == 0 {
        return gray;
    }

    let kernel = coerce_odd(i64::from(settings.blur_kernel_size), DEFAULT_BLUR_KERNEL_SIZE);
    let radius = (kernel - 1) / 2;
    let blurred = median_filter(&gray, radius, radius);

    debug!(
        "Preprocessed {}x{} page: median kernel {}, threshold block {}, C {}",
        gray.width(),
        gray.height(),
        kernel,
        settings.threshold_block_size,
        settings.threshold_c
    );

    adaptive_gaussian_threshold(&blurred, settings.threshold_block_size, settings.threshold_c)
}

/// Gaussian-weighted local threshold: a pixel turns white when it is brighter
/// than its neighbourhood mean minus `c`.
pub fn adaptive_gaussian_threshold(image: &GrayImage, block_size: u32, c: i32) -> GrayImage {
    if image.width() == 0 || image.height() == 0 {
        return image.clone();
    }

    let block = coerce_odd(i64::from(block_size), DEFAULT_THRESHOLD_BLOCK_SIZE);
    // Same sigma a gaussian kernel of `block` taps would get.
    let sigma = 0.3 * ((block as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let local_mean = gaussian_blur_f32(image, sigma);

    let mut output = GrayImage::new(image.width(), image.height());
    for (x, y, pixel) in output.enumerate_pixels_mut() {
        let source = i32::from(image.get_pixel(x, y)[0]);
        let mean = i32::from(local_mean.get_pixel(x, y)[0]);
        *pixel = if source > mean - c { Luma([255]) } else { Luma([0]) };
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn page_with_ink() -> DynamicImage {
        let mut img = RgbImage::from_pixel(24, 24, Rgb([250, 250, 250]));
        for x in 9..15 {
            for y in 9..15 {
                img.put_pixel(x, y, Rgb([10, 10, 10]));
            }
        }
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_preprocess_binarizes_page() {
        let processed = preprocess_page(&page_with_ink(), &PreprocessSettings::default());

        assert_eq!(processed.dimensions(), (24, 24));
        assert!(processed.pixels().all(|p| p[0] == 0 || p[0] == 255));
        assert_eq!(processed.get_pixel(12, 12)[0], 0);
        assert_eq!(processed.get_pixel(1, 1)[0], 255);
    }

    #[test]
    fn test_preprocess_accepts_invalid_sizes() {
        let settings = PreprocessSettings {
            blur_kernel_size: 4,
            threshold_block_size: 0,
            threshold_c: 2,
        };
        let processed = preprocess_page(&page_with_ink(), &settings);
        assert_eq!(processed.dimensions(), (24, 24));
    }

    #[test]
    fn test_uniform_page_stays_white() {
        let flat = GrayImage::from_pixel(16, 16, Luma([128]));
        let thresholded = adaptive_gaussian_threshold(&flat, 11, 2);
        assert!(thresholded.pixels().all(|p| p[0] == 255));
    }
}

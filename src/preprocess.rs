use image::{DynamicImage, GrayImage, Luma};
use imageproc::filter::gaussian_blur_f32;

// Equivalent sigmas of a 5x5 denoise kernel and a 19px threshold block.
const DENOISE_SIGMA: f32 = 1.1;
const BLOCK_SIGMA: f32 = 3.2;
// Offset subtracted from the local mean before comparing.
const THRESHOLD_OFFSET: f32 = 9.0;

/// Grayscale, blur, then inverted adaptive threshold against a gaussian
/// weighted local mean, so dark glyphs come out white whatever the lighting.
///
/// Only feed original crops; thresholding an already binarized image is
/// not meaningful.
pub fn preprocess(region: &DynamicImage) -> DynamicImage {
    let gray = region.to_luma8();
    if gray.width() == 0 || gray.height() == 0 {
        return DynamicImage::ImageLuma8(gray);
    }
    let blurred = gaussian_blur_f32(&gray, DENOISE_SIGMA);
    let local_mean = gaussian_blur_f32(&blurred, BLOCK_SIGMA);

    let binary = GrayImage::from_fn(blurred.width(), blurred.height(), |x, y| {
        let value = blurred.get_pixel(x, y)[0] as f32;
        let threshold = local_mean.get_pixel(x, y)[0] as f32 - THRESHOLD_OFFSET;
        if value > threshold {
            Luma([0])
        } else {
            Luma([255])
        }
    });
    DynamicImage::ImageLuma8(binary)
}

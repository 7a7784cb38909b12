use crate::Result;
use anyhow::Context;
use image::{DynamicImage, GrayImage, Luma};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use nalgebra::Matrix3;

/// Luma conversion; grayscale input passes through unchanged
pub fn to_grayscale(image: &DynamicImage) -> GrayImage {
    match image {
        DynamicImage::ImageLuma8(gray) => gray.clone(),
        other => other.to_luma8(),
    }
}

pub fn is_empty_image(image: &GrayImage) -> bool {
    image.width() == 0 || image.height() == 0
}

/// Build an imageproc projection from a homography
pub fn projection_from_homography(h: &Matrix3<f64>) -> Option<Projection> {
    let mut m = [0f32; 9];
    for r in 0..3 {
        for c in 0..3 {
            m[r * 3 + c] = h[(r, c)] as f32;
        }
    }
    Projection::from_matrix(m)
}

/// Resample `src` into a `width` x `height` image where output pixel `p`
/// takes the value of `src` at `h * p` (bicubic, zero outside the source).
pub fn warp_perspective_inverse(
    src: &GrayImage,
    h: &Matrix3<f64>,
    width: u32,
    height: u32,
) -> Result<GrayImage> {
    // warp_into samples the source at projection^-1 * p
    let h_inv = h
        .try_inverse()
        .ok_or_else(|| anyhow::anyhow!("homography is not invertible"))?;
    let projection = projection_from_homography(&h_inv)
        .ok_or_else(|| anyhow::anyhow!("homography inverse is not a valid projection"))?;

    let mut out = GrayImage::new(width, height);
    if is_empty_image(src) || is_empty_image(&out) {
        return Ok(out);
    }
    warp_into(src, &projection, Interpolation::Bicubic, Luma([0]), &mut out);
    Ok(out)
}

/// Load and decode an image from disk as grayscale
pub fn load_image(path: &std::path::Path) -> Result<GrayImage> {
    if !path.exists() {
        return Err(anyhow::anyhow!(
            "Image file does not exist: {}",
            path.display()
        ));
    }

    let img = image::open(path).with_context(|| format!("decoding {}", path.display()))?;
    Ok(to_grayscale(&img))
}

/// Downscale by `factor` (triangle filter); factors of 1 or more return a copy
pub fn scale_image(image: &GrayImage, factor: f32) -> GrayImage {
    if factor >= 1.0 || is_empty_image(image) {
        return image.clone();
    }
    let width = ((image.width() as f32 * factor).round() as u32).max(1);
    let height = ((image.height() as f32 * factor).round() as u32).max(1);
    image::imageops::resize(image, width, height, image::imageops::FilterType::Triangle)
}

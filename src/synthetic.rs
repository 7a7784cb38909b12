//! Ground-truth scenes: a reference pasted into a frame under a known
//! homography, with optional sensor noise.

use crate::algorithms::planar_pnp::project_point;
use crate::pipeline::{CameraIntrinsics, Corners, PoseSolution};
use crate::tracker::projection::{model_corners, reference_corners};
use crate::utils::geometry::homography_from_corners;
use crate::utils::image_conversion::projection_from_homography;
use crate::Result;
use anyhow::anyhow;
use image::{GrayImage, Luma};
use imageproc::geometric_transformations::{warp_into, Interpolation};
use nalgebra::{Matrix3, Point2, Rotation3, Vector3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// Render `reference` into a `width` x `height` scene so that reference
/// point `p` lands at `h * p`. Uncovered pixels get `background`.
pub fn warp_into_scene(
    reference: &GrayImage,
    h: &Matrix3<f64>,
    width: u32,
    height: u32,
    background: u8,
) -> Result<GrayImage> {
    let projection =
        projection_from_homography(h).ok_or_else(|| anyhow!("homography is not a valid projection"))?;
    let mut scene = GrayImage::from_pixel(width, height, Luma([background]));
    warp_into(reference, &projection, Interpolation::Bicubic, Luma([background]), &mut scene);
    Ok(scene)
}

/// Add zero-mean Gaussian noise, clamped to the pixel range
pub fn add_gaussian_noise(image: &GrayImage, sigma: f64, seed: u64) -> Result<GrayImage> {
    if sigma == 0.0 {
        return Ok(image.clone());
    }
    let normal = Normal::new(0.0, sigma)?;
    let mut rng = StdRng::seed_from_u64(seed);

    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        let noisy = pixel[0] as f64 + normal.sample(&mut rng);
        pixel[0] = noisy.round().clamp(0.0, 255.0) as u8;
    }
    Ok(out)
}

/// Mean Euclidean distance between corresponding corners, in pixels
pub fn corner_error(estimated: &Corners, truth: &Corners) -> f64 {
    estimated
        .iter()
        .zip(truth.iter())
        .map(|(a, b)| (a - b).norm())
        .sum::<f64>()
        / 4.0
}

/// A reference plane seen by a virtual camera
#[derive(Debug, Clone)]
pub struct SyntheticView {
    pub homography: Matrix3<f64>,
    pub corners: Corners,
    pub intrinsics: CameraIntrinsics,
    pub pose: PoseSolution,
}

/// Place the reference plane in front of a camera, rotated by `tilt_deg`
/// about the vertical axis, filling about 60% of the scene width.
pub fn tilted_view(
    reference_width: u32,
    reference_height: u32,
    scene_width: u32,
    scene_height: u32,
    tilt_deg: f64,
) -> Option<SyntheticView> {
    let focal = scene_width.max(scene_height) as f64;
    let intrinsics = CameraIntrinsics::centered(focal, scene_width, scene_height);
    let distance = focal / (0.3 * scene_width as f64);

    let rotation = Rotation3::from_euler_angles(0.0, tilt_deg.to_radians(), 0.0).scaled_axis();
    let translation = Vector3::new(0.0, 0.0, distance);

    let model = model_corners(reference_width, reference_height);
    let mut corners = [Point2::origin(); 4];
    for (corner, point) in corners.iter_mut().zip(model.iter()) {
        *corner = project_point(&rotation, &translation, point, &intrinsics)?;
    }

    let homography = homography_from_corners(&reference_corners(reference_width, reference_height), &corners)?;
    Some(SyntheticView {
        homography,
        corners,
        intrinsics,
        pose: PoseSolution {
            rotation,
            translation,
        },
    })
}

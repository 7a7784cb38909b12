use crate::config::OrbConfig;
use crate::pipeline::{Descriptors, FeatureExtractor, Features, Keypoint};
use image::GrayImage;
use imageproc::corners::corners_fast9;
use imageproc::filter::gaussian_blur_f32;
use instant::Instant;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::cmp::Ordering;

/// 256 intensity comparisons, packed into 32 bytes
const DESCRIPTOR_BYTES: usize = 32;
const DESCRIPTOR_BITS: usize = DESCRIPTOR_BYTES * 8;

/// ORB features: FAST-9 corners, intensity-centroid orientation and
/// steered BRIEF descriptors
pub struct OrbExtractor {
    pub fast_threshold: u8,
    pub max_keypoints: usize,
    pub patch_size: u32,
    pub blur_sigma: f32,
    pub nms_radius: f32,
    pattern: Vec<(i32, i32, i32, i32)>,
}

impl Default for OrbExtractor {
    fn default() -> Self {
        Self::from_config(&OrbConfig::default())
    }
}

impl OrbExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &OrbConfig) -> Self {
        Self {
            fast_threshold: config.fast_threshold,
            max_keypoints: config.max_keypoints,
            patch_size: config.patch_size,
            blur_sigma: config.blur_sigma,
            nms_radius: config.nms_radius,
            pattern: brief_pattern(config.patch_size, config.pattern_seed),
        }
    }

    pub fn with_params(threshold: u8, max_keypoints: usize) -> Self {
        let config = OrbConfig {
            fast_threshold: threshold,
            max_keypoints,
            ..OrbConfig::default()
        };
        Self::from_config(&config)
    }

    fn half_patch(&self) -> i32 {
        (self.patch_size / 2) as i32
    }

    fn detect_fast_corners(&self, image: &GrayImage) -> Vec<Keypoint> {
        let margin = self.half_patch() + 1;
        let (width, height) = (image.width() as i32, image.height() as i32);

        let corners = corners_fast9(image, self.fast_threshold)
            .into_iter()
            .filter(|c| {
                let (x, y) = (c.x as i32, c.y as i32);
                x >= margin && y >= margin && x < width - margin && y < height - margin
            })
            .map(|c| Keypoint {
                x: c.x as f32,
                y: c.y as f32,
                response: c.score,
                angle: 0.0,
            })
            .collect();

        self.non_maximum_suppression(corners)
    }

    fn non_maximum_suppression(&self, mut corners: Vec<Keypoint>) -> Vec<Keypoint> {
        if corners.is_empty() {
            return corners;
        }

        // Strongest first; equal responses keep raster order
        corners.sort_by(|a, b| {
            b.response
                .partial_cmp(&a.response)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.y.total_cmp(&b.y))
                .then_with(|| a.x.total_cmp(&b.x))
        });

        let radius_sq = self.nms_radius * self.nms_radius;
        let mut selected: Vec<Keypoint> = Vec::new();

        for corner in corners {
            let suppressed = selected.iter().any(|s| {
                let dx = corner.x - s.x;
                let dy = corner.y - s.y;
                dx * dx + dy * dy < radius_sq
            });

            if !suppressed {
                selected.push(corner);
                if selected.len() >= self.max_keypoints {
                    break;
                }
            }
        }

        selected
    }

    fn compute_keypoint_orientation(&self, image: &GrayImage, x: u32, y: u32) -> f32 {
        let radius = self.half_patch();
        let mut m01 = 0.0f32;
        let mut m10 = 0.0f32;

        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx * dx + dy * dy > radius * radius {
                    continue;
                }
                let intensity = image.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)[0] as f32;
                m01 += intensity * dy as f32;
                m10 += intensity * dx as f32;
            }
        }

        m01.atan2(m10)
    }

    fn compute_brief_descriptor(&self, image: &GrayImage, keypoint: &Keypoint) -> [u8; DESCRIPTOR_BYTES] {
        let mut descriptor = [0u8; DESCRIPTOR_BYTES];
        let x = keypoint.x as i32;
        let y = keypoint.y as i32;
        let (sin_angle, cos_angle) = keypoint.angle.sin_cos();

        let steer = |dx: i32, dy: i32| -> (u32, u32) {
            let rx = (dx as f32 * cos_angle - dy as f32 * sin_angle).round() as i32;
            let ry = (dx as f32 * sin_angle + dy as f32 * cos_angle).round() as i32;
            ((x + rx) as u32, (y + ry) as u32)
        };

        for (byte_idx, byte_tests) in self.pattern.chunks(8).enumerate() {
            let mut byte_val = 0u8;

            for (bit_idx, &(dx1, dy1, dx2, dy2)) in byte_tests.iter().enumerate() {
                let (p1_x, p1_y) = steer(dx1, dy1);
                let (p2_x, p2_y) = steer(dx2, dy2);

                if image.get_pixel(p1_x, p1_y)[0] < image.get_pixel(p2_x, p2_y)[0] {
                    byte_val |= 1 << bit_idx;
                }
            }

            descriptor[byte_idx] = byte_val;
        }

        descriptor
    }
}

impl FeatureExtractor for OrbExtractor {
    fn name(&self) -> &'static str {
        "ORB"
    }

    fn extract(&self, image: &GrayImage) -> crate::Result<Features> {
        let start = Instant::now();

        if image.width() < self.patch_size || image.height() < self.patch_size {
            log::debug!(
                "image {}x{} smaller than ORB patch, no features",
                image.width(),
                image.height()
            );
            return Ok(Features::empty());
        }

        let mut keypoints = self.detect_fast_corners(image);

        let smoothed = if self.blur_sigma > 0.0 {
            gaussian_blur_f32(image, self.blur_sigma)
        } else {
            image.clone()
        };

        for keypoint in &mut keypoints {
            keypoint.angle =
                self.compute_keypoint_orientation(&smoothed, keypoint.x as u32, keypoint.y as u32);
        }

        let rows: Vec<[u8; DESCRIPTOR_BYTES]> = keypoints
            .par_iter()
            .map(|kp| self.compute_brief_descriptor(&smoothed, kp))
            .collect();

        let descriptors = Array2::from_shape_vec((rows.len(), DESCRIPTOR_BYTES), rows.concat())?;

        log::debug!(
            "ORB found {} keypoints in {}x{} image ({:.2} ms)",
            keypoints.len(),
            image.width(),
            image.height(),
            start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(Features::new(keypoints, Descriptors::Binary(descriptors)))
    }
}

/// Fixed pseudo-random test pairs inside the patch disk
fn brief_pattern(patch_size: u32, seed: u64) -> Vec<(i32, i32, i32, i32)> {
    let half = (patch_size / 2) as i32;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut sample = || loop {
        let dx = rng.gen_range(-half..=half);
        let dy = rng.gen_range(-half..=half);
        if dx * dx + dy * dy <= half * half {
            return (dx, dy);
        }
    };

    (0..DESCRIPTOR_BITS)
        .map(|_| {
            let (x1, y1) = sample();
            let (x2, y2) = sample();
            (x1, y1, x2, y2)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_is_deterministic_and_inside_patch() {
        let a = brief_pattern(31, 7);
        let b = brief_pattern(31, 7);
        assert_eq!(a, b);
        assert_eq!(a.len(), DESCRIPTOR_BITS);
        assert!(a
            .iter()
            .all(|&(x1, y1, x2, y2)| x1 * x1 + y1 * y1 <= 225 && x2 * x2 + y2 * y2 <= 225));
    }

    #[test]
    fn test_nms_keeps_strongest() {
        let orb = OrbExtractor::default();
        let corners = vec![
            Keypoint { x: 10.0, y: 10.0, response: 5.0, angle: 0.0 },
            Keypoint { x: 11.0, y: 10.0, response: 9.0, angle: 0.0 },
            Keypoint { x: 40.0, y: 40.0, response: 1.0, angle: 0.0 },
        ];
        let kept = orb.non_maximum_suppression(corners);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].response, 9.0);
        assert_eq!(kept[1].x, 40.0);
    }

    #[test]
    fn test_orientation_points_towards_bright_side() {
        let orb = OrbExtractor::default();
        let image = GrayImage::from_fn(64, 64, |x, _| image::Luma([if x > 32 { 255 } else { 0 }]));
        let angle = orb.compute_keypoint_orientation(&image, 32, 32);
        assert!(angle.abs() < 0.1, "angle {angle}");
    }
}

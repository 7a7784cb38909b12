#![allow(dead_code)]

use image::{GrayImage, Luma};
use nalgebra::{Matrix3, Point2};
use ndarray::Array2;
use planar_tracker::pipeline::{
    DescriptorMatcher, Descriptors, FeatureExtractor, Features, Keypoint, RawMatch,
};
use planar_tracker::utils::geometry::homography_from_corners;
use std::collections::{HashMap, VecDeque};

/// Returns preset features chosen by image size
#[derive(Default)]
pub struct ScriptedExtractor {
    by_size: HashMap<(u32, u32), Features>,
}

impl ScriptedExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, width: u32, height: u32, features: Features) -> Self {
        self.by_size.insert((width, height), features);
        self
    }
}

impl FeatureExtractor for ScriptedExtractor {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn extract(&self, image: &GrayImage) -> planar_tracker::Result<Features> {
        Ok(self
            .by_size
            .get(&image.dimensions())
            .cloned()
            .unwrap_or_default())
    }
}

/// Returns the same raw match list for every call
pub struct ScriptedMatcher(pub Vec<RawMatch>);

impl DescriptorMatcher for ScriptedMatcher {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn match_descriptors(
        &self,
        _query: &Descriptors,
        _train: &Descriptors,
    ) -> planar_tracker::Result<Vec<RawMatch>> {
        Ok(self.0.clone())
    }
}

pub fn features_at(points: &[Point2<f64>]) -> Features {
    let keypoints = points
        .iter()
        .map(|p| Keypoint::new(p.x as f32, p.y as f32))
        .collect();
    Features::new(keypoints, Descriptors::Float(Array2::zeros((points.len(), 4))))
}

/// `cols` x `rows` lattice inset from the image border
pub fn grid_points(width: u32, height: u32, cols: usize, rows: usize) -> Vec<Point2<f64>> {
    let dx = width as f64 / (cols + 1) as f64;
    let dy = height as f64 / (rows + 1) as f64;
    (0..rows)
        .flat_map(|r| (0..cols).map(move |c| Point2::new(dx * (c + 1) as f64, dy * (r + 1) as f64)))
        .collect()
}

/// Identity correspondences with distances cycling through `pattern`
pub fn identity_matches(count: usize, pattern: &[f32]) -> Vec<RawMatch> {
    (0..count)
        .map(|i| RawMatch::new(i, i, pattern[i % pattern.len()]))
        .collect()
}

pub fn homography_for_quad(width: u32, height: u32, quad: [Point2<f64>; 4]) -> Matrix3<f64> {
    let (w, h) = (width as f64, height as f64);
    let src = [
        Point2::new(0.0, 0.0),
        Point2::new(w, 0.0),
        Point2::new(w, h),
        Point2::new(0.0, h),
    ];
    homography_from_corners(&src, &quad).expect("quad must be non-degenerate")
}

const BLOB_THRESHOLD: u8 = 20;
const BLOB_MIN_AREA: usize = 5;

/// Thresholded connected components as features.
///
/// Keypoints are intensity-weighted centroids; the descriptor is the median
/// intensity around the centroid, so blobs match by brightness. Output is
/// sorted by row, then column.
pub struct BlobExtractor;

impl FeatureExtractor for BlobExtractor {
    fn name(&self) -> &'static str {
        "blobs"
    }

    fn extract(&self, image: &GrayImage) -> planar_tracker::Result<Features> {
        let (width, height) = image.dimensions();
        let mut visited = vec![false; (width * height) as usize];
        let mut blobs: Vec<(f64, f64, f32)> = Vec::new();

        for y in 0..height {
            for x in 0..width {
                let idx = (y * width + x) as usize;
                if visited[idx] || image.get_pixel(x, y)[0] <= BLOB_THRESHOLD {
                    continue;
                }

                let mut queue = VecDeque::from([(x, y)]);
                visited[idx] = true;
                let (mut area, mut sum, mut sx, mut sy) = (0usize, 0.0f64, 0.0f64, 0.0f64);

                while let Some((px, py)) = queue.pop_front() {
                    let v = image.get_pixel(px, py)[0] as f64;
                    area += 1;
                    sum += v;
                    sx += v * px as f64;
                    sy += v * py as f64;

                    let neighbours = [
                        (px.wrapping_sub(1), py),
                        (px + 1, py),
                        (px, py.wrapping_sub(1)),
                        (px, py + 1),
                    ];
                    for (nx, ny) in neighbours {
                        if nx >= width || ny >= height {
                            continue;
                        }
                        let n = (ny * width + nx) as usize;
                        if !visited[n] && image.get_pixel(nx, ny)[0] > BLOB_THRESHOLD {
                            visited[n] = true;
                            queue.push_back((nx, ny));
                        }
                    }
                }

                if area >= BLOB_MIN_AREA {
                    let (cx, cy) = (sx / sum, sy / sum);
                    blobs.push((cx, cy, median_around(image, cx, cy)));
                }
            }
        }

        blobs.sort_by(|a, b| {
            (a.1.round() as i64, a.0.round() as i64).cmp(&(b.1.round() as i64, b.0.round() as i64))
        });

        let keypoints = blobs
            .iter()
            .map(|&(x, y, _)| Keypoint::new(x as f32, y as f32))
            .collect();
        let values: Vec<f32> = blobs.iter().map(|b| b.2).collect();
        let descriptors = Array2::from_shape_vec((values.len(), 1), values)?;
        Ok(Features::new(keypoints, Descriptors::Float(descriptors)))
    }
}

fn median_around(image: &GrayImage, cx: f64, cy: f64) -> f32 {
    let (x0, y0) = (cx.round() as i64, cy.round() as i64);
    let mut values = Vec::with_capacity(9);
    for dy in -1..=1 {
        for dx in -1..=1 {
            let x = (x0 + dx).clamp(0, image.width() as i64 - 1) as u32;
            let y = (y0 + dy).clamp(0, image.height() as i64 - 1) as u32;
            values.push(image.get_pixel(x, y)[0]);
        }
    }
    values.sort_unstable();
    values[4] as f32
}

/// Flat disc of radius 5 fading linearly to zero at radius 8
pub fn paint_blob(image: &mut GrayImage, cx: f64, cy: f64, value: u8) {
    let x_range = (cx - 9.0).max(0.0) as u32..((cx + 9.0) as u32).min(image.width());
    for x in x_range {
        let y_range = (cy - 9.0).max(0.0) as u32..((cy + 9.0) as u32).min(image.height());
        for y in y_range {
            let d = ((x as f64 - cx).powi(2) + (y as f64 - cy).powi(2)).sqrt();
            let v = if d <= 5.0 {
                value as f64
            } else if d < 8.0 {
                value as f64 * (8.0 - d) / 3.0
            } else {
                0.0
            };
            let current = image.get_pixel(x, y)[0];
            image.put_pixel(x, y, Luma([current.max(v.round() as u8)]));
        }
    }
}

pub const REFERENCE_SIZE: (u32, u32) = (300, 200);
pub const SCENE_SIZE: (u32, u32) = (400, 320);

/// A reference of paired blobs and a perspective scene of it.
///
/// Each brightness-coded target blob in the reference is followed (in
/// raster order) by a decoy 8 levels brighter that is absent from the scene.
/// The scene instead carries clutter blobs 5 levels below each decoy, so
/// every decoy finds a clearly worse match than the target before it.
pub struct BlobScene {
    pub reference: GrayImage,
    /// Scene content in reference coordinates, before warping
    pub content: GrayImage,
    pub truth: Matrix3<f64>,
    pub truth_corners: [Point2<f64>; 4],
}

impl BlobScene {
    pub fn new() -> Self {
        let (w, h) = REFERENCE_SIZE;
        let mut reference = GrayImage::new(w, h);
        let mut content = GrayImage::new(w, h);

        for r in 0..4u32 {
            for c in 0..6u32 {
                let (x, y) = (25.0 + 50.0 * c as f64, 25.0 + 50.0 * r as f64);
                let k = r * 3 + c / 2;
                let target = (40 + 16 * k) as u8;
                if c % 2 == 0 {
                    paint_blob(&mut reference, x, y, target);
                    paint_blob(&mut content, x, y, target);
                } else {
                    paint_blob(&mut reference, x, y, target + 8);
                }
            }
        }

        for r in 0..3u32 {
            for c in 0..5u32 {
                let j = r * 5 + c;
                let (x, y) = (50.0 + 50.0 * c as f64, 50.0 + 50.0 * r as f64);
                paint_blob(&mut content, x, y, (43 + 16 * (j % 12)) as u8);
            }
        }

        let truth_corners = [
            Point2::new(40.0, 30.0),
            Point2::new(360.0, 45.0),
            Point2::new(350.0, 270.0),
            Point2::new(50.0, 285.0),
        ];
        let truth = homography_for_quad(w, h, truth_corners);

        Self {
            reference,
            content,
            truth,
            truth_corners,
        }
    }

    pub fn scene(&self, noise_sigma: f64, seed: u64) -> GrayImage {
        let (w, h) = SCENE_SIZE;
        let scene = planar_tracker::synthetic::warp_into_scene(&self.content, &self.truth, w, h, 0)
            .expect("truth homography is invertible");
        planar_tracker::synthetic::add_gaussian_noise(&scene, noise_sigma, seed).expect("valid sigma")
    }
}

/// Random grey blocks: dense FAST corners at the block junctions
pub fn textured_reference(width: u32, height: u32, block: u32, seed: u64) -> GrayImage {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let mut rng = StdRng::seed_from_u64(seed);
    let cols = width.div_ceil(block);
    let rows = height.div_ceil(block);
    let levels: Vec<u8> = (0..cols * rows).map(|_| rng.gen_range(20..=235)).collect();

    GrayImage::from_fn(width, height, |x, y| Luma([levels[((y / block) * cols + x / block) as usize]]))
}

/// Near-frontal placement of a 200x150 reference inside a 400x300 scene
pub const TEXTURED_REFERENCE_SIZE: (u32, u32) = (200, 150);
pub const TEXTURED_SCENE_SIZE: (u32, u32) = (400, 300);

pub fn mild_view_corners() -> [Point2<f64>; 4] {
    [
        Point2::new(100.0, 72.0),
        Point2::new(302.0, 78.0),
        Point2::new(297.0, 226.0),
        Point2::new(97.0, 222.0),
    ]
}

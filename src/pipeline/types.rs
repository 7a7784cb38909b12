use image::GrayImage;
use nalgebra::{Matrix3, Point2, Vector3};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// A detected interest point in image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub response: f32,
    /// Orientation in radians
    pub angle: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            response: 0.0,
            angle: 0.0,
        }
    }

    pub fn point(&self) -> Point2<f64> {
        Point2::new(self.x as f64, self.y as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    /// Bit strings compared with Hamming distance
    Binary,
    /// Real vectors compared with Euclidean distance
    Float,
}

/// Descriptor matrix, one row per keypoint
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptors {
    Binary(Array2<u8>),
    Float(Array2<f32>),
}

impl Default for Descriptors {
    fn default() -> Self {
        Descriptors::Binary(Array2::zeros((0, 32)))
    }
}

impl Descriptors {
    /// Number of descriptor rows
    pub fn len(&self) -> usize {
        match self {
            Descriptors::Binary(m) => m.nrows(),
            Descriptors::Float(m) => m.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Length of a single descriptor (bytes for binary, components for float)
    pub fn width(&self) -> usize {
        match self {
            Descriptors::Binary(m) => m.ncols(),
            Descriptors::Float(m) => m.ncols(),
        }
    }

    pub fn kind(&self) -> DescriptorKind {
        match self {
            Descriptors::Binary(_) => DescriptorKind::Binary,
            Descriptors::Float(_) => DescriptorKind::Float,
        }
    }
}

/// Keypoints and their descriptors, aligned 1:1
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Features {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Descriptors,
}

impl Features {
    pub fn new(keypoints: Vec<Keypoint>, descriptors: Descriptors) -> Self {
        Self {
            keypoints,
            descriptors,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    pub fn is_consistent(&self) -> bool {
        self.keypoints.len() == self.descriptors.len()
    }
}

/// One nearest-neighbour correspondence as produced by a matcher.
///
/// `query_idx` indexes the reference features and `train_idx` the scene
/// features when produced by the tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawMatch {
    pub query_idx: usize,
    pub train_idx: usize,
    pub distance: f32,
}

impl RawMatch {
    pub fn new(query_idx: usize, train_idx: usize, distance: f32) -> Self {
        Self {
            query_idx,
            train_idx,
            distance,
        }
    }
}

/// The trained planar target: image size plus its features.
#[derive(Debug, Clone)]
pub struct ReferenceModel {
    width: u32,
    height: u32,
    features: Features,
}

impl ReferenceModel {
    pub fn new(width: u32, height: u32, features: Features) -> Self {
        Self {
            width,
            height,
            features,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn features(&self) -> &Features {
        &self.features
    }

    pub fn keypoints(&self) -> &[Keypoint] {
        &self.features.keypoints
    }

    pub fn descriptors(&self) -> &Descriptors {
        &self.features.descriptors
    }
}

/// The most recently analyzed frame and its features
#[derive(Debug, Clone)]
pub struct SceneObservation {
    frame: GrayImage,
    features: Features,
}

impl SceneObservation {
    pub fn new(frame: GrayImage, features: Features) -> Self {
        Self { frame, features }
    }

    pub fn frame(&self) -> &GrayImage {
        &self.frame
    }

    pub fn features(&self) -> &Features {
        &self.features
    }

    pub fn keypoints(&self) -> &[Keypoint] {
        &self.features.keypoints
    }

    pub fn descriptors(&self) -> &Descriptors {
        &self.features.descriptors
    }
}

/// Filtered correspondences between the reference model and the current scene
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchSet {
    matches: Vec<RawMatch>,
}

impl MatchSet {
    pub fn new(matches: Vec<RawMatch>) -> Self {
        Self { matches }
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn clear(&mut self) {
        self.matches.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RawMatch> {
        self.matches.iter()
    }

    pub fn as_slice(&self) -> &[RawMatch] {
        &self.matches
    }
}

/// Pinhole camera calibration (no distortion)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Default for CameraIntrinsics {
    fn default() -> Self {
        Self {
            fx: 600.0,
            fy: 600.0,
            cx: 320.0,
            cy: 240.0,
        }
    }
}

impl CameraIntrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Intrinsics with the principal point at the image centre
    pub fn centered(focal: f64, width: u32, height: u32) -> Self {
        Self::new(focal, focal, width as f64 / 2.0, height as f64 / 2.0)
    }

    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    pub fn from_matrix(k: &Matrix3<f64>) -> Self {
        Self::new(k[(0, 0)], k[(1, 1)], k[(0, 2)], k[(1, 2)])
    }

    /// Vertical field of view in radians, for configuring an overlay camera
    pub fn vertical_fov(&self) -> f64 {
        2.0 * (self.cy / self.fy).atan()
    }

    pub fn is_valid(&self) -> bool {
        self.fx.is_finite() && self.fy.is_finite() && self.fx > 0.0 && self.fy > 0.0
    }
}

/// Raw pose estimator output: Rodrigues rotation vector and translation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseSolution {
    pub rotation: Vector3<f64>,
    pub translation: Vector3<f64>,
}

/// Plane pose in the overlay coordinate convention
/// (y axis up, angles in degrees).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vector3<f64>,
    pub angles_deg: Vector3<f64>,
}

/// Projected reference rectangle, ordered top-left, top-right,
/// bottom-right, bottom-left
pub type Corners = [Point2<f64>; 4];

pub type PixelCorners = [Point2<i32>; 4];

/// Everything a successful `extract` produces for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    /// Reference-to-scene homography, refined when refinement succeeded
    pub homography: Matrix3<f64>,
    pub corners: Corners,
    pub pixel_corners: PixelCorners,
    pub pose: Pose,
    /// Rotation vector as returned by the pose estimator
    pub rotation: Vector3<f64>,
    /// Translation as returned by the pose estimator
    pub translation: Vector3<f64>,
    /// Filtered matches used for the first homography
    pub match_count: usize,
    /// Number of warp-and-reanalyze passes folded into `homography`
    pub refinement_levels: u32,
}

/// Serializable per-frame summary for reports and logs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingReport {
    pub tracked: bool,
    pub corners: Option<[[i32; 2]; 4]>,
    pub position: Option<[f64; 3]>,
    pub angles_deg: Option<[f64; 3]>,
    pub homography: Option<[[f64; 3]; 3]>,
    pub match_count: usize,
    pub refinement_levels: u32,
    pub processing_time_ms: f64,
    pub failure: Option<String>,
}

impl TrackingReport {
    pub fn lost(failure: Option<String>, processing_time_ms: f64) -> Self {
        Self {
            tracked: false,
            corners: None,
            position: None,
            angles_deg: None,
            homography: None,
            match_count: 0,
            refinement_levels: 0,
            processing_time_ms,
            failure,
        }
    }

    pub fn from_extraction(extraction: &Extraction, processing_time_ms: f64) -> Self {
        let h = &extraction.homography;
        let mut homography = [[0.0; 3]; 3];
        for (r, row) in homography.iter_mut().enumerate() {
            for (c, value) in row.iter_mut().enumerate() {
                *value = h[(r, c)];
            }
        }
        let corners = extraction.pixel_corners.map(|p| [p.x, p.y]);
        let p = extraction.pose.position;
        let a = extraction.pose.angles_deg;

        Self {
            tracked: true,
            corners: Some(corners),
            position: Some([p.x, p.y, p.z]),
            angles_deg: Some([a.x, a.y, a.z]),
            homography: Some(homography),
            match_count: extraction.match_count,
            refinement_levels: extraction.refinement_levels,
            processing_time_ms,
            failure: None,
        }
    }
}

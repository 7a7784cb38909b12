use crate::pipeline::types::{CameraIntrinsics, Descriptors, Features, PoseSolution, RawMatch};
use crate::Result;
use image::GrayImage;
use nalgebra::{Matrix3, Point2, Point3};

/// Detects keypoints and computes one descriptor per keypoint
pub trait FeatureExtractor: Send + Sync {
    /// Returns the name of the extractor
    fn name(&self) -> &'static str;

    /// Extract features from a grayscale image.
    ///
    /// Blank or low-texture input must yield empty features, not an error.
    fn extract(&self, image: &GrayImage) -> Result<Features>;
}

/// Nearest-neighbour descriptor matching
pub trait DescriptorMatcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// One match per query row against the train rows.
    ///
    /// The returned order is significant to the tracker's match filter and
    /// must be reproducible for identical inputs.
    fn match_descriptors(&self, query: &Descriptors, train: &Descriptors) -> Result<Vec<RawMatch>>;
}

/// Outlier-robust projective transform fitting
pub trait HomographyEstimator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Estimate `H` with `dst ~ H * src`. Requires at least 4 pairs.
    fn estimate(&self, src: &[Point2<f64>], dst: &[Point2<f64>]) -> Result<Matrix3<f64>>;
}

/// Perspective-n-point solver
pub trait PoseEstimator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Solve the pose mapping `model` points into the camera so that they
    /// project onto `image` points.
    fn solve(
        &self,
        model: &[Point3<f64>],
        image: &[Point2<f64>],
        intrinsics: &CameraIntrinsics,
    ) -> Result<PoseSolution>;
}

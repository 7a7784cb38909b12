//! Planar target tracker
//!
//! `train` builds the reference model once, then every frame goes through
//! `analyze` (features and filtered matches) and `extract` (homography,
//! optional warp-and-reanalyze refinement, corners and pose). Each frame is
//! an independent attempt; nothing but the latest scene is retained.

pub mod filter;
pub mod pose;
pub mod projection;

use crate::algorithms::{BruteForceMatcher, OrbExtractor, PlanarPoseEstimator, RansacHomography};
use crate::config::{Backend, Config, TrackerConfig};
use crate::pipeline::{
    CameraIntrinsics, DescriptorMatcher, Extraction, FeatureExtractor, Features, HomographyEstimator,
    MatchSet, PixelCorners, PoseEstimator, ReferenceModel, SceneObservation,
};
use crate::utils::image_conversion::{is_empty_image, to_grayscale, warp_perspective_inverse};
use image::{DynamicImage, GrayImage};
use nalgebra::{Matrix3, Point2, Vector3};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why an `extract` call produced nothing
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractFailure {
    #[error("no reference model has been trained")]
    Untrained,
    #[error("too few filtered matches: {count}")]
    TooFewMatches { count: usize },
    #[error("reference has {reference} keypoints, scene only {scene}")]
    KeypointGate { reference: usize, scene: usize },
    #[error("homography estimation failed: {0}")]
    Homography(String),
    #[error("projected corners are not finite")]
    DegenerateProjection,
    #[error("pose estimation failed: {0}")]
    Pose(String),
}

impl ExtractFailure {
    /// Short stable name for metrics and reports
    pub fn label(&self) -> &'static str {
        match self {
            ExtractFailure::Untrained => "untrained",
            ExtractFailure::TooFewMatches { .. } => "too_few_matches",
            ExtractFailure::KeypointGate { .. } => "keypoint_gate",
            ExtractFailure::Homography(_) => "homography",
            ExtractFailure::DegenerateProjection => "degenerate_projection",
            ExtractFailure::Pose(_) => "pose",
        }
    }
}

/// Tracks one trained planar reference through a stream of frames.
///
/// Holds the four capabilities, the camera intrinsics, the reference model
/// and the state of the latest analyzed frame.
pub struct Tracker {
    extractor: Box<dyn FeatureExtractor>,
    matcher: Box<dyn DescriptorMatcher>,
    homography: Box<dyn HomographyEstimator>,
    pose: Box<dyn PoseEstimator>,
    intrinsics: CameraIntrinsics,
    config: TrackerConfig,
    reference: Option<ReferenceModel>,
    scene: Option<SceneObservation>,
    matches: MatchSet,
    last_failure: Option<ExtractFailure>,
}

impl Tracker {
    /// Start building a tracker for a camera with the given intrinsics
    pub fn builder(intrinsics: CameraIntrinsics) -> TrackerBuilder {
        TrackerBuilder::new(intrinsics)
    }

    /// Tracker with the backends selected by `config.backend`.
    ///
    /// Falls back to the native backends when OpenCV is requested but
    /// unavailable.
    pub fn from_config(config: &Config) -> Self {
        let builder = TrackerBuilder::new(config.camera).config(config.tracker.clone());
        match config.backend {
            Backend::Native => Self::native_backends(builder, config).build(),
            Backend::Opencv => Self::opencv_backends(builder, config).build(),
        }
    }

    fn native_backends(builder: TrackerBuilder, config: &Config) -> TrackerBuilder {
        builder
            .extractor(OrbExtractor::from_config(&config.orb))
            .matcher(BruteForceMatcher)
            .homography_estimator(RansacHomography::from_config(&config.ransac))
            .pose_estimator(PlanarPoseEstimator::from_config(&config.pose))
    }

    #[cfg(feature = "opencv")]
    fn opencv_backends(builder: TrackerBuilder, config: &Config) -> TrackerBuilder {
        use crate::algorithms::opencv_backend::{
            OpenCVBruteForceMatcher, OpenCVHomography, OpenCVOrbExtractor, OpenCVPnp,
        };

        match OpenCVOrbExtractor::from_config(&config.orb) {
            Ok(extractor) => builder
                .extractor(extractor)
                .matcher(OpenCVBruteForceMatcher)
                .homography_estimator(OpenCVHomography::from_config(&config.ransac))
                .pose_estimator(OpenCVPnp),
            Err(e) => {
                warn!(error = %e, "OpenCV ORB unavailable, using native backends");
                Self::native_backends(builder, config)
            }
        }
    }

    #[cfg(not(feature = "opencv"))]
    fn opencv_backends(builder: TrackerBuilder, config: &Config) -> TrackerBuilder {
        warn!("built without the `opencv` feature, using native backends");
        Self::native_backends(builder, config)
    }

    /// Names of the extractor, matcher, homography and pose backends, in that order
    pub fn backend_names(&self) -> [&'static str; 4] {
        [
            self.extractor.name(),
            self.matcher.name(),
            self.homography.name(),
            self.pose.name(),
        ]
    }

    /// True once `train` has been called, even with a featureless image
    pub fn is_trained(&self) -> bool {
        self.reference.is_some()
    }

    /// Model built by the latest `train`
    pub fn reference(&self) -> Option<&ReferenceModel> {
        self.reference.as_ref()
    }

    /// Latest analyzed frame; after refinement, the last warped frame
    pub fn scene(&self) -> Option<&SceneObservation> {
        self.scene.as_ref()
    }

    /// Filtered matches of the latest `analyze`
    pub fn matches(&self) -> &MatchSet {
        &self.matches
    }

    /// Camera intrinsics used for pose recovery
    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    /// Filter, gate and refinement settings
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Reason the most recent `extract` failed, `None` after a success
    pub fn last_failure(&self) -> Option<&ExtractFailure> {
        self.last_failure.as_ref()
    }

    fn features_of(&self, image: &GrayImage) -> Features {
        if is_empty_image(image) {
            return Features::empty();
        }
        match self.extractor.extract(image) {
            Ok(features) if features.is_consistent() => features,
            Ok(features) => {
                warn!(
                    extractor = self.extractor.name(),
                    keypoints = features.keypoints.len(),
                    descriptors = features.descriptors.len(),
                    "keypoints and descriptors disagree, discarding"
                );
                Features::empty()
            }
            Err(e) => {
                warn!(extractor = self.extractor.name(), error = %e, "feature extraction failed");
                Features::empty()
            }
        }
    }

    /// Replace the reference model with features of `image`
    pub fn train(&mut self, image: &DynamicImage) {
        self.train_gray(&to_grayscale(image));
    }

    /// [`Tracker::train`] for an already grayscale image
    pub fn train_gray(&mut self, image: &GrayImage) {
        let features = self.features_of(image);
        info!(
            width = image.width(),
            height = image.height(),
            keypoints = features.len(),
            "reference trained"
        );

        self.reference = Some(ReferenceModel::new(image.width(), image.height(), features));
        // old matches index the previous reference
        self.matches.clear();
    }

    /// Replace the scene with `frame` and rebuild the match set
    pub fn analyze(&mut self, frame: &DynamicImage) {
        self.analyze_gray(to_grayscale(frame));
    }

    /// [`Tracker::analyze`] for an already grayscale frame, taking ownership
    pub fn analyze_gray(&mut self, frame: GrayImage) {
        self.matches.clear();

        let features = self.features_of(&frame);
        let frame_empty = is_empty_image(&frame);
        let scene = self.scene.insert(SceneObservation::new(frame, features));

        let Some(reference) = self.reference.as_ref() else {
            return;
        };
        if frame_empty || reference.descriptors().len() <= 3 || scene.descriptors().len() <= 3 {
            debug!(
                reference_descriptors = reference.descriptors().len(),
                scene_descriptors = scene.descriptors().len(),
                "not enough descriptors to match"
            );
            return;
        }

        let raw = match self
            .matcher
            .match_descriptors(reference.descriptors(), scene.descriptors())
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(matcher = self.matcher.name(), error = %e, "matching failed");
                return;
            }
        };

        if !filter::indices_valid(&raw, reference.keypoints().len(), scene.keypoints().len()) {
            warn!(matcher = self.matcher.name(), "matcher returned out-of-range indices, dropping all");
            return;
        }

        let kept = filter::adjacency_filter(&raw, self.config.match_ratio, self.config.min_matches);
        debug!(
            scene_keypoints = scene.keypoints().len(),
            raw = raw.len(),
            kept = kept.len(),
            "frame analyzed"
        );
        self.matches = MatchSet::new(kept);
    }

    /// Homography, corners and pose for the current scene.
    ///
    /// With `refine_depth > 0` the scene is warped back into the reference
    /// frame and re-analyzed up to that many times, composing each
    /// successful correction into the result. A failed pass ends
    /// refinement and keeps what was accumulated so far.
    pub fn extract(&mut self, refine_depth: u32) -> Option<Extraction> {
        let depth = if refine_depth > self.config.max_refine_depth {
            warn!(
                requested = refine_depth,
                max = self.config.max_refine_depth,
                "refine depth clamped"
            );
            self.config.max_refine_depth
        } else {
            refine_depth
        };

        match self.try_extract(depth) {
            Ok(extraction) => {
                self.last_failure = None;
                Some(extraction)
            }
            Err(failure) => {
                debug!(reason = failure.label(), %failure, "extract failed");
                self.last_failure = Some(failure);
                None
            }
        }
    }

    /// Out-parameter form of [`Tracker::extract`]; outputs are untouched on failure
    pub fn extract_into(
        &mut self,
        homography: &mut Matrix3<f64>,
        corners: Option<&mut PixelCorners>,
        position: Option<&mut Vector3<f64>>,
        angles: Option<&mut Vector3<f64>>,
        refine_depth: u32,
    ) -> bool {
        let Some(extraction) = self.extract(refine_depth) else {
            return false;
        };

        *homography = extraction.homography;
        if let Some(corners) = corners {
            *corners = extraction.pixel_corners;
        }
        if let Some(position) = position {
            *position = extraction.pose.position;
        }
        if let Some(angles) = angles {
            *angles = extraction.pose.angles_deg;
        }
        true
    }

    fn try_extract(&mut self, depth: u32) -> Result<Extraction, ExtractFailure> {
        let (width, height) = match self.reference.as_ref() {
            Some(reference) => (reference.width(), reference.height()),
            None => return Err(ExtractFailure::Untrained),
        };

        let mut level_h = self.estimate_current()?;
        let match_count = self.matches.len();
        let mut total = level_h;
        let mut corners = projection::project_corners(&total, width, height)
            .ok_or(ExtractFailure::DegenerateProjection)?;

        let mut levels = 0;
        while levels < depth {
            let _span = tracing::debug_span!("refine", level = levels + 1).entered();

            let Some(scene) = self.scene.as_ref() else {
                break;
            };
            let warped = match warp_perspective_inverse(scene.frame(), &level_h, width, height) {
                Ok(warped) => warped,
                Err(e) => {
                    debug!(error = %e, "refinement warp failed");
                    break;
                }
            };

            self.analyze_gray(warped);
            let correction = match self.estimate_current() {
                Ok(h) => h,
                Err(failure) => {
                    debug!(reason = failure.label(), "refinement stopped");
                    break;
                }
            };

            let candidate = total * correction;
            let Some(refined) = projection::project_corners(&candidate, width, height) else {
                debug!("refined corners degenerate, keeping previous level");
                break;
            };

            total = candidate;
            corners = refined;
            level_h = correction;
            levels += 1;
        }

        let model = projection::model_corners(width, height);
        let solution = self
            .pose
            .solve(&model, &corners, &self.intrinsics)
            .map_err(|e| ExtractFailure::Pose(format!("{e:#}")))?;

        Ok(Extraction {
            homography: total,
            corners,
            pixel_corners: projection::round_corners(&corners),
            pose: pose::to_overlay_pose(&solution),
            rotation: solution.rotation,
            translation: solution.translation,
            match_count,
            refinement_levels: levels,
        })
    }

    /// Homography from the current match set, after the extraction gates
    fn estimate_current(&self) -> Result<Matrix3<f64>, ExtractFailure> {
        let reference = self.reference.as_ref().ok_or(ExtractFailure::Untrained)?;
        let count = self.matches.len();
        if count <= self.config.min_matches {
            return Err(ExtractFailure::TooFewMatches { count });
        }
        let scene = self
            .scene
            .as_ref()
            .ok_or(ExtractFailure::TooFewMatches { count: 0 })?;

        let reference_kp = reference.keypoints().len();
        let scene_kp = scene.keypoints().len();
        if self.config.require_scene_keypoint_surplus && reference_kp >= scene_kp {
            return Err(ExtractFailure::KeypointGate {
                reference: reference_kp,
                scene: scene_kp,
            });
        }

        let (src, dst): (Vec<Point2<f64>>, Vec<Point2<f64>>) = self
            .matches
            .iter()
            .map(|m| {
                (
                    reference.keypoints()[m.query_idx].point(),
                    scene.keypoints()[m.train_idx].point(),
                )
            })
            .unzip();

        let h = self
            .homography
            .estimate(&src, &dst)
            .map_err(|e| ExtractFailure::Homography(format!("{e:#}")))?;
        if !h.iter().all(|v| v.is_finite()) {
            return Err(ExtractFailure::Homography("non-finite transform".to_string()));
        }
        Ok(h)
    }
}

/// Assembles a [`Tracker`] from swappable capabilities
pub struct TrackerBuilder {
    intrinsics: CameraIntrinsics,
    config: TrackerConfig,
    extractor: Option<Box<dyn FeatureExtractor>>,
    matcher: Option<Box<dyn DescriptorMatcher>>,
    homography: Option<Box<dyn HomographyEstimator>>,
    pose: Option<Box<dyn PoseEstimator>>,
}

impl TrackerBuilder {
    /// Builder with default tracker settings and no capabilities chosen yet
    pub fn new(intrinsics: CameraIntrinsics) -> Self {
        Self {
            intrinsics,
            config: TrackerConfig::default(),
            extractor: None,
            matcher: None,
            homography: None,
            pose: None,
        }
    }

    /// Replace the filter, gate and refinement settings
    pub fn config(mut self, config: TrackerConfig) -> Self {
        self.config = config;
        self
    }

    /// Feature extractor used for both the reference and scene frames
    pub fn extractor<E>(mut self, extractor: E) -> Self
    where
        E: FeatureExtractor + 'static,
    {
        self.extractor = Some(Box::new(extractor));
        self
    }

    /// Matcher run with the reference as query and the scene as train set
    pub fn matcher<M>(mut self, matcher: M) -> Self
    where
        M: DescriptorMatcher + 'static,
    {
        self.matcher = Some(Box::new(matcher));
        self
    }

    /// Estimator for the reference-to-scene homography
    pub fn homography_estimator<H>(mut self, estimator: H) -> Self
    where
        H: HomographyEstimator + 'static,
    {
        self.homography = Some(Box::new(estimator));
        self
    }

    /// Solver for the target pose from the projected corners
    pub fn pose_estimator<P>(mut self, estimator: P) -> Self
    where
        P: PoseEstimator + 'static,
    {
        self.pose = Some(Box::new(estimator));
        self
    }

    /// Build the tracker; unset capabilities get the native defaults
    pub fn build(self) -> Tracker {
        let tracker = Tracker {
            extractor: self.extractor.unwrap_or_else(|| Box::new(OrbExtractor::default())),
            matcher: self.matcher.unwrap_or_else(|| Box::new(BruteForceMatcher)),
            homography: self.homography.unwrap_or_else(|| Box::new(RansacHomography::default())),
            pose: self.pose.unwrap_or_else(|| Box::new(PlanarPoseEstimator::default())),
            intrinsics: self.intrinsics,
            config: self.config,
            reference: None,
            scene: None,
            matches: MatchSet::default(),
            last_failure: None,
        };
        debug!(
            extractor = tracker.extractor.name(),
            matcher = tracker.matcher.name(),
            homography = tracker.homography.name(),
            pose = tracker.pose.name(),
            "tracker built"
        );
        tracker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Descriptors, Keypoint, RawMatch};
    use ndarray::Array2;

    /// Returns the same features for every image
    struct FixedExtractor(Features);

    impl FeatureExtractor for FixedExtractor {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn extract(&self, _image: &GrayImage) -> crate::Result<Features> {
            Ok(self.0.clone())
        }
    }

    struct FixedMatcher(Vec<RawMatch>);

    impl DescriptorMatcher for FixedMatcher {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn match_descriptors(&self, _q: &Descriptors, _t: &Descriptors) -> crate::Result<Vec<RawMatch>> {
            Ok(self.0.clone())
        }
    }

    fn features(n: usize) -> Features {
        let keypoints = (0..n).map(|i| Keypoint::new(i as f32 * 3.0, (i % 5) as f32 * 7.0)).collect();
        Features::new(keypoints, Descriptors::Float(Array2::zeros((n, 2))))
    }

    #[test]
    fn test_untrained_extract_fails() {
        let mut tracker = Tracker::builder(CameraIntrinsics::default()).build();
        assert!(!tracker.is_trained());
        assert!(tracker.extract(0).is_none());
        assert_eq!(tracker.last_failure(), Some(&ExtractFailure::Untrained));
    }

    #[test]
    fn test_out_of_range_matches_are_dropped() {
        let raw = vec![
            RawMatch::new(0, 0, 1.0),
            RawMatch::new(1, 1, 10.0),
            RawMatch::new(2, 2, 1.0),
            RawMatch::new(3, 99, 10.0),
            RawMatch::new(4, 4, 1.0),
        ];
        let mut tracker = Tracker::builder(CameraIntrinsics::default())
            .extractor(FixedExtractor(features(6)))
            .matcher(FixedMatcher(raw))
            .build();

        tracker.train_gray(&GrayImage::new(20, 20));
        tracker.analyze_gray(GrayImage::new(20, 20));
        assert!(tracker.matches().is_empty());
    }

    #[test]
    fn test_empty_frame_clears_matches() {
        let raw: Vec<_> = (0..8)
            .map(|i| RawMatch::new(i, i, if i % 2 == 0 { 1.0 } else { 10.0 }))
            .collect();
        let mut tracker = Tracker::builder(CameraIntrinsics::default())
            .extractor(FixedExtractor(features(8)))
            .matcher(FixedMatcher(raw))
            .build();

        tracker.train_gray(&GrayImage::new(20, 20));
        tracker.analyze_gray(GrayImage::new(20, 20));
        assert_eq!(tracker.matches().len(), 4);

        tracker.analyze_gray(GrayImage::new(0, 0));
        assert!(tracker.matches().is_empty());
        assert!(tracker.scene().unwrap().keypoints().is_empty());
    }

    #[test]
    fn test_refine_depth_is_clamped() {
        let config = TrackerConfig {
            max_refine_depth: 1,
            ..TrackerConfig::default()
        };
        let mut tracker = Tracker::builder(CameraIntrinsics::default()).config(config).build();
        // still fails (untrained), but must not loop past the clamp
        assert!(tracker.extract(u32::MAX).is_none());
    }

    #[test]
    fn test_from_config_uses_native_backends() {
        let tracker = Tracker::from_config(&Config::default());
        assert_eq!(tracker.backend_names(), ["ORB", "BruteForce", "RANSAC-DLT", "PlanarLM"]);
    }

    #[cfg(not(feature = "opencv"))]
    #[test]
    fn test_opencv_request_without_feature_falls_back() {
        let config = Config {
            backend: Backend::Opencv,
            ..Config::default()
        };
        let tracker = Tracker::from_config(&config);
        assert_eq!(tracker.backend_names()[0], "ORB");
    }

    #[test]
    fn test_failure_labels() {
        assert_eq!(ExtractFailure::TooFewMatches { count: 2 }.label(), "too_few_matches");
        assert_eq!(
            ExtractFailure::KeypointGate { reference: 5, scene: 5 }.to_string(),
            "reference has 5 keypoints, scene only 5"
        );
    }
}

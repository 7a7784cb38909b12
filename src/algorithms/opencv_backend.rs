//! OpenCV implementations of the tracker capabilities (feature `opencv`)

use crate::config::{OrbConfig, RansacConfig};
use crate::pipeline::{
    CameraIntrinsics, DescriptorMatcher, Descriptors, FeatureExtractor, Features, HomographyEstimator,
    Keypoint, PoseEstimator, PoseSolution, RawMatch,
};
use crate::Result;
use anyhow::bail;
use image::GrayImage;
use nalgebra::{Matrix3, Point2, Point3, Vector3};
use ndarray::Array2;
use opencv::core::{no_array, DMatch, KeyPoint, Mat, Point2f, Point3f, Ptr, Vector};
use opencv::features2d::{BFMatcher, ORB_ScoreType, ORB};
use opencv::prelude::*;
use parking_lot::Mutex;

/// Convert a GrayImage to an OpenCV Mat
pub fn grayimage_to_mat(image: &GrayImage) -> Result<Mat> {
    let (width, height) = image.dimensions();
    let mut mat = Mat::zeros(height as i32, width as i32, opencv::core::CV_8UC1)?.to_mat()?;

    for (x, y, pixel) in image.enumerate_pixels() {
        *mat.at_2d_mut::<u8>(y as i32, x as i32)? = pixel[0];
    }

    Ok(mat)
}

fn descriptors_from_mat(mat: &Mat) -> Result<Descriptors> {
    let rows = mat.rows().max(0) as usize;
    let cols = mat.cols().max(0) as usize;

    if mat.typ() == opencv::core::CV_32F {
        let mut out = Array2::<f32>::zeros((rows, cols));
        for ((r, c), value) in out.indexed_iter_mut() {
            *value = *mat.at_2d::<f32>(r as i32, c as i32)?;
        }
        Ok(Descriptors::Float(out))
    } else {
        let mut out = Array2::<u8>::zeros((rows, cols));
        for ((r, c), value) in out.indexed_iter_mut() {
            *value = *mat.at_2d::<u8>(r as i32, c as i32)?;
        }
        Ok(Descriptors::Binary(out))
    }
}

fn descriptors_to_mat(descriptors: &Descriptors) -> Result<Mat> {
    let rows = descriptors.len() as i32;
    let cols = descriptors.width() as i32;
    match descriptors {
        Descriptors::Binary(m) => {
            let mut mat = Mat::zeros(rows, cols, opencv::core::CV_8UC1)?.to_mat()?;
            for ((r, c), value) in m.indexed_iter() {
                *mat.at_2d_mut::<u8>(r as i32, c as i32)? = *value;
            }
            Ok(mat)
        }
        Descriptors::Float(m) => {
            let mut mat = Mat::zeros(rows, cols, opencv::core::CV_32FC1)?.to_mat()?;
            for ((r, c), value) in m.indexed_iter() {
                *mat.at_2d_mut::<f32>(r as i32, c as i32)? = *value;
            }
            Ok(mat)
        }
    }
}

fn to_point2f(points: &[Point2<f64>]) -> Vector<Point2f> {
    points
        .iter()
        .map(|p| Point2f::new(p.x as f32, p.y as f32))
        .collect()
}

/// ORB extractor backed by `cv::ORB`
pub struct OpenCVOrbExtractor {
    detector: Mutex<Ptr<ORB>>,
}

// SAFETY: the detector is only touched through the mutex
unsafe impl Send for OpenCVOrbExtractor {}
unsafe impl Sync for OpenCVOrbExtractor {}

impl OpenCVOrbExtractor {
    pub fn from_config(config: &OrbConfig) -> Result<Self> {
        let detector = ORB::create(
            config.max_keypoints as i32,
            1.2,
            8,
            config.patch_size as i32,
            0,
            2,
            ORB_ScoreType::HARRIS_SCORE,
            config.patch_size as i32,
            config.fast_threshold as i32,
        )?;

        Ok(Self {
            detector: Mutex::new(detector),
        })
    }
}

impl FeatureExtractor for OpenCVOrbExtractor {
    fn name(&self) -> &'static str {
        "OpenCV-ORB"
    }

    fn extract(&self, image: &GrayImage) -> Result<Features> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Features::empty());
        }

        let mat = grayimage_to_mat(image)?;
        let mut keypoints = Vector::<KeyPoint>::new();
        let mut descriptors = Mat::default();

        self.detector.lock().detect_and_compute(
            &mat,
            &no_array(),
            &mut keypoints,
            &mut descriptors,
            false,
        )?;

        let keypoints: Vec<Keypoint> = keypoints
            .iter()
            .map(|kp| Keypoint {
                x: kp.pt().x,
                y: kp.pt().y,
                response: kp.response(),
                angle: kp.angle().to_radians(),
            })
            .collect();

        if keypoints.is_empty() {
            return Ok(Features::empty());
        }

        let descriptors = descriptors_from_mat(&descriptors)?;
        log::debug!("OpenCV ORB found {} keypoints", keypoints.len());
        Ok(Features::new(keypoints, descriptors))
    }
}

/// `cv::BFMatcher` without cross-check, so every query row gets a match
pub struct OpenCVBruteForceMatcher;

impl DescriptorMatcher for OpenCVBruteForceMatcher {
    fn name(&self) -> &'static str {
        "OpenCV-BFMatcher"
    }

    fn match_descriptors(&self, query: &Descriptors, train: &Descriptors) -> Result<Vec<RawMatch>> {
        if query.is_empty() || train.is_empty() {
            return Ok(Vec::new());
        }
        if query.kind() != train.kind() || query.width() != train.width() {
            bail!("incompatible descriptor sets");
        }

        let norm = match query {
            Descriptors::Binary(_) => opencv::core::NORM_HAMMING,
            Descriptors::Float(_) => opencv::core::NORM_L2,
        };
        let matcher = BFMatcher::create(norm, false)?;

        let mut matches = Vector::<DMatch>::new();
        matcher.train_match(
            &descriptors_to_mat(query)?,
            &descriptors_to_mat(train)?,
            &mut matches,
            &no_array(),
        )?;

        Ok(matches
            .iter()
            .map(|m| RawMatch::new(m.query_idx as usize, m.train_idx as usize, m.distance))
            .collect())
    }
}

/// `cv::findHomography` with the RANSAC method
pub struct OpenCVHomography {
    pub reprojection_threshold: f64,
}

impl OpenCVHomography {
    pub fn from_config(config: &RansacConfig) -> Self {
        Self {
            reprojection_threshold: config.inlier_threshold,
        }
    }
}

impl HomographyEstimator for OpenCVHomography {
    fn name(&self) -> &'static str {
        "OpenCV-findHomography"
    }

    fn estimate(&self, src: &[Point2<f64>], dst: &[Point2<f64>]) -> Result<Matrix3<f64>> {
        if src.len() < 4 || src.len() != dst.len() {
            bail!("need at least 4 paired points");
        }

        let mut mask = Mat::default();
        let h = opencv::calib3d::find_homography(
            &to_point2f(src),
            &to_point2f(dst),
            &mut mask,
            opencv::calib3d::RANSAC,
            self.reprojection_threshold,
        )?;
        if h.rows() != 3 || h.cols() != 3 {
            bail!("findHomography returned no model");
        }

        let mut out = Matrix3::zeros();
        for r in 0..3 {
            for c in 0..3 {
                out[(r, c)] = *h.at_2d::<f64>(r as i32, c as i32)?;
            }
        }
        Ok(out)
    }
}

/// `cv::solvePnP` (iterative) without distortion
pub struct OpenCVPnp;

impl PoseEstimator for OpenCVPnp {
    fn name(&self) -> &'static str {
        "OpenCV-solvePnP"
    }

    fn solve(&self, model: &[Point3<f64>], image: &[Point2<f64>], k: &CameraIntrinsics) -> Result<PoseSolution> {
        let object: Vector<Point3f> = model
            .iter()
            .map(|p| Point3f::new(p.x as f32, p.y as f32, p.z as f32))
            .collect();

        let mut camera = Mat::zeros(3, 3, opencv::core::CV_64FC1)?.to_mat()?;
        let km = k.matrix();
        for r in 0..3 {
            for c in 0..3 {
                *camera.at_2d_mut::<f64>(r as i32, c as i32)? = km[(r, c)];
            }
        }

        let mut rvec = Mat::default();
        let mut tvec = Mat::default();
        let solved = opencv::calib3d::solve_pnp(
            &object,
            &to_point2f(image),
            &camera,
            &no_array(),
            &mut rvec,
            &mut tvec,
            false,
            opencv::calib3d::SOLVEPNP_ITERATIVE,
        )?;
        if !solved {
            bail!("solvePnP did not converge");
        }

        let read = |m: &Mat| -> Result<Vector3<f64>> {
            Ok(Vector3::new(
                *m.at_2d::<f64>(0, 0)?,
                *m.at_2d::<f64>(1, 0)?,
                *m.at_2d::<f64>(2, 0)?,
            ))
        };
        Ok(PoseSolution {
            rotation: read(&rvec)?,
            translation: read(&tvec)?,
        })
    }
}

use crate::config::RansacConfig;
use crate::pipeline::HomographyEstimator;
use crate::utils::ransac::estimate_homography_ransac;
use nalgebra::{Matrix3, Point2};

/// Outlier-robust homography: normalized DLT inside seeded RANSAC
#[derive(Debug, Clone, Default)]
pub struct RansacHomography {
    config: RansacConfig,
}

impl RansacHomography {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &RansacConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn config(&self) -> &RansacConfig {
        &self.config
    }
}

impl HomographyEstimator for RansacHomography {
    fn name(&self) -> &'static str {
        "RANSAC-DLT"
    }

    fn estimate(&self, src: &[Point2<f64>], dst: &[Point2<f64>]) -> crate::Result<Matrix3<f64>> {
        let result = estimate_homography_ransac(src, dst, &self.config)?;
        log::debug!(
            "homography from {}/{} inliers after {} iterations",
            result.inliers.len(),
            result.total_pairs,
            result.iterations
        );
        Ok(result.homography)
    }
}

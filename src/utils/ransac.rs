use crate::config::RansacConfig;
use crate::utils::geometry::{has_collinear_triple, homography_dlt, transfer_error_sq};
use crate::Result;
use anyhow::bail;
use nalgebra::{Matrix3, Point2};
use rand::rngs::StdRng;
use rand::SeedableRng;

const SAMPLE_SIZE: usize = 4;

/// Result of RANSAC homography estimation
#[derive(Clone, Debug)]
pub struct RansacResult {
    pub homography: Matrix3<f64>,
    /// Indices of the pairs consistent with `homography`
    pub inliers: Vec<usize>,
    pub iterations: usize,
    pub total_pairs: usize,
}

impl RansacResult {
    pub fn inlier_ratio(&self) -> f64 {
        if self.total_pairs == 0 {
            0.0
        } else {
            self.inliers.len() as f64 / self.total_pairs as f64
        }
    }
}

/// Estimate a homography `dst ~ H * src` with RANSAC over minimal 4-point
/// samples, then refit on the consensus set.
pub fn estimate_homography_ransac(
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
    config: &RansacConfig,
) -> Result<RansacResult> {
    if src.len() != dst.len() {
        bail!("point count mismatch: {} vs {}", src.len(), dst.len());
    }
    let n = src.len();
    if n < SAMPLE_SIZE {
        bail!("need at least {} point pairs, got {}", SAMPLE_SIZE, n);
    }

    let threshold_sq = config.inlier_threshold * config.inlier_threshold;
    let mut rng = StdRng::seed_from_u64(config.seed);

    let mut best: Option<(Matrix3<f64>, Vec<usize>)> = None;
    let mut required_iterations = config.max_iterations;
    let mut iterations = 0;

    while iterations < required_iterations.min(config.max_iterations) {
        iterations += 1;

        let sample = rand::seq::index::sample(&mut rng, n, SAMPLE_SIZE).into_vec();
        let s: Vec<Point2<f64>> = sample.iter().map(|&i| src[i]).collect();
        let d: Vec<Point2<f64>> = sample.iter().map(|&i| dst[i]).collect();
        if has_collinear_triple(&s) || has_collinear_triple(&d) {
            continue;
        }

        let Some(h) = homography_dlt(&s, &d) else {
            continue;
        };

        let inliers = collect_inliers(&h, src, dst, threshold_sq);
        let best_count = best.as_ref().map_or(0, |(_, b)| b.len());
        if inliers.len() > best_count {
            required_iterations = adaptive_iterations(inliers.len(), n, config.confidence);
            best = Some((h, inliers));
        }
    }

    let Some((best_h, best_inliers)) = best else {
        bail!("no non-degenerate sample among {} pairs", n);
    };
    if best_inliers.len() < SAMPLE_SIZE {
        bail!("consensus set too small: {} inliers", best_inliers.len());
    }

    // Least-squares refit on the consensus; keep it only if it does not lose support.
    let (homography, inliers) = match refit(&best_inliers, src, dst) {
        Some(h) => {
            let refit_inliers = collect_inliers(&h, src, dst, threshold_sq);
            if refit_inliers.len() >= best_inliers.len() {
                (h, refit_inliers)
            } else {
                (best_h, best_inliers)
            }
        }
        None => (best_h, best_inliers),
    };

    Ok(RansacResult {
        homography,
        inliers,
        iterations,
        total_pairs: n,
    })
}

fn collect_inliers(
    h: &Matrix3<f64>,
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
    threshold_sq: f64,
) -> Vec<usize> {
    src.iter()
        .zip(dst.iter())
        .enumerate()
        .filter(|(_, (s, d))| transfer_error_sq(h, s, d) <= threshold_sq)
        .map(|(i, _)| i)
        .collect()
}

fn refit(inliers: &[usize], src: &[Point2<f64>], dst: &[Point2<f64>]) -> Option<Matrix3<f64>> {
    let s: Vec<Point2<f64>> = inliers.iter().map(|&i| src[i]).collect();
    let d: Vec<Point2<f64>> = inliers.iter().map(|&i| dst[i]).collect();
    homography_dlt(&s, &d)
}

/// Iterations needed to draw one all-inlier sample with the given confidence
fn adaptive_iterations(inliers: usize, total: usize, confidence: f64) -> usize {
    let ratio = inliers as f64 / total as f64;
    let p_good = ratio.powi(SAMPLE_SIZE as i32);
    if p_good >= 1.0 - f64::EPSILON {
        return 1;
    }
    if p_good <= f64::EPSILON {
        return usize::MAX;
    }
    let k = (1.0 - confidence).ln() / (1.0 - p_good).ln();
    if k.is_finite() {
        k.ceil().max(1.0) as usize
    } else {
        usize::MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::geometry::perspective_transform;

    fn grid() -> Vec<Point2<f64>> {
        (0..6)
            .flat_map(|i| (0..5).map(move |j| Point2::new(10.0 + i as f64 * 37.0, 5.0 + j as f64 * 41.0)))
            .collect()
    }

    #[test]
    fn test_exact_data_recovers_homography() {
        let truth = Matrix3::new(0.9, -0.1, 30.0, 0.08, 1.05, -12.0, 1e-4, 2e-4, 1.0);
        let src = grid();
        let dst = perspective_transform(&truth, &src).unwrap();

        let result = estimate_homography_ransac(&src, &dst, &RansacConfig::default()).unwrap();
        assert_eq!(result.inliers.len(), src.len());
        assert!((result.homography - truth).norm() < 1e-6);
    }

    #[test]
    fn test_outliers_are_rejected() {
        let truth = Matrix3::new(1.2, 0.0, 15.0, 0.0, 1.2, 25.0, 0.0, 0.0, 1.0);
        let mut src = grid();
        let mut dst = perspective_transform(&truth, &src).unwrap();
        let inlier_count = src.len();

        for i in 0..10 {
            src.push(Point2::new(20.0 + 13.0 * i as f64, 200.0 - 7.0 * i as f64));
            dst.push(Point2::new(400.0 - 31.0 * i as f64, 17.0 * i as f64));
        }

        let result = estimate_homography_ransac(&src, &dst, &RansacConfig::default()).unwrap();
        assert!(result.inliers.len() >= inlier_count);
        assert!(result.inliers.len() < src.len());
        assert!((result.homography - truth).norm() < 1e-6);
    }

    #[test]
    fn test_too_few_pairs() {
        let src = vec![Point2::new(0.0, 0.0); 3];
        assert!(estimate_homography_ransac(&src, &src, &RansacConfig::default()).is_err());
    }

    #[test]
    fn test_all_collinear_fails() {
        let src: Vec<_> = (0..8).map(|i| Point2::new(i as f64, i as f64)).collect();
        let config = RansacConfig {
            max_iterations: 50,
            ..RansacConfig::default()
        };
        assert!(estimate_homography_ransac(&src, &src, &config).is_err());
    }

    #[test]
    fn test_adaptive_iteration_count() {
        assert_eq!(adaptive_iterations(10, 10, 0.99), 1);
        assert!(adaptive_iterations(5, 10, 0.99) > adaptive_iterations(8, 10, 0.99));
        assert_eq!(adaptive_iterations(0, 10, 0.99), usize::MAX);
    }
}

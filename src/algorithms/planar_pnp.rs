//! Pose of a plane from point correspondences.
//!
//! The initial estimate comes from decomposing the model-to-image homography
//! with the intrinsics; Levenberg-Marquardt then minimizes the pixel
//! reprojection error over the rotation vector and translation.

use crate::config::PoseConfig;
use crate::pipeline::{CameraIntrinsics, PoseEstimator, PoseSolution};
use crate::utils::geometry::homography_dlt;
use anyhow::{anyhow, bail};
use nalgebra::{DMatrix, DVector, Matrix3, Point2, Point3, Rotation3, Vector3};

const PLANAR_EPS: f64 = 1e-9;
const JACOBIAN_STEP: f64 = 1e-7;

#[derive(Debug, Clone)]
pub struct PlanarPoseEstimator {
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for PlanarPoseEstimator {
    fn default() -> Self {
        Self::from_config(&PoseConfig::default())
    }
}

impl PlanarPoseEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &PoseConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            tolerance: config.tolerance,
        }
    }
}

/// Pinhole projection of a model point under (rvec, t)
pub fn project_point(
    rvec: &Vector3<f64>,
    t: &Vector3<f64>,
    point: &Point3<f64>,
    k: &CameraIntrinsics,
) -> Option<Point2<f64>> {
    let p = Rotation3::new(*rvec) * point.coords + t;
    if p.z <= PLANAR_EPS {
        return None;
    }
    Some(Point2::new(k.fx * p.x / p.z + k.cx, k.fy * p.y / p.z + k.cy))
}

fn residuals(
    params: &[f64; 6],
    model: &[Point3<f64>],
    image: &[Point2<f64>],
    k: &CameraIntrinsics,
) -> Option<DVector<f64>> {
    let rvec = Vector3::new(params[0], params[1], params[2]);
    let t = Vector3::new(params[3], params[4], params[5]);
    let mut r = DVector::zeros(model.len() * 2);
    for (i, (m, obs)) in model.iter().zip(image.iter()).enumerate() {
        let proj = project_point(&rvec, &t, m, k)?;
        r[2 * i] = proj.x - obs.x;
        r[2 * i + 1] = proj.y - obs.y;
    }
    Some(r)
}

/// Rotation and translation from a model-plane (z = 0) to image homography
fn pose_from_homography(h: &Matrix3<f64>, k: &CameraIntrinsics) -> Option<(Matrix3<f64>, Vector3<f64>)> {
    let k_inv = k.matrix().try_inverse()?;
    let m = k_inv * h;
    let c0 = m.column(0).into_owned();
    let c1 = m.column(1).into_owned();
    let c2 = m.column(2).into_owned();

    let norm = (c0.norm() + c1.norm()) / 2.0;
    if norm <= PLANAR_EPS {
        return None;
    }
    // The plane must lie in front of the camera
    let lambda = if c2.z < 0.0 { -1.0 / norm } else { 1.0 / norm };

    let r0 = c0 * lambda;
    let r1 = c1 * lambda;
    let r2 = r0.cross(&r1);
    let t = c2 * lambda;

    let approx = Matrix3::from_columns(&[r0, r1, r2]);
    let svd = approx.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u_flipped = u;
        u_flipped.column_mut(2).neg_mut();
        r = u_flipped * v_t;
    }

    Some((r, t))
}

impl PoseEstimator for PlanarPoseEstimator {
    fn name(&self) -> &'static str {
        "PlanarLM"
    }

    fn solve(
        &self,
        model: &[Point3<f64>],
        image: &[Point2<f64>],
        intrinsics: &CameraIntrinsics,
    ) -> crate::Result<PoseSolution> {
        if model.len() != image.len() {
            bail!("point count mismatch: {} model vs {} image", model.len(), image.len());
        }
        if model.len() < 4 {
            bail!("need at least 4 correspondences, got {}", model.len());
        }
        if model.iter().any(|p| p.z.abs() > PLANAR_EPS) {
            bail!("model points must lie on the z = 0 plane");
        }
        if !intrinsics.is_valid() {
            bail!("invalid camera intrinsics");
        }

        let plane: Vec<Point2<f64>> = model.iter().map(|p| Point2::new(p.x, p.y)).collect();
        let h = homography_dlt(&plane, image).ok_or_else(|| anyhow!("degenerate model-image configuration"))?;
        let (r0, t0) = pose_from_homography(&h, intrinsics)
            .ok_or_else(|| anyhow!("homography decomposition failed"))?;

        let rvec0 = Rotation3::from_matrix_unchecked(r0).scaled_axis();
        let mut params = [rvec0.x, rvec0.y, rvec0.z, t0.x, t0.y, t0.z];
        let mut current = residuals(&params, model, image, intrinsics)
            .ok_or_else(|| anyhow!("initial pose places points behind the camera"))?;
        let mut cost = current.norm_squared();
        let mut damping = 1e-3;

        for iteration in 0..self.max_iterations {
            if cost <= self.tolerance {
                break;
            }

            let mut jacobian = DMatrix::<f64>::zeros(current.len(), 6);
            for j in 0..6 {
                let mut shifted = params;
                shifted[j] += JACOBIAN_STEP;
                let Some(r) = residuals(&shifted, model, image, intrinsics) else {
                    bail!("pose refinement left the valid region");
                };
                jacobian.set_column(j, &((r - &current) / JACOBIAN_STEP));
            }

            let jtj = jacobian.transpose() * &jacobian;
            let gradient = jacobian.transpose() * &current;

            let mut improved = false;
            let mut converged = false;
            for _ in 0..10 {
                let mut system = jtj.clone();
                for d in 0..6 {
                    system[(d, d)] += damping * jtj[(d, d)].max(1e-12);
                }
                let Some(step) = system.lu().solve(&(-&gradient)) else {
                    damping *= 10.0;
                    continue;
                };

                let mut candidate = params;
                for (p, s) in candidate.iter_mut().zip(step.iter()) {
                    *p += s;
                }
                if let Some(r) = residuals(&candidate, model, image, intrinsics) {
                    let candidate_cost = r.norm_squared();
                    if candidate_cost < cost {
                        let step_norm = step.norm();
                        params = candidate;
                        current = r;
                        cost = candidate_cost;
                        damping = (damping / 10.0).max(1e-12);
                        improved = true;
                        converged = step_norm < self.tolerance;
                        break;
                    }
                }
                damping *= 10.0;
            }

            if converged {
                log::trace!("pose converged after {} iterations", iteration + 1);
            }
            if !improved || converged {
                break;
            }
        }

        let solution = PoseSolution {
            rotation: Vector3::new(params[0], params[1], params[2]),
            translation: Vector3::new(params[3], params[4], params[5]),
        };
        if !(solution.rotation.iter().chain(solution.translation.iter()).all(|v| v.is_finite())) {
            bail!("pose solution is not finite");
        }

        log::debug!("pose solved, rms reprojection {:.4} px", (cost / model.len() as f64).sqrt());
        Ok(solution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> Vec<Point3<f64>> {
        vec![
            Point3::new(-1.0, -0.75, 0.0),
            Point3::new(1.0, -0.75, 0.0),
            Point3::new(1.0, 0.75, 0.0),
            Point3::new(-1.0, 0.75, 0.0),
        ]
    }

    fn project_all(rvec: &Vector3<f64>, t: &Vector3<f64>, k: &CameraIntrinsics) -> Vec<Point2<f64>> {
        model().iter().map(|p| project_point(rvec, t, p, k).unwrap()).collect()
    }

    #[test]
    fn test_recovers_tilted_pose() {
        let k = CameraIntrinsics::new(800.0, 800.0, 320.0, 240.0);
        let rvec = Rotation3::from_euler_angles(0.2, -0.15, 0.1).scaled_axis();
        let t = Vector3::new(0.3, -0.2, 6.0);
        let image = project_all(&rvec, &t, &k);

        let solution = PlanarPoseEstimator::new().solve(&model(), &image, &k).unwrap();
        assert!((solution.rotation - rvec).norm() < 1e-6, "{:?}", solution.rotation);
        assert!((solution.translation - t).norm() < 1e-6, "{:?}", solution.translation);
    }

    #[test]
    fn test_fronto_parallel_has_zero_rotation() {
        let k = CameraIntrinsics::default();
        let t = Vector3::new(0.0, 0.0, 4.0);
        let image = project_all(&Vector3::zeros(), &t, &k);

        let solution = PlanarPoseEstimator::new().solve(&model(), &image, &k).unwrap();
        assert!(solution.rotation.norm() < 1e-8);
        assert!((solution.translation.z - 4.0).abs() < 1e-8);
    }

    #[test]
    fn test_rejects_bad_input() {
        let k = CameraIntrinsics::default();
        let estimator = PlanarPoseEstimator::new();
        let image = vec![Point2::new(0.0, 0.0); 4];

        assert!(estimator.solve(&model()[..3], &image[..3], &k).is_err());

        let mut lifted = model();
        lifted[0].z = 1.0;
        assert!(estimator.solve(&lifted, &image, &k).is_err());
    }
}

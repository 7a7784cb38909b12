use crate::pipeline::{Pose, PoseSolution};
use nalgebra::Vector3;

/// Convert estimator output into the overlay convention (y axis up).
///
/// Position is `(t.x, -t.y, t.z)`; angles are `(-r.x, r.y, -r.z)` in degrees.
pub fn to_overlay_pose(solution: &PoseSolution) -> Pose {
    let t = &solution.translation;
    let r = &solution.rotation;
    Pose {
        position: Vector3::new(t.x, -t.y, t.z),
        angles_deg: Vector3::new(-r.x.to_degrees(), r.y.to_degrees(), -r.z.to_degrees()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_conventions() {
        let solution = PoseSolution {
            rotation: Vector3::new(0.1, 0.2, -0.3),
            translation: Vector3::new(1.0, 2.0, 3.0),
        };
        let pose = to_overlay_pose(&solution);

        assert_eq!(pose.position, Vector3::new(1.0, -2.0, 3.0));
        assert!((pose.angles_deg.x + 0.1f64.to_degrees()).abs() < 1e-12);
        assert!((pose.angles_deg.y - 0.2f64.to_degrees()).abs() < 1e-12);
        assert!((pose.angles_deg.z - 0.3f64.to_degrees()).abs() < 1e-12);
    }
}

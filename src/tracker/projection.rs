use crate::pipeline::{Corners, PixelCorners};
use crate::utils::geometry::perspective_transform;
use nalgebra::{Matrix3, Point2, Point3};

/// Reference rectangle corners: top-left, top-right, bottom-right, bottom-left
pub fn reference_corners(width: u32, height: u32) -> Corners {
    let (w, h) = (width as f64, height as f64);
    [
        Point2::new(0.0, 0.0),
        Point2::new(w, 0.0),
        Point2::new(w, h),
        Point2::new(0.0, h),
    ]
}

/// Reference corners mapped into the scene, `None` if any lands at infinity
pub fn project_corners(h: &Matrix3<f64>, width: u32, height: u32) -> Option<Corners> {
    let projected = perspective_transform(h, &reference_corners(width, height))?;
    projected.try_into().ok()
}

pub fn round_corners(corners: &Corners) -> PixelCorners {
    corners.map(|p| Point2::new(p.x.round() as i32, p.y.round() as i32))
}

/// Corners of the planar target in model space.
///
/// Centred on the origin at z = 0; the longer side spans [-1, 1] and the
/// shorter one is scaled by the aspect ratio. Same winding as
/// [`reference_corners`].
pub fn model_corners(width: u32, height: u32) -> [Point3<f64>; 4] {
    let longest = width.max(height).max(1) as f64;
    let unit_w = width as f64 / longest;
    let unit_h = height as f64 / longest;
    [
        Point3::new(-unit_w, -unit_h, 0.0),
        Point3::new(unit_w, -unit_h, 0.0),
        Point3::new(unit_w, unit_h, 0.0),
        Point3::new(-unit_w, unit_h, 0.0),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_projection() {
        let corners = project_corners(&Matrix3::identity(), 320, 240).unwrap();
        assert_eq!(corners, reference_corners(320, 240));
    }

    #[test]
    fn test_projection_through_scale() {
        let h = Matrix3::new(2.0, 0.0, 10.0, 0.0, 2.0, 5.0, 0.0, 0.0, 1.0);
        let corners = project_corners(&h, 100, 50).unwrap();
        assert_eq!(corners[2], Point2::new(210.0, 105.0));
    }

    #[test]
    fn test_rounding() {
        let corners = [
            Point2::new(0.4, 0.6),
            Point2::new(10.5, -0.4),
            Point2::new(-2.6, 3.49),
            Point2::new(7.0, 7.0),
        ];
        let pixels = round_corners(&corners);
        assert_eq!(pixels[0], Point2::new(0, 1));
        assert_eq!(pixels[1], Point2::new(11, 0));
        assert_eq!(pixels[2], Point2::new(-3, 3));
    }

    #[test]
    fn test_model_corners_unit_half_extent() {
        let landscape = model_corners(400, 300);
        assert_eq!(landscape[0], Point3::new(-1.0, -0.75, 0.0));
        assert_eq!(landscape[2], Point3::new(1.0, 0.75, 0.0));

        let portrait = model_corners(100, 200);
        assert_eq!(portrait[1], Point3::new(0.5, -1.0, 0.0));
    }
}

//! Projective geometry helpers shared by the estimators and the tracker

use nalgebra::{DMatrix, Matrix3, Point2, Vector3};

const EPS: f64 = 1e-12;

/// Map points through a homography.
///
/// Returns `None` if any point lands at infinity or the result is not finite.
pub fn perspective_transform(h: &Matrix3<f64>, points: &[Point2<f64>]) -> Option<Vec<Point2<f64>>> {
    points.iter().map(|p| transform_point(h, p)).collect()
}

pub fn transform_point(h: &Matrix3<f64>, p: &Point2<f64>) -> Option<Point2<f64>> {
    let v = h * Vector3::new(p.x, p.y, 1.0);
    if !v[2].is_finite() || v[2].abs() <= EPS {
        return None;
    }
    let out = Point2::new(v[0] / v[2], v[1] / v[2]);
    if out.x.is_finite() && out.y.is_finite() {
        Some(out)
    } else {
        None
    }
}

/// Squared transfer error `|H * src - dst|^2`, infinite for points at infinity
pub fn transfer_error_sq(h: &Matrix3<f64>, src: &Point2<f64>, dst: &Point2<f64>) -> f64 {
    match transform_point(h, src) {
        Some(p) => (p - *dst).norm_squared(),
        None => f64::INFINITY,
    }
}

/// Scale so that `H[2][2] == 1`, or to unit Frobenius norm when that entry vanishes
pub fn normalize_homography(h: &Matrix3<f64>) -> Matrix3<f64> {
    let w = h[(2, 2)];
    if w.abs() > EPS {
        *h / w
    } else {
        let n = h.norm();
        if n > EPS {
            *h / n
        } else {
            *h
        }
    }
}

/// Hartley normalization: centroid at the origin, mean distance sqrt(2)
pub fn hartley_normalize(points: &[Point2<f64>]) -> Option<(Vec<Point2<f64>>, Matrix3<f64>)> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist <= EPS {
        return None;
    }

    let s = std::f64::consts::SQRT_2 / mean_dist;
    let t = Matrix3::new(
        s, 0.0, -s * cx, //
        0.0, s, -s * cy, //
        0.0, 0.0, 1.0,
    );
    let normalized = points
        .iter()
        .map(|p| Point2::new(s * (p.x - cx), s * (p.y - cy)))
        .collect();
    Some((normalized, t))
}

/// Direct linear transform on all given pairs (least squares for more than 4).
pub fn homography_dlt(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Option<Matrix3<f64>> {
    if src.len() < 4 || src.len() != dst.len() {
        return None;
    }

    let (src_n, t_src) = hartley_normalize(src)?;
    let (dst_n, t_dst) = hartley_normalize(dst)?;

    // Pad to at least 9 rows so the SVD yields the full right singular basis.
    let rows = (2 * src.len()).max(9);
    let mut a = DMatrix::<f64>::zeros(rows, 9);
    for (i, (p, q)) in src_n.iter().zip(dst_n.iter()).enumerate() {
        let (x, y) = (p.x, p.y);
        let (u, v) = (q.x, q.y);
        let r0 = 2 * i;
        let r1 = r0 + 1;

        a[(r0, 0)] = -x;
        a[(r0, 1)] = -y;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = u * x;
        a[(r0, 7)] = u * y;
        a[(r0, 8)] = u;

        a[(r1, 3)] = -x;
        a[(r1, 4)] = -y;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = v * x;
        a[(r1, 7)] = v * y;
        a[(r1, 8)] = v;
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.total_cmp(b))?;
    let h = v_t.row(min_idx);

    let h_norm = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);
    let t_dst_inv = t_dst.try_inverse()?;
    let h = normalize_homography(&(t_dst_inv * h_norm * t_src));

    if h.iter().all(|v| v.is_finite()) && h.determinant().abs() > EPS {
        Some(h)
    } else {
        None
    }
}

/// Homography mapping four source corners onto four destination corners
pub fn homography_from_corners(src: &[Point2<f64>; 4], dst: &[Point2<f64>; 4]) -> Option<Matrix3<f64>> {
    homography_dlt(src, dst)
}

/// True when any three of the points are (nearly) collinear
pub fn has_collinear_triple(points: &[Point2<f64>]) -> bool {
    let n = points.len();
    for i in 0..n {
        for j in (i + 1)..n {
            for k in (j + 1)..n {
                let ab = points[j] - points[i];
                let ac = points[k] - points[i];
                let cross = ab.x * ac.y - ab.y * ac.x;
                let scale = ab.norm() * ac.norm();
                if cross.abs() <= 1e-6 * scale.max(EPS) {
                    return true;
                }
            }
        }
    }
    false
}

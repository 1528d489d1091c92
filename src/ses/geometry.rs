//! Small vector helpers shared by the surface construction stages.

use std::f64::consts::TAU;

use nalgebra::Vector3;

/// Cartesian vector / point in Å.
pub type Vec3 = Vector3<f64>;

/// Tolerance for treating a length or a sine as zero.
pub const EPSILON: f64 = 1e-10;

/// Returns a unit vector perpendicular to `axis`.
///
/// `axis` must be non-zero; it does not need to be normalized.
pub fn perpendicular(axis: &Vec3) -> Vec3 {
    let helper = if axis.x.abs() < 0.9 * axis.norm() {
        Vec3::x()
    } else {
        Vec3::y()
    };
    axis.cross(&helper).normalize()
}

/// Right-handed orthonormal frame `(n1, n2)` around a unit `axis`, so that
/// `n1 × n2 == axis`.
pub fn frame(axis: &Vec3) -> (Vec3, Vec3) {
    let n1 = perpendicular(axis);
    let n2 = axis.cross(&n1);
    (n1, n2)
}

/// Angle of `v` in the plane spanned by `(n1, n2)`, in `[0, 2π)`.
pub fn planar_angle(v: &Vec3, n1: &Vec3, n2: &Vec3) -> f64 {
    let angle = v.dot(n2).atan2(v.dot(n1));
    if angle < 0.0 {
        angle + TAU
    } else {
        angle
    }
}

/// Unnormalized normal of triangle `abc` following the right-hand rule.
pub fn triangle_normal(a: &Vec3, b: &Vec3, c: &Vec3) -> Vec3 {
    (b - a).cross(&(c - a))
}

/// Spherical interpolation between two unit vectors.
///
/// Falls back to normalized linear interpolation when the vectors are
/// (anti)parallel.
pub fn slerp(from: &Vec3, to: &Vec3, t: f64) -> Vec3 {
    let cos = from.dot(to).clamp(-1.0, 1.0);
    let angle = cos.acos();
    let sin = angle.sin();
    if sin.abs() < 1e-9 {
        let lerp = from * (1.0 - t) + to * t;
        return if lerp.norm() < EPSILON {
            *from
        } else {
            lerp.normalize()
        };
    }
    let wa = ((1.0 - t) * angle).sin() / sin;
    let wb = (t * angle).sin() / sin;
    (from * wa + to * wb).normalize()
}

/// Angle between two vectors in radians.
pub fn angle_between(a: &Vec3, b: &Vec3) -> f64 {
    let denom = a.norm() * b.norm();
    if denom < EPSILON {
        return 0.0;
    }
    (a.dot(b) / denom).clamp(-1.0, 1.0).acos()
}

/// Number of segments needed so that no segment of a curve of `length`
/// exceeds `target`; never fewer than two.
pub fn segment_count(length: f64, target: f64) -> usize {
    if !(length.is_finite() && target > 0.0) {
        return 2;
    }
    ((length / target).ceil() as usize).max(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_frame_is_right_handed() {
        for axis in [Vec3::x(), Vec3::new(0.3, -2.0, 0.7).normalize(), -Vec3::z()] {
            let (n1, n2) = frame(&axis);
            assert_relative_eq!(n1.norm(), 1.0, epsilon = 1e-12);
            assert_relative_eq!(n2.norm(), 1.0, epsilon = 1e-12);
            assert_relative_eq!(n1.dot(&axis), 0.0, epsilon = 1e-12);
            assert_relative_eq!((n1.cross(&n2) - axis).norm(), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_planar_angle_range() {
        let (n1, n2) = (Vec3::x(), Vec3::y());
        assert_relative_eq!(planar_angle(&Vec3::y(), &n1, &n2), FRAC_PI_2);
        assert_relative_eq!(planar_angle(&-Vec3::y(), &n1, &n2), 3.0 * FRAC_PI_2);
        assert_relative_eq!(planar_angle(&Vec3::x(), &n1, &n2), 0.0);
    }

    #[test]
    fn test_slerp_stays_on_sphere() {
        let a = Vec3::x();
        let b = Vec3::new(0.0, 1.0, 1.0).normalize();
        let mid = slerp(&a, &b, 0.5);
        assert_relative_eq!(mid.norm(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(angle_between(&a, &mid), angle_between(&mid, &b), epsilon = 1e-12);
        assert_relative_eq!(slerp(&a, &b, 1.0), b, epsilon = 1e-12);
    }

    #[test]
    fn test_segment_count() {
        assert_eq!(segment_count(f64::NAN, 0.5), 2);
        assert_eq!(segment_count(0.1, 0.5), 2);
        assert_eq!(segment_count(2.1, 0.5), 5);
    }
}

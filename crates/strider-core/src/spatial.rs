//! Minimal spatial algebra for the walking controller.
//!
//! [`Pose`] is a Plücker-style rigid transform from the world (inertial)
//! frame to a local frame: the stored rotation maps world coordinates into
//! local coordinates (its rows are the local frame axes expressed in the
//! world frame) and the stored translation is the frame origin in world
//! coordinates. [`Wrench`] is a 6D contact force (couple + force) and
//! [`MotionVec`] a 6D velocity or gain vector (angular + linear).

use nalgebra::{Matrix3, Matrix6, Rotation3, UnitQuaternion, Vector2, Vector3, Vector6};

/// Skew-symmetric (cross product) matrix of a 3D vector.
///
/// ```text
/// [v]_x = [ 0   -vz   vy ]
///         [ vz   0   -vx ]
///         [-vy   vx   0  ]
/// ```
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

// ---------------------------------------------------------------------------
// Pose
// ---------------------------------------------------------------------------

/// Rigid transform from the world frame to a local frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose {
    /// Rotation mapping world coordinates to local coordinates.
    pub rotation: Matrix3<f64>,
    /// Origin of the local frame in world coordinates.
    pub translation: Vector3<f64>,
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl Pose {
    /// Identity transform.
    pub fn identity() -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn new(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Pure translation.
    pub fn from_translation(translation: Vector3<f64>) -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation,
        }
    }

    /// Transform with a yaw rotation (about world z) and a translation.
    pub fn from_yaw_translation(yaw: f64, translation: Vector3<f64>) -> Self {
        let (cy, sy) = (yaw.cos(), yaw.sin());
        // World-to-local map for a frame yawed by `yaw`.
        let rotation = Matrix3::new(cy, sy, 0.0, -sy, cy, 0.0, 0.0, 0.0, 1.0);
        Self {
            rotation,
            translation,
        }
    }

    /// Inverse transform (local frame to world frame).
    pub fn inverse(&self) -> Self {
        Self {
            rotation: self.rotation.transpose(),
            translation: -self.rotation * self.translation,
        }
    }

    /// Yaw angle of the local frame's sagittal axis in the world frame.
    pub fn yaw(&self) -> f64 {
        let sagittal = self.rotation.row(0);
        sagittal[1].atan2(sagittal[0])
    }

    /// Map a world-frame point into the local frame.
    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * (p - self.translation)
    }

    /// 6x6 dual (wrench) transform matrix.
    ///
    /// Maps a world-frame wrench vector `[couple; force]` to the local frame:
    ///
    /// ```text
    /// [E  -E [r]_x]
    /// [0   E      ]
    /// ```
    pub fn dual_matrix(&self) -> Matrix6<f64> {
        let mut dual = Matrix6::zeros();
        let e = self.rotation;
        dual.fixed_view_mut::<3, 3>(0, 0).copy_from(&e);
        dual.fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&(-e * skew(&self.translation)));
        dual.fixed_view_mut::<3, 3>(3, 3).copy_from(&e);
        dual
    }

    /// Transform a world-frame wrench into the local frame.
    pub fn dual_mul(&self, wrench: &Wrench) -> Wrench {
        Wrench {
            couple: self.rotation * (wrench.couple - self.translation.cross(&wrench.force)),
            force: self.rotation * wrench.force,
        }
    }

    /// Frame interpolation: linear in translation, spherical in rotation.
    pub fn interpolate(from: &Pose, to: &Pose, t: f64) -> Pose {
        let q_from = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(
            from.rotation,
        ));
        let q_to =
            UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(to.rotation));
        let q = q_from.slerp(&q_to, t);
        Pose {
            rotation: q.to_rotation_matrix().into_inner(),
            translation: from.translation.lerp(&to.translation, t),
        }
    }
}

/// Transform composition: `a * b` applies `b` first, then `a`.
///
/// With `a` mapping frame m to t and `b` mapping frame s to m, the product
/// maps s to t (the Plücker transform product convention).
impl std::ops::Mul for Pose {
    type Output = Pose;

    fn mul(self, rhs: Pose) -> Pose {
        Pose {
            rotation: self.rotation * rhs.rotation,
            translation: rhs.translation + rhs.rotation.transpose() * self.translation,
        }
    }
}

// ---------------------------------------------------------------------------
// Wrench
// ---------------------------------------------------------------------------

/// 6D contact wrench: couple (moment) and force.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Wrench {
    pub couple: Vector3<f64>,
    pub force: Vector3<f64>,
}

impl Wrench {
    pub fn new(couple: Vector3<f64>, force: Vector3<f64>) -> Self {
        Self { couple, force }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    /// Stacked `[couple; force]` vector.
    pub fn vector(&self) -> Vector6<f64> {
        let mut v = Vector6::zeros();
        v.fixed_rows_mut::<3>(0).copy_from(&self.couple);
        v.fixed_rows_mut::<3>(3).copy_from(&self.force);
        v
    }

    pub fn from_vector(v: &Vector6<f64>) -> Self {
        Self {
            couple: v.fixed_rows::<3>(0).into(),
            force: v.fixed_rows::<3>(3).into(),
        }
    }

    /// Center of pressure in the wrench's own frame, assuming a horizontal
    /// contact plane through the frame origin.
    pub fn cop(&self) -> Vector2<f64> {
        let moment = Vector3::z().cross(&self.couple) / self.force.z;
        moment.fixed_rows::<2>(0).into()
    }
}

impl std::ops::Add for Wrench {
    type Output = Wrench;

    fn add(self, rhs: Wrench) -> Wrench {
        Wrench {
            couple: self.couple + rhs.couple,
            force: self.force + rhs.force,
        }
    }
}

impl std::ops::Sub for Wrench {
    type Output = Wrench;

    fn sub(self, rhs: Wrench) -> Wrench {
        Wrench {
            couple: self.couple - rhs.couple,
            force: self.force - rhs.force,
        }
    }
}

impl std::ops::Mul<f64> for Wrench {
    type Output = Wrench;

    fn mul(self, rhs: f64) -> Wrench {
        Wrench {
            couple: self.couple * rhs,
            force: self.force * rhs,
        }
    }
}

// ---------------------------------------------------------------------------
// MotionVec
// ---------------------------------------------------------------------------

/// 6D motion vector: angular and linear parts.
///
/// Also used for per-axis task gains (stiffness, damping, admittance).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MotionVec {
    pub angular: Vector3<f64>,
    pub linear: Vector3<f64>,
}

impl MotionVec {
    pub fn new(angular: Vector3<f64>, linear: Vector3<f64>) -> Self {
        Self { angular, linear }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    /// Uniform gains on all six axes.
    pub fn uniform(value: f64) -> Self {
        Self {
            angular: Vector3::repeat(value),
            linear: Vector3::repeat(value),
        }
    }
}

impl std::ops::Add for MotionVec {
    type Output = MotionVec;

    fn add(self, rhs: MotionVec) -> MotionVec {
        MotionVec {
            angular: self.angular + rhs.angular,
            linear: self.linear + rhs.linear,
        }
    }
}

impl std::ops::Sub for MotionVec {
    type Output = MotionVec;

    fn sub(self, rhs: MotionVec) -> MotionVec {
        MotionVec {
            angular: self.angular - rhs.angular,
            linear: self.linear - rhs.linear,
        }
    }
}

impl std::ops::Mul<MotionVec> for f64 {
    type Output = MotionVec;

    fn mul(self, rhs: MotionVec) -> MotionVec {
        MotionVec {
            angular: rhs.angular * self,
            linear: rhs.linear * self,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tilted_pose() -> Pose {
        let q = UnitQuaternion::from_euler_angles(0.03, -0.02, 0.7);
        // World-to-local rotation is the inverse of the frame orientation.
        Pose::new(
            q.to_rotation_matrix().into_inner().transpose(),
            Vector3::new(0.4, -0.2, 0.1),
        )
    }

    // ---- skew ----

    #[test]
    fn skew_matches_cross_product() {
        let v = Vector3::new(1.0, 2.0, 3.0);
        let w = Vector3::new(-0.3, 0.5, 2.0);
        assert_relative_eq!(skew(&v) * w, v.cross(&w), epsilon = 1e-12);
    }

    // ---- Pose ----

    #[test]
    fn inverse_roundtrip() {
        let pose = tilted_pose();
        let p = Vector3::new(0.1, 0.2, 0.3);
        let local = pose.transform_point(&p);
        let back = pose.inverse().transform_point(&local);
        assert_relative_eq!(back, p, epsilon = 1e-12);
    }

    #[test]
    fn composition_relative_transform() {
        // X_c_s = X_0_s * X_0_c^{-1} maps frame-c coordinates to frame-s
        // coordinates.
        let x_0_c = tilted_pose();
        let x_0_s = Pose::from_yaw_translation(0.4, Vector3::new(-0.1, 0.3, 0.0));
        let x_c_s = x_0_s * x_0_c.inverse();
        let p_0 = Vector3::new(0.5, -0.4, 0.2);
        let p_c = x_0_c.transform_point(&p_0);
        let p_s = x_0_s.transform_point(&p_0);
        assert_relative_eq!(x_c_s.transform_point(&p_c), p_s, epsilon = 1e-12);
    }

    #[test]
    fn yaw_extraction() {
        let pose = Pose::from_yaw_translation(0.6, Vector3::zeros());
        assert_relative_eq!(pose.yaw(), 0.6, epsilon = 1e-12);
    }

    #[test]
    fn dual_mul_matches_dual_matrix() {
        let pose = tilted_pose();
        let w = Wrench::new(Vector3::new(0.5, -1.0, 2.0), Vector3::new(10.0, -3.0, 80.0));
        let via_matrix = Wrench::from_vector(&(pose.dual_matrix() * w.vector()).into());
        let direct = pose.dual_mul(&w);
        assert_relative_eq!(direct.couple, via_matrix.couple, epsilon = 1e-10);
        assert_relative_eq!(direct.force, via_matrix.force, epsilon = 1e-10);
    }

    #[test]
    fn dual_transform_preserves_force_norm() {
        let pose = tilted_pose();
        let w = Wrench::new(Vector3::zeros(), Vector3::new(3.0, 4.0, 0.0));
        assert_relative_eq!(pose.dual_mul(&w).force.norm(), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn interpolate_endpoints_and_midpoint() {
        let a = Pose::from_yaw_translation(0.0, Vector3::new(0.0, 0.1, 0.0));
        let b = Pose::from_yaw_translation(0.8, Vector3::new(0.2, -0.1, 0.0));
        let start = Pose::interpolate(&a, &b, 0.0);
        let mid = Pose::interpolate(&a, &b, 0.5);
        let end = Pose::interpolate(&a, &b, 1.0);
        assert_relative_eq!(start.translation, a.translation, epsilon = 1e-12);
        assert_relative_eq!(end.translation, b.translation, epsilon = 1e-12);
        assert_relative_eq!(mid.translation, Vector3::new(0.1, 0.0, 0.0), epsilon = 1e-12);
        assert_relative_eq!(mid.yaw(), 0.4, epsilon = 1e-9);
    }

    // ---- Wrench ----

    #[test]
    fn wrench_vector_roundtrip() {
        let w = Wrench::new(Vector3::new(1.0, 2.0, 3.0), Vector3::new(4.0, 5.0, 6.0));
        let w2 = Wrench::from_vector(&w.vector());
        assert_eq!(w, w2);
    }

    #[test]
    fn cop_of_pure_vertical_force_is_origin() {
        let w = Wrench::new(Vector3::zeros(), Vector3::new(0.0, 0.0, 100.0));
        assert_relative_eq!(w.cop(), Vector2::zeros(), epsilon = 1e-12);
    }

    #[test]
    fn cop_offset_from_couple() {
        // Force 100 N up applied 0.02 m forward of the origin: couple about y
        // is -2 Nm, CoP should come out at x = +0.02.
        let w = Wrench::new(Vector3::new(0.0, -2.0, 0.0), Vector3::new(0.0, 0.0, 100.0));
        assert_relative_eq!(w.cop(), Vector2::new(0.02, 0.0), epsilon = 1e-12);
    }
}

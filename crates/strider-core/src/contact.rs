//! Foot-ground contact patches.
//!
//! A [`Contact`] wraps a foot frame with the extra information carried by a
//! footstep plan: patch half-dimensions, reference velocity, surface name and
//! sequence id. Contacts are immutable once placed in a plan; mutation
//! helpers return new values.

use nalgebra::{Matrix4x2, Vector2, Vector3, Vector4};
use rand::Rng;
use rand_distr::{Distribution, UnitSphere};
use serde::{Deserialize, Serialize};

use crate::spatial::Pose;

/// Sagittal offset from the foot center frame to the ankle frame, in meters.
pub const ANKLE_SAGITTAL_OFFSET: f64 = -0.015;

/// Lateral offset magnitude from the foot center frame to the ankle frame,
/// in meters. The sign depends on the foot side.
pub const ANKLE_LATERAL_OFFSET: f64 = 0.01;

/// Contact state: set of feet in contact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactState {
    DoubleSupport,
    LeftFoot,
    RightFoot,
}

/// Foot surface a contact is attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Surface {
    LeftFootCenter,
    RightFootCenter,
}

impl Surface {
    pub fn as_str(&self) -> &'static str {
        match self {
            Surface::LeftFootCenter => "LeftFootCenter",
            Surface::RightFootCenter => "RightFootCenter",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "LeftFootCenter" => Some(Surface::LeftFootCenter),
            "RightFootCenter" => Some(Surface::RightFootCenter),
            _ => None,
        }
    }
}

impl std::fmt::Display for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-contact swing trajectory overrides, forwarded to the external
/// swing-foot interpolator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SwingSettings {
    /// Apex height above the takeoff contact, in meters.
    pub height: Option<f64>,
    /// Takeoff offset in the support frame, in meters.
    pub takeoff_offset: Option<[f64; 3]>,
    /// Foot pitch at takeoff, in radians.
    pub takeoff_pitch: Option<f64>,
    /// Foot pitch at landing, in radians.
    pub landing_pitch: Option<f64>,
}

/// Half-space representation of a planar convex area: `mat * p <= vec` for
/// 2D points `p`.
#[derive(Clone, Debug, PartialEq)]
pub struct Hrep {
    pub mat: Matrix4x2<f64>,
    pub vec: Vector4<f64>,
}

impl Hrep {
    /// Axis-aligned box `|x| <= hx`, `|y| <= hy`.
    pub fn from_box(hx: f64, hy: f64) -> Self {
        Self {
            mat: Matrix4x2::new(1.0, 0.0, -1.0, 0.0, 0.0, 1.0, 0.0, -1.0),
            vec: Vector4::new(hx, hx, hy, hy),
        }
    }

    /// Check membership up to a tolerance.
    pub fn contains(&self, p: &Vector2<f64>, tol: f64) -> bool {
        let residual = self.mat * p - self.vec;
        residual.iter().all(|&r| r <= tol)
    }
}

/// A foot-ground contact from a footstep plan.
#[derive(Clone, Debug, PartialEq)]
pub struct Contact {
    /// Transform from the world frame to the contact frame.
    pub pose: Pose,
    /// Patch half-length along the sagittal axis, in meters.
    pub half_length: f64,
    /// Patch half-width along the lateral axis, in meters.
    pub half_width: f64,
    /// Reference walking velocity while supporting on this contact, in m/s.
    pub ref_vel: Vector3<f64>,
    /// Foot surface the contact binds to.
    pub surface: Surface,
    /// Monotonic index of the contact in its plan.
    pub id: u32,
    /// Optional swing trajectory overrides.
    pub swing: Option<SwingSettings>,
}

impl Contact {
    pub fn new(pose: Pose, surface: Surface) -> Self {
        Self {
            pose,
            half_length: 0.0,
            half_width: 0.0,
            ref_vel: Vector3::zeros(),
            surface,
            id: 0,
            swing: None,
        }
    }

    /// Sagittal unit vector of the contact frame.
    pub fn sagittal(&self) -> Vector3<f64> {
        self.pose.rotation.row(0).transpose()
    }

    /// Lateral unit vector of the contact frame.
    pub fn lateral(&self) -> Vector3<f64> {
        self.pose.rotation.row(1).transpose()
    }

    /// Normal unit vector of the contact frame.
    pub fn normal(&self) -> Vector3<f64> {
        self.pose.rotation.row(2).transpose()
    }

    /// World position of the contact frame.
    pub fn position(&self) -> Vector3<f64> {
        self.pose.translation
    }

    pub fn x(&self) -> f64 {
        self.pose.translation.x
    }

    pub fn y(&self) -> f64 {
        self.pose.translation.y
    }

    pub fn z(&self) -> f64 {
        self.pose.translation.z
    }

    /// Position of the ankle projected in the contact frame.
    pub fn ankle_pos(&self) -> Vector3<f64> {
        let lateral = match self.surface {
            Surface::LeftFootCenter => -ANKLE_LATERAL_OFFSET,
            Surface::RightFootCenter => ANKLE_LATERAL_OFFSET,
        };
        self.position() + ANKLE_SAGITTAL_OFFSET * self.sagittal() + lateral * self.lateral()
    }

    /// Frame rooted at the ankle, aligned with the contact frame.
    pub fn ankle_pose(&self) -> Pose {
        Pose::new(self.pose.rotation, self.ankle_pos())
    }

    /// Corner vertices of the contact patch.
    pub fn vertices(&self) -> [Vector3<f64>; 4] {
        let p = self.position();
        let t = self.half_length * self.sagittal();
        let b = self.half_width * self.lateral();
        [p + t + b, p + t - b, p - t - b, p - t + b]
    }

    /// Minimum world coordinate of the patch along axis `i`.
    pub fn min_coord(&self, i: usize) -> f64 {
        self.vertices().iter().map(|v| v[i]).fold(f64::INFINITY, f64::min)
    }

    /// Maximum world coordinate of the patch along axis `i`.
    pub fn max_coord(&self, i: usize) -> f64 {
        self.vertices()
            .iter()
            .map(|v| v[i])
            .fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn xmin(&self) -> f64 {
        self.min_coord(0)
    }

    pub fn xmax(&self) -> f64 {
        self.max_coord(0)
    }

    pub fn ymin(&self) -> f64 {
        self.min_coord(1)
    }

    pub fn ymax(&self) -> f64 {
        self.max_coord(1)
    }

    /// Half-space representation of the patch in the contact frame.
    pub fn local_hrep(&self) -> Hrep {
        Hrep::from_box(self.half_length, self.half_width)
    }

    /// Half-space representation of the patch in the world frame.
    ///
    /// Valid only for horizontal patches; a non-horizontal contact is logged
    /// and the planar projection is used anyway.
    pub fn hrep(&self) -> Hrep {
        if (self.normal() - Vector3::z()).norm() > 1e-3 {
            log::warn!("Contact {} is not horizontal", self.id);
        }
        let local = self.local_hrep();
        let mat = local.mat * self.pose.rotation.fixed_view::<2, 2>(0, 0);
        let vec = mat * self.pose.translation.fixed_rows::<2>(0) + local.vec;
        Hrep { mat, vec }
    }

    /// New contact with a different pose.
    pub fn with_pose(&self, pose: Pose) -> Self {
        Self {
            pose,
            ..self.clone()
        }
    }

    /// New contact displaced by `magnitude` meters in a random direction.
    pub fn add_noise<R: Rng>(&self, magnitude: f64, rng: &mut R) -> Self {
        let dir: [f64; 3] = UnitSphere.sample(rng);
        let displacement = magnitude * Vector3::from(dir);
        let mut noised = self.clone();
        noised.pose.translation += displacement;
        noised
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    fn flat_contact(x: f64, y: f64, surface: Surface) -> Contact {
        let mut contact = Contact::new(
            Pose::from_translation(Vector3::new(x, y, 0.0)),
            surface,
        );
        contact.half_length = 0.1;
        contact.half_width = 0.05;
        contact
    }

    // ---- frame axes ----

    #[test]
    fn identity_frame_axes() {
        let c = flat_contact(0.0, 0.0, Surface::LeftFootCenter);
        assert_relative_eq!(c.sagittal(), Vector3::x(), epsilon = 1e-12);
        assert_relative_eq!(c.lateral(), Vector3::y(), epsilon = 1e-12);
        assert_relative_eq!(c.normal(), Vector3::z(), epsilon = 1e-12);
    }

    #[test]
    fn yawed_frame_axes() {
        let mut c = flat_contact(0.0, 0.0, Surface::LeftFootCenter);
        c.pose = Pose::from_yaw_translation(std::f64::consts::FRAC_PI_2, Vector3::zeros());
        assert_relative_eq!(c.sagittal(), Vector3::y(), epsilon = 1e-12);
        assert_relative_eq!(c.normal(), Vector3::z(), epsilon = 1e-12);
    }

    // ---- ankle frame ----

    #[test]
    fn ankle_lateral_offset_sign_depends_on_side() {
        let left = flat_contact(0.0, 0.0, Surface::LeftFootCenter);
        let right = flat_contact(0.0, 0.0, Surface::RightFootCenter);
        assert_relative_eq!(left.ankle_pos().y, -ANKLE_LATERAL_OFFSET, epsilon = 1e-12);
        assert_relative_eq!(right.ankle_pos().y, ANKLE_LATERAL_OFFSET, epsilon = 1e-12);
        assert_relative_eq!(left.ankle_pos().x, ANKLE_SAGITTAL_OFFSET, epsilon = 1e-12);
    }

    // ---- patch geometry ----

    #[test]
    fn vertices_and_extrema() {
        let c = flat_contact(1.0, 2.0, Surface::LeftFootCenter);
        assert_relative_eq!(c.xmin(), 0.9, epsilon = 1e-12);
        assert_relative_eq!(c.xmax(), 1.1, epsilon = 1e-12);
        assert_relative_eq!(c.ymin(), 1.95, epsilon = 1e-12);
        assert_relative_eq!(c.ymax(), 2.05, epsilon = 1e-12);
    }

    #[test]
    fn local_hrep_contains_patch_interior() {
        let c = flat_contact(0.0, 0.0, Surface::LeftFootCenter);
        let hrep = c.local_hrep();
        assert!(hrep.contains(&Vector2::new(0.09, -0.04), 0.0));
        assert!(!hrep.contains(&Vector2::new(0.11, 0.0), 0.0));
    }

    #[test]
    fn world_hrep_tracks_translation() {
        let c = flat_contact(1.0, 2.0, Surface::LeftFootCenter);
        let hrep = c.hrep();
        assert!(hrep.contains(&Vector2::new(1.0, 2.0), 0.0));
        assert!(hrep.contains(&Vector2::new(1.09, 2.04), 0.0));
        assert!(!hrep.contains(&Vector2::new(1.2, 2.0), 0.0));
        assert!(!hrep.contains(&Vector2::new(0.0, 0.0), 0.0));
    }

    #[test]
    fn world_hrep_rotates_with_yaw() {
        let mut c = flat_contact(0.0, 0.0, Surface::LeftFootCenter);
        c.pose = Pose::from_yaw_translation(std::f64::consts::FRAC_PI_2, Vector3::zeros());
        let hrep = c.hrep();
        // After a 90 degree yaw the long axis points along world y.
        assert!(hrep.contains(&Vector2::new(0.0, 0.09), 1e-9));
        assert!(!hrep.contains(&Vector2::new(0.09, 0.0), 1e-9));
    }

    // ---- mutation helpers ----

    #[test]
    fn add_noise_displaces_by_magnitude() {
        let c = flat_contact(0.0, 0.0, Surface::LeftFootCenter);
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let noised = c.add_noise(0.02, &mut rng);
        let displacement = noised.position() - c.position();
        assert_relative_eq!(displacement.norm(), 0.02, epsilon = 1e-12);
        // The source contact is left unchanged.
        assert_relative_eq!(c.position(), Vector3::zeros(), epsilon = 1e-12);
    }

    #[test]
    fn surface_parse_roundtrip() {
        for surface in [Surface::LeftFootCenter, Surface::RightFootCenter] {
            assert_eq!(Surface::parse(surface.as_str()), Some(surface));
        }
        assert_eq!(Surface::parse("Torso"), None);
    }
}

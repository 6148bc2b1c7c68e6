//! Footstep plans.
//!
//! A [`FootstepPlan`] is an ordered sequence of [`Contact`]s (insertion order
//! is walking order) plus the phase timing and swing parameters shared by
//! every step. The plan keeps a cursor over the sequence; the orchestrating
//! state machine advances it as steps complete and watches the contact-id
//! predicates [`FootstepPlan::is_last_dsp`] / [`FootstepPlan::is_last_ssp`]
//! for the terminal phases.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::contact::Contact;
use crate::error::PlanError;
use crate::sole::Sole;
use crate::spatial::Pose;

/// Optional per-plan MPC weight overrides.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MpcWeightsOverride {
    pub jerk: Option<f64>,
    pub vel: Option<[f64; 2]>,
    pub zmp: Option<f64>,
}

/// An ordered footstep sequence with its timing parameters.
#[derive(Clone, Debug)]
pub struct FootstepPlan {
    name: String,
    contacts: Vec<Contact>,

    /// Duration of intermediate double-support phases, in seconds.
    pub double_support_duration: f64,
    /// Duration of single-support phases, in seconds.
    pub single_support_duration: f64,
    /// Duration of the initial double-support phase, in seconds.
    pub init_dsp_duration: f64,
    /// Duration of the final double-support phase, in seconds.
    pub final_dsp_duration: f64,
    /// Swing foot apex height, in meters.
    pub swing_height: f64,
    /// Swing takeoff duration fraction, in seconds.
    pub takeoff_duration: f64,
    /// Swing landing duration fraction, in seconds.
    pub landing_duration: f64,
    /// Swing takeoff offset in the support frame, in meters.
    pub takeoff_offset: Vector3<f64>,
    /// Foot pitch at takeoff, in radians.
    pub takeoff_pitch: f64,
    /// Foot pitch at landing, in radians.
    pub landing_pitch: f64,
    /// Target CoM height above the support contact, in meters.
    pub com_height: f64,
    /// Optional torso pitch override, in radians.
    pub torso_pitch: Option<f64>,
    /// Optional MPC weight overrides applied when the plan is selected.
    pub mpc: Option<MpcWeightsOverride>,

    // Cursor state. `cursor` is the index of the contact currently being
    // stepped to; the four stored contacts wrap to earlier ones at the plan
    // boundaries so that the id-comparison predicates work.
    cursor: usize,
    prev_contact: Contact,
    support_contact: Contact,
    target_contact: Contact,
    next_contact: Contact,
}

impl FootstepPlan {
    /// Build a plan from its contact sequence. Contacts are renumbered in
    /// walking order. Plans with fewer than two contacts are rejected.
    pub fn new(name: impl Into<String>, mut contacts: Vec<Contact>) -> Result<Self, PlanError> {
        if contacts.len() < 2 {
            return Err(PlanError::TooFewContacts {
                got: contacts.len(),
            });
        }
        for (i, contact) in contacts.iter_mut().enumerate() {
            contact.id = i as u32;
        }
        let mut plan = Self {
            name: name.into(),
            double_support_duration: 0.2,
            single_support_duration: 0.8,
            init_dsp_duration: 0.6,
            final_dsp_duration: 0.6,
            swing_height: 0.04,
            takeoff_duration: 0.42,
            landing_duration: 0.15,
            takeoff_offset: Vector3::zeros(),
            takeoff_pitch: 0.0,
            landing_pitch: 0.0,
            com_height: 0.8,
            torso_pitch: None,
            mpc: None,
            cursor: 0,
            prev_contact: contacts[0].clone(),
            support_contact: contacts[0].clone(),
            target_contact: contacts[1].clone(),
            next_contact: contacts[0].clone(),
            contacts,
        };
        plan.rewind();
        Ok(plan)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// Fill in missing contact patch half-dimensions from the sole defaults.
    pub fn complete(&mut self, sole: &Sole) {
        for contact in &mut self.contacts {
            if contact.half_length < 1e-4 {
                contact.half_length = sole.half_length;
            }
            if contact.half_width < 1e-4 {
                contact.half_width = sole.half_width;
            }
        }
        self.reset(self.cursor.saturating_sub(1).min(self.contacts.len() - 2));
    }

    /// Re-anchor the whole plan so that its first two contacts coincide with
    /// the robot's current feet.
    ///
    /// The planar (x, y, yaw) transform between the plan's initial stance
    /// mid-frame and the measured feet mid-frame is applied to every contact,
    /// preserving relative step geometry; the initial ground height is pinned
    /// to `init_height`.
    pub fn update_initial_transform(
        &mut self,
        x_0_left: &Pose,
        x_0_right: &Pose,
        init_height: f64,
    ) {
        let x_0_mid_feet = Pose::interpolate(x_0_left, x_0_right, 0.5);
        let x_0_mid_plan = Pose::interpolate(&self.contacts[0].pose, &self.contacts[1].pose, 0.5);

        let delta_yaw = x_0_mid_feet.yaw() - x_0_mid_plan.yaw();
        let (cy, sy) = (delta_yaw.cos(), delta_yaw.sin());
        let rotate_xy = |v: Vector3<f64>| -> Vector3<f64> {
            Vector3::new(cy * v.x - sy * v.y, sy * v.x + cy * v.y, v.z)
        };

        let plan_mid = x_0_mid_plan.translation;
        let feet_mid = x_0_mid_feet.translation;
        let z0 = self.contacts[0].pose.translation.z;
        for contact in &mut self.contacts {
            let local = contact.pose.translation - plan_mid;
            let mut translation = feet_mid + rotate_xy(local);
            translation.z = init_height + (contact.pose.translation.z - z0);
            contact.pose = Pose::from_yaw_translation(contact.pose.yaw() + delta_yaw, translation);
        }
        self.reset(self.cursor.saturating_sub(1).min(self.contacts.len() - 2));
    }

    /// Reset the cursor to the start of the plan.
    pub fn rewind(&mut self) {
        self.reset(0);
    }

    /// Reset the cursor so that `contacts[start]` is the support contact.
    pub fn reset(&mut self, start: usize) {
        let n = self.contacts.len();
        let start = start.min(n - 2);
        self.cursor = start + 1;
        self.prev_contact = self.contacts[start.saturating_sub(1)].clone();
        self.support_contact = self.contacts[start].clone();
        self.target_contact = self.contacts[start + 1].clone();
        self.next_contact = if start + 2 < n {
            self.contacts[start + 2].clone()
        } else {
            // Wrap to an earlier contact: id inversion signals the last step.
            self.prev_contact.clone()
        };
    }

    /// Advance the cursor after the current target contact has been reached.
    ///
    /// Advancing past the final target shifts an earlier contact into the
    /// target slot, which is what flips [`FootstepPlan::is_last_dsp`].
    pub fn goto_next_footstep(&mut self) -> Result<(), PlanError> {
        if self.cursor >= self.contacts.len() {
            return Err(PlanError::PastEnd);
        }
        self.prev_contact = self.support_contact.clone();
        self.support_contact = self.target_contact.clone();
        self.target_contact = self.next_contact.clone();
        self.cursor += 1;
        let next_step = self.cursor + 1;
        self.next_contact = if next_step < self.contacts.len() {
            self.contacts[next_step].clone()
        } else {
            self.prev_contact.clone()
        };
        Ok(())
    }

    /// Move the cursor one footstep back (re-planning helper).
    pub fn restore_previous_footstep(&mut self) {
        self.reset(self.cursor.saturating_sub(2));
    }

    pub fn prev_contact(&self) -> &Contact {
        &self.prev_contact
    }

    pub fn support_contact(&self) -> &Contact {
        &self.support_contact
    }

    pub fn target_contact(&self) -> &Contact {
        &self.target_contact
    }

    pub fn next_contact(&self) -> &Contact {
        &self.next_contact
    }

    /// True after the last step: the final double support phase.
    pub fn is_last_dsp(&self) -> bool {
        self.support_contact.id > self.target_contact.id
    }

    /// True during the last step: the final single support phase.
    pub fn is_last_ssp(&self) -> bool {
        self.target_contact.id > self.next_contact.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::Surface;
    use approx::assert_relative_eq;

    fn stance_contact(x: f64, y: f64, surface: Surface) -> Contact {
        Contact::new(Pose::from_translation(Vector3::new(x, y, 0.0)), surface)
    }

    fn four_step_plan() -> FootstepPlan {
        FootstepPlan::new(
            "test",
            vec![
                stance_contact(0.0, 0.09, Surface::LeftFootCenter),
                stance_contact(0.0, -0.09, Surface::RightFootCenter),
                stance_contact(0.2, 0.09, Surface::LeftFootCenter),
                stance_contact(0.2, -0.09, Surface::RightFootCenter),
            ],
        )
        .unwrap()
    }

    // ---- construction ----

    #[test]
    fn plans_with_fewer_than_two_contacts_are_rejected() {
        let err = FootstepPlan::new(
            "tiny",
            vec![stance_contact(0.0, 0.0, Surface::LeftFootCenter)],
        )
        .unwrap_err();
        assert_eq!(err, PlanError::TooFewContacts { got: 1 });
    }

    #[test]
    fn contacts_are_renumbered_in_walking_order() {
        let plan = four_step_plan();
        for (i, contact) in plan.contacts().iter().enumerate() {
            assert_eq!(contact.id, i as u32);
        }
    }

    // ---- cursor advance / terminal predicates ----

    #[test]
    fn rewind_points_at_first_step() {
        let plan = four_step_plan();
        assert_eq!(plan.support_contact().id, 0);
        assert_eq!(plan.target_contact().id, 1);
        assert_eq!(plan.next_contact().id, 2);
        assert!(!plan.is_last_dsp());
        assert!(!plan.is_last_ssp());
    }

    #[test]
    fn terminal_dsp_is_reached_exactly_once_at_the_final_step() {
        let mut plan = four_step_plan();
        plan.rewind();
        let mut transitions = 0;
        let mut steps = 0;
        while !plan.is_last_dsp() {
            assert!(
                plan.support_contact().id <= plan.target_contact().id,
                "terminal inversion before the final step"
            );
            plan.goto_next_footstep().unwrap();
            steps += 1;
            if plan.is_last_dsp() {
                transitions += 1;
            }
            assert!(steps <= 10, "plan never terminated");
        }
        assert_eq!(transitions, 1);
        // All three walking steps were consumed.
        assert_eq!(steps, 3);
    }

    #[test]
    fn last_ssp_flags_during_final_step_only() {
        let mut plan = four_step_plan();
        assert!(!plan.is_last_ssp());
        plan.goto_next_footstep().unwrap(); // stepping to contact 2
        assert!(!plan.is_last_ssp());
        plan.goto_next_footstep().unwrap(); // stepping to contact 3 (final)
        assert!(plan.is_last_ssp());
        assert!(!plan.is_last_dsp());
    }

    #[test]
    fn two_contact_plan_is_immediately_in_its_last_step() {
        let plan = FootstepPlan::new(
            "pair",
            vec![
                stance_contact(0.0, 0.09, Surface::LeftFootCenter),
                stance_contact(0.0, -0.09, Surface::RightFootCenter),
            ],
        )
        .unwrap();
        assert!(plan.is_last_ssp());
        assert!(!plan.is_last_dsp());
    }

    #[test]
    fn advancing_past_the_end_errors() {
        let mut plan = four_step_plan();
        while plan.goto_next_footstep().is_ok() {}
        assert!(plan.is_last_dsp());
        assert_eq!(plan.goto_next_footstep(), Err(PlanError::PastEnd));
    }

    #[test]
    fn restore_previous_footstep_steps_back() {
        let mut plan = four_step_plan();
        plan.goto_next_footstep().unwrap();
        let support_id = plan.support_contact().id;
        plan.goto_next_footstep().unwrap();
        plan.restore_previous_footstep();
        assert_eq!(plan.support_contact().id, support_id);
    }

    // ---- complete ----

    #[test]
    fn complete_fills_missing_patch_dimensions() {
        let mut plan = four_step_plan();
        let sole = Sole::default();
        plan.complete(&sole);
        for contact in plan.contacts() {
            assert_relative_eq!(contact.half_length, sole.half_length);
            assert_relative_eq!(contact.half_width, sole.half_width);
        }
    }

    #[test]
    fn complete_preserves_explicit_dimensions() {
        let mut contacts = vec![
            stance_contact(0.0, 0.09, Surface::LeftFootCenter),
            stance_contact(0.0, -0.09, Surface::RightFootCenter),
        ];
        contacts[0].half_length = 0.2;
        let mut plan = FootstepPlan::new("custom", contacts).unwrap();
        plan.complete(&Sole::default());
        assert_relative_eq!(plan.contacts()[0].half_length, 0.2);
    }

    // ---- update_initial_transform ----

    #[test]
    fn update_initial_transform_anchors_first_stance_to_feet() {
        let mut plan = four_step_plan();
        let left = Pose::from_translation(Vector3::new(1.0, 0.59, 0.0));
        let right = Pose::from_translation(Vector3::new(1.0, 0.41, 0.0));
        plan.update_initial_transform(&left, &right, 0.0);
        assert_relative_eq!(
            plan.contacts()[0].position(),
            Vector3::new(1.0, 0.59, 0.0),
            epsilon = 1e-9
        );
        assert_relative_eq!(
            plan.contacts()[1].position(),
            Vector3::new(1.0, 0.41, 0.0),
            epsilon = 1e-9
        );
    }

    #[test]
    fn update_initial_transform_preserves_step_geometry() {
        let mut plan = four_step_plan();
        let step = plan.contacts()[2].position() - plan.contacts()[0].position();
        let left = Pose::from_translation(Vector3::new(-0.3, 0.2, 0.0));
        let right = Pose::from_translation(Vector3::new(-0.3, 0.02, 0.0));
        plan.update_initial_transform(&left, &right, 0.0);
        let new_step = plan.contacts()[2].position() - plan.contacts()[0].position();
        assert_relative_eq!(new_step, step, epsilon = 1e-9);
    }

    #[test]
    fn update_initial_transform_applies_yaw() {
        let mut plan = four_step_plan();
        let yaw = std::f64::consts::FRAC_PI_2;
        let left = Pose::from_yaw_translation(yaw, Vector3::new(0.0, 0.09, 0.0));
        let right = Pose::from_yaw_translation(yaw, Vector3::new(0.0, -0.09, 0.0));
        // Mid-frames coincide at the origin; only the yaw differs.
        let mut mid_left = left;
        let mut mid_right = right;
        mid_left.translation = Vector3::new(-0.09, 0.0, 0.0);
        mid_right.translation = Vector3::new(0.09, 0.0, 0.0);
        plan.update_initial_transform(&mid_left, &mid_right, 0.0);
        // A quarter-turn left maps the forward step (x += 0.2) onto y += 0.2.
        let step = plan.contacts()[2].position() - plan.contacts()[0].position();
        assert_relative_eq!(step, Vector3::new(0.0, 0.2, 0.0), epsilon = 1e-9);
        assert_relative_eq!(plan.contacts()[0].pose.yaw(), yaw, epsilon = 1e-9);
    }

    #[test]
    fn update_initial_transform_pins_ground_height() {
        let mut plan = four_step_plan();
        let left = Pose::from_translation(Vector3::new(0.0, 0.09, 0.3));
        let right = Pose::from_translation(Vector3::new(0.0, -0.09, 0.3));
        plan.update_initial_transform(&left, &right, 0.12);
        assert_relative_eq!(plan.contacts()[0].z(), 0.12, epsilon = 1e-9);
        assert_relative_eq!(plan.contacts()[3].z(), 0.12, epsilon = 1e-9);
    }
}

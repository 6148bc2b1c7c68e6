//! Balance feedback for biped walking.
//!
//! The [`Stabilizer`] runs once per control cycle in a fixed sequence:
//!
//! 1. clamp gains to their safety ranges
//! 2. detect whether the robot is airborne
//! 3. update support foot task gains for the contact state
//! 4. recompute the ZMP support frame and area
//! 5. compute a desired net wrench (LIP or VHIP template model)
//! 6. distribute it over the support feet (weighted least-squares QPs under
//!    contact wrench cone and pressure constraints)
//! 7. derive CoM admittance corrections (ZMP compensation + altitude)
//! 8. apply foot force difference control
//!
//! Outputs are task targets (CoM references, per-foot CoP/force targets and
//! reference velocities) consumed by an external whole-body solver.

pub mod gains;
pub mod model;
pub mod stabilizer;
pub mod task;

pub use gains::{StabilizerConfig, StabilizerGains, TemplateModelKind};
pub use model::{LipFeedback, TemplateModel, VhipFeedback, WrenchModel, WrenchModelInput};
pub use stabilizer::Stabilizer;
pub use task::{FootTask, TaskGains};

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Grants every staff member access to every Ready project workspace.
//!
//! Any change to the staff roster, and any project workspace becoming Ready,
//! triggers a full rebuild: the desired subject list is computed from the
//! complete roster and written to the access binding of every workspace.

mod forward;
mod index;
mod metrics;
mod store;
mod sweep;
mod trigger;

#[cfg(test)]
mod tests;

pub use self::{
    forward::{ProjectForwarder, SharedForwarder},
    index::{is_relevant_change, SharedIndex, StaffIndex},
    metrics::SweepMetrics,
    store::{KubeStaffMembers, StaffMembers},
    sweep::{desired_subjects, Config, Error, StaffAccess, WorkspaceError},
    trigger::Trigger,
};

pub const CONTROLLER_NAME: &str = "staff-access";

use maintainerd_access_controller_core::ResourceId;
use std::fmt;

/// The key name shared by every sweep triggered by a workspace.
pub const WORKSPACE_TRIGGER: &str = "workspace-trigger";

/// Identifies why a sweep was requested.
///
/// Every workspace readiness event maps to the same [`Trigger::Workspaces`]
/// key so that they coalesce in the work queue.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Trigger {
    StaffMember(ResourceId),
    Workspaces,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaffMember(id) => id.fmt(f),
            Self::Workspaces => f.write_str(WORKSPACE_TRIGGER),
        }
    }
}

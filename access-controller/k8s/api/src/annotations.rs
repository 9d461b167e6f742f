//! Annotation and label keys exchanged with other maintainerd components.

use std::collections::BTreeMap;

pub type Map = BTreeMap<String, String>;

/// Identifies objects owned by the access controller.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "maintainer-d.cncf.io/managed-by";
pub const OPERATOR_ID: &str = "maintainerd-access-controller";

// Project annotations, written by the workspace lifecycle controller.
pub const WORKSPACE_NAME: &str = "maintainer-d.cncf.io/workspace-name";
pub const WORKSPACE_URL: &str = "maintainer-d.cncf.io/workspace-url";
pub const WORKSPACE_PHASE: &str = "maintainer-d.cncf.io/workspace-phase";

// StaffMember annotations, written by the staff access controller.
pub const LAST_SYNCED: &str = "maintainer-d.cncf.io/last-synced";
pub const SYNC_STATUS: &str = "maintainer-d.cncf.io/sync-status";
pub const WORKSPACE_COUNT: &str = "maintainer-d.cncf.io/workspace-count";

/// The annotations the staff access controller writes back onto the
/// StaffMember that triggered a sweep.
pub const SYNC_ANNOTATIONS: [&str; 3] = [LAST_SYNCED, SYNC_STATUS, WORKSPACE_COUNT];

// Access binding annotations.
pub const STAFF_COUNT: &str = "maintainer-d.cncf.io/staff-count";
pub const SOURCE_NAMESPACE: &str = "maintainer-d.cncf.io/source-namespace";

/// Records the Project a remote workspace was provisioned for.
pub const PROJECT: &str = "maintainer-d.cncf.io/project";

/// Returns a copy of `annotations` without the keys written by the staff
/// access controller.
pub fn without_sync(annotations: &Map) -> Map {
    annotations
        .iter()
        .filter(|(k, _)| !SYNC_ANNOTATIONS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Returns true if `labels` marks an object as owned by this controller.
pub fn is_managed(labels: &Map) -> bool {
    labels.get(MANAGED_BY_LABEL).map(String::as_str) == Some(OPERATOR_ID)
}

pub fn managed_labels() -> Map {
    Some((MANAGED_BY_LABEL.to_string(), OPERATOR_ID.to_string()))
        .into_iter()
        .collect()
}

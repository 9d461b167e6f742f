use crate::{ACCESS_BINDING_NAME, STAFF_ROLE};
use chrono::{DateTime, SecondsFormat, Utc};
use maintainerd_access_controller_k8s_api::{
    annotations, ClusterRoleBinding, ObjectMeta, RoleRef, Subject,
};

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// Builds the desired access binding.
///
/// When `existing` is set, its metadata (resource version, uid, unrelated
/// labels and annotations) is preserved and only the subjects, role and
/// controller-owned metadata are overwritten.
pub fn desired(
    existing: Option<ClusterRoleBinding>,
    subjects: &[String],
    source_namespace: &str,
    now: DateTime<Utc>,
) -> ClusterRoleBinding {
    let mut binding = existing.unwrap_or_else(|| ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(ACCESS_BINDING_NAME.to_string()),
            ..Default::default()
        },
        ..Default::default()
    });

    binding
        .metadata
        .labels
        .get_or_insert_with(Default::default)
        .extend(annotations::managed_labels());

    let annos = binding
        .metadata
        .annotations
        .get_or_insert_with(Default::default);
    annos.insert(
        annotations::LAST_SYNCED.to_string(),
        now.to_rfc3339_opts(SecondsFormat::Secs, true),
    );
    annos.insert(
        annotations::STAFF_COUNT.to_string(),
        subjects.len().to_string(),
    );
    annos.insert(
        annotations::MANAGED_BY.to_string(),
        annotations::OPERATOR_ID.to_string(),
    );
    annos.insert(
        annotations::SOURCE_NAMESPACE.to_string(),
        source_namespace.to_string(),
    );

    binding.role_ref = role_ref();
    // An empty list is kept as an empty binding rather than removed.
    binding.subjects = Some(
        subjects
            .iter()
            .map(|name| Subject {
                api_group: Some(RBAC_API_GROUP.to_string()),
                kind: "User".to_string(),
                name: name.clone(),
                namespace: None,
            })
            .collect(),
    );
    binding
}

pub fn role_ref() -> RoleRef {
    RoleRef {
        api_group: RBAC_API_GROUP.to_string(),
        kind: "ClusterRole".to_string(),
        name: STAFF_ROLE.to_string(),
    }
}

/// Returns the subject names granted by a binding.
pub fn subject_names(binding: &ClusterRoleBinding) -> Vec<String> {
    binding
        .subjects
        .iter()
        .flatten()
        .map(|s| s.name.clone())
        .collect()
}

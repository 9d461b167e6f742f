use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A logical cluster in the remote control plane.
///
/// Workspaces are cluster-scoped objects in their parent workspace; the
/// parent is selected by the logical path the client is connected to.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "tenancy.kcp.io",
    version = "v1alpha1",
    kind = "Workspace",
    status = "WorkspaceStatus"
)]
pub struct WorkspaceSpec {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_ref: Option<WorkspaceTypeReference>,
    /// Set by the remote control plane once the workspace is scheduled.
    #[serde(rename = "URL", skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct WorkspaceTypeReference {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct WorkspaceStatus {
    pub phase: Option<String>,
}

/// Lifecycle phase of a remote workspace, as recorded on its Project.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum WorkspacePhase {
    /// The workspace has not reported a phase yet.
    Pending,
    Scheduling,
    Initializing,
    Ready,
    Unavailable,
    Failed,
    Unknown(String),
}

// === impl Workspace ===

impl Workspace {
    pub fn phase(&self) -> WorkspacePhase {
        self.status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .into()
    }

    pub fn url(&self) -> Option<&str> {
        self.spec.url.as_deref().filter(|u| !u.is_empty())
    }
}

// === impl WorkspacePhase ===

impl WorkspacePhase {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Terminal phases need operator intervention and are not polled.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "Pending",
            Self::Scheduling => "Scheduling",
            Self::Initializing => "Initializing",
            Self::Ready => "Ready",
            Self::Unavailable => "Unavailable",
            Self::Failed => "Failed",
            Self::Unknown(phase) => phase,
        }
    }
}

impl From<Option<&str>> for WorkspacePhase {
    fn from(phase: Option<&str>) -> Self {
        match phase {
            None | Some("") | Some("Pending") => Self::Pending,
            Some("Scheduling") => Self::Scheduling,
            Some("Initializing") => Self::Initializing,
            Some("Ready") => Self::Ready,
            Some("Unavailable") => Self::Unavailable,
            Some("Failed") => Self::Failed,
            Some(other) => Self::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for WorkspacePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_round_trips_through_annotation_value() {
        for phase in [
            WorkspacePhase::Pending,
            WorkspacePhase::Scheduling,
            WorkspacePhase::Initializing,
            WorkspacePhase::Ready,
            WorkspacePhase::Unavailable,
            WorkspacePhase::Failed,
            WorkspacePhase::Unknown("Deleting".to_string()),
        ] {
            assert_eq!(WorkspacePhase::from(Some(phase.as_str())), phase);
        }
        assert_eq!(WorkspacePhase::from(None), WorkspacePhase::Pending);
    }

    #[test]
    fn deserializes_remote_object() {
        let ws: Workspace = serde_json::from_value(serde_json::json!({
            "apiVersion": "tenancy.kcp.io/v1alpha1",
            "kind": "Workspace",
            "metadata": { "name": "zot" },
            "spec": {
                "type": { "name": "cncf-project", "path": "root" },
                "URL": "https://kcp.example.com/clusters/root:zot",
            },
            "status": { "phase": "Ready" },
        }))
        .expect("workspace must deserialize");

        assert!(ws.phase().is_ready());
        assert_eq!(ws.url(), Some("https://kcp.example.com/clusters/root:zot"));
        assert_eq!(
            ws.spec.type_ref,
            Some(WorkspaceTypeReference {
                name: "cncf-project".to_string(),
                path: Some("root".to_string()),
            })
        );
    }
}

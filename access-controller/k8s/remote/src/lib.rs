#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Access to the remote control plane that hosts project workspaces.

pub mod binding;
mod client;
pub mod config;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod path;

pub use self::{
    client::{KubeConnector, KubeRemote},
    config::{ConfigError, ConfigRef, RemoteConfig},
};
use maintainerd_access_controller_k8s_api::{self as k8s, Workspace, WorkspacePhase};

/// The access binding maintained in every workspace.
pub const ACCESS_BINDING_NAME: &str = "cncf-staff-access";

/// The cluster role granted to staff in every workspace.
pub const STAFF_ROLE: &str = "cluster-admin";

/// Prefix applied to staff emails to form binding subjects.
pub const SUBJECT_PREFIX: &str = "oidc:";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid remote configuration: {0}")]
    Config(#[from] ConfigError),

    /// The local cluster could not be read while loading configuration.
    #[error("failed to read remote configuration: {0}")]
    Local(#[source] kube::Error),

    #[error("remote API request failed: {0}")]
    Api(#[source] kube::Error),

    /// A create-or-update kept racing with another writer.
    #[error("access binding in workspace {workspace} is contended")]
    Contended { workspace: String },

    /// The workspace name derived for a project is already used by another
    /// project.
    #[error("workspace {workspace} belongs to project {owner}, not {project}")]
    Collision {
        workspace: String,
        project: String,
        owner: String,
    },
}

/// A workspace as seen by the controllers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkspaceInfo {
    pub name: String,
    pub phase: WorkspacePhase,
    pub url: Option<String>,
    pub managed: bool,
    /// The project recorded on the workspace when it was requested.
    pub project: Option<String>,
}

/// Operations against the remote control plane, relative to the configured
/// root workspace.
#[async_trait::async_trait]
pub trait RemoteCluster: Send + Sync + 'static {
    async fn get_workspace(&self, name: &str) -> Result<Option<WorkspaceInfo>, Error>;

    /// Creates a workspace for `project`. If the workspace already exists it
    /// is returned unchanged.
    async fn create_workspace(&self, name: &str, project: &str) -> Result<WorkspaceInfo, Error>;

    /// Lists the workspaces owned by this controller that are Ready.
    async fn list_managed_workspaces(&self) -> Result<Vec<WorkspaceInfo>, Error>;

    /// Ensures the workspace's access binding grants the staff role to
    /// exactly `subjects`.
    async fn create_or_update_access_binding(
        &self,
        workspace: &str,
        subjects: &[String],
    ) -> Result<(), Error>;
}

/// Establishes a session with the remote control plane.
///
/// Configuration is resolved on every connection so that credential
/// rotations are picked up without a restart.
#[async_trait::async_trait]
pub trait Connect: Send + Sync + 'static {
    type Remote: RemoteCluster;

    async fn connect(&self) -> Result<Self::Remote, Error>;
}

// === impl Error ===

impl Error {
    /// Configuration errors need operator intervention.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Name collisions are not resolved by retrying.
    pub fn is_collision(&self) -> bool {
        matches!(self, Self::Collision { .. })
    }
}

// === impl WorkspaceInfo ===

impl From<&Workspace> for WorkspaceInfo {
    fn from(ws: &Workspace) -> Self {
        use k8s::ResourceExt;

        Self {
            name: ws.name_any(),
            phase: ws.phase(),
            url: ws.url().map(ToString::to_string),
            managed: k8s::annotations::is_managed(ws.labels()),
            project: ws.annotations().get(k8s::annotations::PROJECT).cloned(),
        }
    }
}

/// Accepts an existing workspace for `project` unless it was requested for a
/// different project.
pub fn claim(ws: WorkspaceInfo, project: &str) -> Result<WorkspaceInfo, Error> {
    match ws.project.as_deref() {
        Some(owner) if owner != project => Err(Error::Collision {
            workspace: ws.name,
            project: project.to_string(),
            owner: owner.to_string(),
        }),
        _ => Ok(ws),
    }
}

/// Filters listed workspaces to those that can receive access bindings.
pub fn managed_ready(workspaces: impl IntoIterator<Item = WorkspaceInfo>) -> Vec<WorkspaceInfo> {
    workspaces
        .into_iter()
        .filter(|ws| ws.managed && ws.phase.is_ready())
        .collect()
}

/// Maps an email address to a binding subject.
pub fn subject(email: &str) -> String {
    format!("{SUBJECT_PREFIX}{email}")
}

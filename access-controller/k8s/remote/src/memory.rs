//! An in-memory remote control plane for controller tests.

use crate::{
    binding, ConfigError, Connect, Error, RemoteCluster, WorkspaceInfo, ACCESS_BINDING_NAME,
};
use maintainerd_access_controller_k8s_api::{ClusterRoleBinding, ErrorResponse, WorkspacePhase};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

#[derive(Clone, Debug)]
pub struct InMemory {
    source_namespace: String,
    state: Arc<Mutex<State>>,
}

#[derive(Debug, Default)]
struct State {
    workspaces: BTreeMap<String, WorkspaceInfo>,
    bindings: BTreeMap<String, ClusterRoleBinding>,
    binding_writes: BTreeMap<String, usize>,
    creates: usize,
    failing: BTreeSet<String>,
    unreachable: bool,
    misconfigured: bool,
}

// === impl InMemory ===

impl Default for InMemory {
    fn default() -> Self {
        Self::new("maintainerd")
    }
}

impl InMemory {
    pub fn new(source_namespace: impl ToString) -> Self {
        Self {
            source_namespace: source_namespace.to_string(),
            state: Default::default(),
        }
    }

    /// Adds a workspace as if it had been provisioned out of band.
    pub fn add_workspace(&self, name: &str, phase: WorkspacePhase, managed: bool) {
        let url = Some(format!("https://kcp.test/clusters/root:{name}"));
        self.state.lock().workspaces.insert(
            name.to_string(),
            WorkspaceInfo {
                name: name.to_string(),
                phase,
                url,
                managed,
                project: None,
            },
        );
    }

    pub fn set_phase(&self, name: &str, phase: WorkspacePhase, url: Option<&str>) {
        if let Some(ws) = self.state.lock().workspaces.get_mut(name) {
            ws.phase = phase;
            ws.url = url.map(ToString::to_string);
        }
    }

    pub fn workspace(&self, name: &str) -> Option<WorkspaceInfo> {
        self.state.lock().workspaces.get(name).cloned()
    }

    pub fn workspace_names(&self) -> Vec<String> {
        self.state.lock().workspaces.keys().cloned().collect()
    }

    /// The number of create requests that actually created a workspace.
    pub fn creates(&self) -> usize {
        self.state.lock().creates
    }

    pub fn binding(&self, workspace: &str) -> Option<ClusterRoleBinding> {
        self.state.lock().bindings.get(workspace).cloned()
    }

    pub fn set_binding(&self, workspace: &str, binding: ClusterRoleBinding) {
        self.state
            .lock()
            .bindings
            .insert(workspace.to_string(), binding);
    }

    /// The subjects currently bound in a workspace, if it has a binding.
    pub fn subjects(&self, workspace: &str) -> Option<Vec<String>> {
        self.binding(workspace).map(|b| binding::subject_names(&b))
    }

    pub fn binding_writes(&self, workspace: &str) -> usize {
        self.state
            .lock()
            .binding_writes
            .get(workspace)
            .copied()
            .unwrap_or(0)
    }

    /// Makes binding updates in a workspace fail.
    pub fn fail_workspace(&self, workspace: &str, fail: bool) {
        let mut state = self.state.lock();
        if fail {
            state.failing.insert(workspace.to_string());
        } else {
            state.failing.remove(workspace);
        }
    }

    /// Makes every remote request fail.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    /// Makes connecting fail with a configuration error.
    pub fn set_misconfigured(&self, misconfigured: bool) {
        self.state.lock().misconfigured = misconfigured;
    }

    fn check_reachable(&self) -> Result<(), Error> {
        if self.state.lock().unreachable {
            return Err(unavailable("remote control plane is unreachable"));
        }
        Ok(())
    }
}

fn unavailable(message: &str) -> Error {
    Error::Api(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: "ServiceUnavailable".to_string(),
        code: 503,
    }))
}

#[async_trait::async_trait]
impl Connect for InMemory {
    type Remote = InMemory;

    async fn connect(&self) -> Result<InMemory, Error> {
        if self.state.lock().misconfigured {
            return Err(ConfigError::MissingKey {
                kind: "ConfigMap",
                name: "kdp-workspaces".to_string(),
                key: crate::config::WORKSPACE_TYPE_KEY,
            }
            .into());
        }
        Ok(self.clone())
    }
}

#[async_trait::async_trait]
impl RemoteCluster for InMemory {
    async fn get_workspace(&self, name: &str) -> Result<Option<WorkspaceInfo>, Error> {
        self.check_reachable()?;
        Ok(self.workspace(name))
    }

    async fn create_workspace(&self, name: &str, project: &str) -> Result<WorkspaceInfo, Error> {
        self.check_reachable()?;
        let mut state = self.state.lock();
        if let Some(ws) = state.workspaces.get(name) {
            return crate::claim(ws.clone(), project);
        }
        state.creates += 1;
        let ws = WorkspaceInfo {
            name: name.to_string(),
            phase: WorkspacePhase::Scheduling,
            url: None,
            managed: true,
            project: Some(project.to_string()),
        };
        state.workspaces.insert(name.to_string(), ws.clone());
        Ok(ws)
    }

    async fn list_managed_workspaces(&self) -> Result<Vec<WorkspaceInfo>, Error> {
        self.check_reachable()?;
        let workspaces = self.state.lock().workspaces.values().cloned().collect::<Vec<_>>();
        Ok(crate::managed_ready(workspaces))
    }

    async fn create_or_update_access_binding(
        &self,
        workspace: &str,
        subjects: &[String],
    ) -> Result<(), Error> {
        self.check_reachable()?;
        let mut state = self.state.lock();
        if state.failing.contains(workspace) {
            return Err(unavailable(&format!("workspace {workspace} is unavailable")));
        }

        let existing = state.bindings.remove(workspace);
        let mut desired = binding::desired(
            existing,
            subjects,
            &self.source_namespace,
            chrono::Utc::now(),
        );
        desired.metadata.name = Some(ACCESS_BINDING_NAME.to_string());
        state.bindings.insert(workspace.to_string(), desired);
        *state
            .binding_writes
            .entry(workspace.to_string())
            .or_default() += 1;
        Ok(())
    }
}

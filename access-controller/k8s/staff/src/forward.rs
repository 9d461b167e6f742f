use crate::Trigger;
use ahash::AHashMap as HashMap;
use maintainerd_access_controller_core::{Queue, ResourceId};
use maintainerd_access_controller_k8s_api::{annotations, Project, ResourceExt, WorkspacePhase};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

pub type SharedForwarder = Arc<RwLock<ProjectForwarder>>;

/// Forwards workspace readiness, as recorded on Projects by the workspace
/// lifecycle controller, to the staff access controller.
///
/// This stands in for a watch on the remote control plane: each time a
/// project's workspace becomes Ready, the shared [`Trigger::Workspaces`] key
/// is enqueued.
pub struct ProjectForwarder {
    queue: Queue<Trigger>,
    /// Projects whose workspace is Ready, by workspace name.
    ready: HashMap<ResourceId, String>,
}

impl ProjectForwarder {
    pub fn shared(queue: Queue<Trigger>) -> SharedForwarder {
        Arc::new(RwLock::new(Self {
            queue,
            ready: HashMap::new(),
        }))
    }
}

/// Returns the Ready workspace recorded on a project, if any.
fn ready_workspace(project: &Project) -> Option<String> {
    let annos = project.annotations();
    let phase = WorkspacePhase::from(annos.get(annotations::WORKSPACE_PHASE).map(String::as_str));
    if !phase.is_ready() {
        return None;
    }
    annos.get(annotations::WORKSPACE_NAME).cloned()
}

impl kubert::index::IndexNamespacedResource<Project> for ProjectForwarder {
    fn apply(&mut self, project: Project) {
        let namespace = project.namespace().expect("Project must have a namespace");
        let id = ResourceId::new(namespace, project.name_unchecked());

        match ready_workspace(&project) {
            Some(workspace) => {
                if self.ready.get(&id) != Some(&workspace) {
                    debug!(%id, %workspace, "Workspace became ready");
                    self.ready.insert(id, workspace);
                    self.queue.enqueue(Trigger::Workspaces);
                }
            }
            None => {
                self.ready.remove(&id);
            }
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.ready.remove(&ResourceId::new(namespace, name));
    }
}

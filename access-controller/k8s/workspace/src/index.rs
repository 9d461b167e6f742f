use maintainerd_access_controller_core::{Queue, ResourceId};
use maintainerd_access_controller_k8s_api::{Project, ResourceExt};
use parking_lot::RwLock;
use std::sync::Arc;

pub type SharedIndex = Arc<RwLock<ProjectIndex>>;

/// Feeds Project watch events into the lifecycle controller's queue.
pub struct ProjectIndex {
    queue: Queue<ResourceId>,
}

impl ProjectIndex {
    pub fn shared(queue: Queue<ResourceId>) -> SharedIndex {
        Arc::new(RwLock::new(Self { queue }))
    }
}

impl kubert::index::IndexNamespacedResource<Project> for ProjectIndex {
    fn apply(&mut self, project: Project) {
        let namespace = project.namespace().expect("Project must have a namespace");
        self.queue
            .enqueue(ResourceId::new(namespace, project.name_unchecked()));
    }

    // Workspaces are not deleted with their projects.
    fn delete(&mut self, _namespace: String, _name: String) {}
}

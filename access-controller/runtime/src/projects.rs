use crate::{k8s::Project, staff, workspace};
use kubert::index::IndexNamespacedResource;
use parking_lot::RwLock;
use std::sync::Arc;

/// Delivers the Project watch to both controllers: the lifecycle index
/// provisions workspaces and the readiness forwarder triggers access sweeps.
pub(crate) struct ProjectIndexes {
    lifecycle: workspace::SharedIndex,
    readiness: staff::SharedForwarder,
}

impl ProjectIndexes {
    pub(crate) fn shared(
        lifecycle: workspace::SharedIndex,
        readiness: staff::SharedForwarder,
    ) -> Arc<RwLock<Self>> {
        Arc::new(RwLock::new(Self {
            lifecycle,
            readiness,
        }))
    }
}

impl IndexNamespacedResource<Project> for ProjectIndexes {
    fn apply(&mut self, project: Project) {
        self.readiness.write().apply(project.clone());
        self.lifecycle.write().apply(project);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.readiness
            .write()
            .delete(namespace.clone(), name.clone());
        self.lifecycle.write().delete(namespace, name);
    }
}

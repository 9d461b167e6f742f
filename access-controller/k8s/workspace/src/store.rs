use maintainerd_access_controller_core::ResourceId;
use maintainerd_access_controller_k8s_api::{self as k8s, annotations::Map, Project};

const FIELD_MANAGER: &str = "maintainerd-workspace-lifecycle";

/// Local access to Project resources.
#[async_trait::async_trait]
pub trait Projects: Send + Sync + 'static {
    async fn get(&self, id: &ResourceId) -> Result<Option<Project>, k8s::Error>;

    /// Merges `annotations` into the project's annotations in a single patch.
    /// Returns false if the project no longer exists.
    async fn patch_annotations(&self, id: &ResourceId, annotations: &Map)
        -> Result<bool, k8s::Error>;
}

#[derive(Clone)]
pub struct KubeProjects {
    client: k8s::Client,
}

// === impl KubeProjects ===

impl KubeProjects {
    pub fn new(client: k8s::Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> k8s::Api<Project> {
        k8s::Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait::async_trait]
impl Projects for KubeProjects {
    async fn get(&self, id: &ResourceId) -> Result<Option<Project>, k8s::Error> {
        self.api(&id.namespace).get_opt(&id.name).await
    }

    async fn patch_annotations(
        &self,
        id: &ResourceId,
        annotations: &Map,
    ) -> Result<bool, k8s::Error> {
        let patch = serde_json::json!({
            "metadata": {
                "annotations": annotations,
            }
        });
        let params = k8s::PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        match self
            .api(&id.namespace)
            .patch(&id.name, &params, &k8s::Patch::Merge(patch))
            .await
        {
            Ok(_) => Ok(true),
            Err(error) if k8s::is_not_found(&error) => Ok(false),
            Err(error) => Err(error),
        }
    }
}

use maintainerd_access_controller_core::ResourceId;
use maintainerd_access_controller_k8s_api::{self as k8s, annotations::Map, StaffMember};

const FIELD_MANAGER: &str = "maintainerd-staff-access";

/// Local access to StaffMember resources.
#[async_trait::async_trait]
pub trait StaffMembers: Send + Sync + 'static {
    /// Lists the complete staff roster.
    async fn list(&self) -> Result<Vec<StaffMember>, k8s::Error>;

    /// Merges `annotations` into the member's annotations. Returns false if
    /// the member no longer exists.
    async fn patch_annotations(&self, id: &ResourceId, annotations: &Map)
        -> Result<bool, k8s::Error>;
}

#[derive(Clone)]
pub struct KubeStaffMembers {
    client: k8s::Client,
    namespace: String,
}

// === impl KubeStaffMembers ===

impl KubeStaffMembers {
    pub fn new(client: k8s::Client, namespace: impl ToString) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl StaffMembers for KubeStaffMembers {
    async fn list(&self) -> Result<Vec<StaffMember>, k8s::Error> {
        let api = k8s::Api::<StaffMember>::namespaced(self.client.clone(), &self.namespace);
        Ok(api.list(&k8s::ListParams::default()).await?.items)
    }

    async fn patch_annotations(
        &self,
        id: &ResourceId,
        annotations: &Map,
    ) -> Result<bool, k8s::Error> {
        let api = k8s::Api::<StaffMember>::namespaced(self.client.clone(), &id.namespace);
        let patch = serde_json::json!({
            "metadata": {
                "annotations": annotations,
            }
        });
        let params = k8s::PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        match api.patch(&id.name, &params, &k8s::Patch::Merge(patch)).await {
            Ok(_) => Ok(true),
            Err(error) if k8s::is_not_found(&error) => Ok(false),
            Err(error) => Err(error),
        }
    }
}

use crate::{
    binding, path, ConfigRef, Connect, Error, RemoteCluster, RemoteConfig, WorkspaceInfo,
    ACCESS_BINDING_NAME,
};
use maintainerd_access_controller_k8s_api::{
    self as k8s, annotations, ClusterRoleBinding, Workspace, WorkspaceSpec,
};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Each create-or-update re-reads the binding after losing a race; give up
/// after this many attempts and let the next sweep try again.
const MAX_BINDING_ATTEMPTS: usize = 3;

/// Loads the remote configuration from the local cluster and connects.
#[derive(Clone)]
pub struct KubeConnector {
    local: k8s::Client,
    refs: ConfigRef,
    source_namespace: String,
}

/// A session with the remote control plane.
#[derive(Clone)]
pub struct KubeRemote {
    root_path: String,
    workspace_type: String,
    /// Targets the root workspace. Without it, `root` serves every workspace.
    base: Option<kube::Config>,
    root: k8s::Client,
    source_namespace: String,
}

// === impl KubeConnector ===

impl KubeConnector {
    /// `source_namespace` is recorded on every access binding as the origin
    /// of the staff roster.
    pub fn new(local: k8s::Client, refs: ConfigRef, source_namespace: impl ToString) -> Self {
        Self {
            local,
            refs,
            source_namespace: source_namespace.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl Connect for KubeConnector {
    type Remote = KubeRemote;

    async fn connect(&self) -> Result<KubeRemote, Error> {
        let config = RemoteConfig::load(&self.local, &self.refs).await?;
        debug!(?config, "Loaded remote configuration");
        KubeRemote::new(config, self.source_namespace.clone()).await
    }
}

// === impl KubeRemote ===

impl KubeRemote {
    pub async fn new(config: RemoteConfig, source_namespace: String) -> Result<Self, Error> {
        let base = config.client_config().await?;
        let root = k8s::Client::try_from(base.clone()).map_err(Error::Api)?;
        Ok(Self {
            root_path: config.root_path,
            workspace_type: config.workspace_type,
            base: Some(base),
            root,
            source_namespace,
        })
    }

    /// Builds a session whose workspace requests are all sent through
    /// `client`.
    #[cfg(test)]
    fn with_client(client: k8s::Client, root_path: &str, workspace_type: &str) -> Self {
        Self {
            root_path: root_path.to_string(),
            workspace_type: workspace_type.to_string(),
            base: None,
            root: client,
            source_namespace: "maintainerd".to_string(),
        }
    }

    /// Builds a client for the API surface of a child workspace.
    fn workspace_client(&self, workspace: &str) -> Result<k8s::Client, Error> {
        let Some(base) = &self.base else {
            return Ok(self.root.clone());
        };
        let mut config = base.clone();
        config.cluster_url = path::cluster_url(
            &base.cluster_url,
            &path::logical_path(&self.root_path, workspace),
        )?;
        k8s::Client::try_from(config).map_err(Error::Api)
    }

    fn workspaces(&self) -> k8s::Api<Workspace> {
        k8s::Api::all(self.root.clone())
    }

    fn new_workspace(&self, name: &str, project: &str) -> Workspace {
        let mut ws = Workspace::new(
            name,
            WorkspaceSpec {
                type_ref: Some(k8s::workspace::WorkspaceTypeReference {
                    name: self.workspace_type.clone(),
                    path: Some(self.root_path.clone()),
                }),
                ..Default::default()
            },
        );
        ws.metadata.labels = Some(annotations::managed_labels());
        ws.metadata.annotations = Some(BTreeMap::from([
            (annotations::PROJECT.to_string(), project.to_string()),
            (
                annotations::MANAGED_BY.to_string(),
                annotations::OPERATOR_ID.to_string(),
            ),
        ]));
        ws
    }
}

#[async_trait::async_trait]
impl RemoteCluster for KubeRemote {
    async fn get_workspace(&self, name: &str) -> Result<Option<WorkspaceInfo>, Error> {
        let ws = self.workspaces().get_opt(name).await.map_err(Error::Api)?;
        Ok(ws.as_ref().map(WorkspaceInfo::from))
    }

    async fn create_workspace(&self, name: &str, project: &str) -> Result<WorkspaceInfo, Error> {
        let api = self.workspaces();
        let ws = match api
            .create(&k8s::PostParams::default(), &self.new_workspace(name, project))
            .await
        {
            Ok(ws) => {
                info!(workspace = %name, %project, "Created workspace");
                ws
            }
            Err(error) if k8s::is_conflict(&error) => {
                debug!(workspace = %name, "Workspace already exists");
                api.get(name).await.map_err(Error::Api)?
            }
            Err(error) => return Err(Error::Api(error)),
        };

        let info = crate::claim(WorkspaceInfo::from(&ws), project)?;
        if !info.managed {
            warn!(
                workspace = %name,
                %project,
                "Workspace exists but is not managed by this controller"
            );
        }
        Ok(info)
    }

    async fn list_managed_workspaces(&self) -> Result<Vec<WorkspaceInfo>, Error> {
        let selector = format!(
            "{}={}",
            annotations::MANAGED_BY_LABEL,
            annotations::OPERATOR_ID
        );
        let list = self
            .workspaces()
            .list(&k8s::ListParams::default().labels(&selector))
            .await
            .map_err(Error::Api)?;
        Ok(crate::managed_ready(list.items.iter().map(WorkspaceInfo::from)))
    }

    async fn create_or_update_access_binding(
        &self,
        workspace: &str,
        subjects: &[String],
    ) -> Result<(), Error> {
        let api = k8s::Api::<ClusterRoleBinding>::all(self.workspace_client(workspace)?);
        let params = k8s::PostParams::default();

        for attempt in 1..=MAX_BINDING_ATTEMPTS {
            let existing = api
                .get_opt(ACCESS_BINDING_NAME)
                .await
                .map_err(Error::Api)?;
            let exists = existing.is_some();
            let desired = binding::desired(
                existing,
                subjects,
                &self.source_namespace,
                chrono::Utc::now(),
            );

            let res = if exists {
                api.replace(ACCESS_BINDING_NAME, &params, &desired).await
            } else {
                api.create(&params, &desired).await
            };
            match res {
                Ok(_) => {
                    debug!(%workspace, subjects = subjects.len(), "Access binding updated");
                    return Ok(());
                }
                // Deleted, created or updated concurrently: re-read and try again.
                Err(error) if k8s::is_not_found(&error) || k8s::is_conflict(&error) => {
                    debug!(%workspace, attempt, %error, "Access binding changed concurrently");
                }
                Err(error) => return Err(Error::Api(error)),
            }
        }

        Err(Error::Contended {
            workspace: workspace.to_string(),
        })
    }
}

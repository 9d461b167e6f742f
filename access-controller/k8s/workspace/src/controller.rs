use crate::{name::workspace_name, store::Projects};
use maintainerd_access_controller_core::{Action, Reconcile, ResourceId};
use maintainerd_access_controller_k8s_api::{
    self as k8s,
    annotations::{self, Map},
    WorkspacePhase,
};
use maintainerd_access_controller_k8s_remote::{
    self as remote, Connect, RemoteCluster, WorkspaceInfo,
};
use tokio::time::{self, Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Copy, Clone, Debug)]
pub struct Config {
    /// How often a workspace that is not yet Ready is polled.
    pub poll_interval: Duration,
    /// Delay before retrying after a transient failure.
    pub retry_interval: Duration,
    /// Delay before retrying after a configuration error.
    pub config_retry_interval: Duration,
}

/// Reconciles a Project with its remote workspace.
pub struct Lifecycle<C, P> {
    connector: C,
    projects: P,
    config: Config,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Remote(#[from] remote::Error),

    #[error("failed to update project: {0}")]
    Store(#[source] k8s::Error),

    #[error("reconcile deadline exceeded")]
    Timeout,
}

// === impl Config ===

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            retry_interval: Duration::from_secs(10),
            config_retry_interval: Duration::from_secs(300),
        }
    }
}

// === impl Lifecycle ===

impl<C, P> Lifecycle<C, P>
where
    C: Connect,
    P: Projects,
{
    pub fn new(connector: C, projects: P, config: Config) -> Self {
        Self {
            connector,
            projects,
            config,
        }
    }

    async fn sync(&self, id: &ResourceId) -> Result<Action, Error> {
        let Some(project) = self.projects.get(id).await.map_err(Error::Store)? else {
            debug!("Project no longer exists");
            return Ok(Action::Done);
        };
        let current = k8s::ResourceExt::annotations(&project);

        let remote = self.connector.connect().await?;
        let ws = match current.get(annotations::WORKSPACE_NAME) {
            None => {
                let name = workspace_name(&id.name);
                info!(workspace = %name, "Requesting workspace");
                remote.create_workspace(&name, &id.name).await?
            }
            Some(name) => match remote.get_workspace(name).await? {
                Some(ws) => remote::claim(ws, &id.name)?,
                None => {
                    warn!(workspace = %name, "Workspace is missing; requesting it again");
                    remote
                        .create_workspace(&workspace_name(&id.name), &id.name)
                        .await?
                }
            },
        };

        let desired = desired_annotations(&ws);
        let phase = WorkspacePhase::from(
            desired
                .get(annotations::WORKSPACE_PHASE)
                .map(String::as_str),
        );
        if !is_subset(&desired, current) {
            // All three annotations are written together so that a Ready
            // phase is never observed without its URL.
            if !self
                .projects
                .patch_annotations(id, &desired)
                .await
                .map_err(Error::Store)?
            {
                debug!("Project deleted before it could be annotated");
                return Ok(Action::Done);
            }
            info!(workspace = %ws.name, %phase, "Recorded workspace phase");
        }

        if phase.is_ready() {
            return Ok(Action::Done);
        }
        if phase.is_terminal() {
            warn!(workspace = %ws.name, %phase, "Workspace requires operator intervention");
            return Ok(Action::Done);
        }
        Ok(Action::Requeue(self.config.poll_interval))
    }
}

#[async_trait::async_trait]
impl<C, P> Reconcile<ResourceId> for Lifecycle<C, P>
where
    C: Connect,
    P: Projects,
{
    type Error = Error;

    async fn reconcile(&self, id: &ResourceId, deadline: Instant) -> Result<Action, Error> {
        time::timeout_at(deadline, self.sync(id))
            .await
            .map_err(|_| Error::Timeout)?
    }

    fn retry_after(&self, error: &Error, _failures: u32) -> Duration {
        match error {
            Error::Remote(e) if e.is_config() || e.is_collision() => {
                self.config.config_retry_interval
            }
            _ => self.config.retry_interval,
        }
    }
}

/// The annotations that describe `ws` on its Project.
///
/// A workspace is only reported as Ready once its URL is known.
pub(crate) fn desired_annotations(ws: &WorkspaceInfo) -> Map {
    let phase = match (&ws.phase, ws.url.as_deref()) {
        (WorkspacePhase::Ready, None) => WorkspacePhase::Initializing,
        (phase, _) => phase.clone(),
    };
    Map::from([
        (annotations::WORKSPACE_NAME.to_string(), ws.name.clone()),
        (
            annotations::WORKSPACE_URL.to_string(),
            ws.url.clone().unwrap_or_default(),
        ),
        (annotations::WORKSPACE_PHASE.to_string(), phase.to_string()),
    ])
}

fn is_subset(desired: &Map, current: &Map) -> bool {
    desired.iter().all(|(k, v)| current.get(k) == Some(v))
}

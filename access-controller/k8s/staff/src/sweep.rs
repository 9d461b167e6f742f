use crate::{metrics::SweepMetrics, store::StaffMembers, Trigger};
use chrono::{DateTime, SecondsFormat, Utc};
use maintainerd_access_controller_core::{Action, Backoff, Reconcile, ResourceId};
use maintainerd_access_controller_k8s_api::{
    self as k8s,
    annotations::{self, Map},
    staff_member::SyncStatus,
    StaffMember,
};
use maintainerd_access_controller_k8s_remote::{self as remote, Connect, RemoteCluster};
use std::collections::BTreeSet;
use tokio::time::{self, Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Copy, Clone, Debug)]
pub struct Config {
    pub backoff: Backoff,
    /// Delay before retrying after a configuration error.
    pub config_retry_interval: Duration,
}

/// Rebuilds the access binding of every Ready workspace from the complete
/// staff roster.
pub struct StaffAccess<C, S> {
    connector: C,
    staff: S,
    config: Config,
    metrics: SweepMetrics,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Remote(#[from] remote::Error),

    #[error("failed to list staff members: {0}")]
    List(#[source] k8s::Error),

    #[error("failed to record sync status: {0}")]
    Status(#[source] k8s::Error),

    #[error("failed to update {} of {total} workspaces", .failures.len())]
    Sweep {
        total: usize,
        failures: Vec<(String, WorkspaceError)>,
    },

    #[error("reconcile deadline exceeded")]
    Timeout,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Remote(remote::Error),

    #[error("deadline exceeded before the workspace was updated")]
    Abandoned,
}

/// The result of writing the access binding to every workspace.
#[derive(Debug, Default)]
struct Sweep {
    subjects: usize,
    updated: usize,
    failures: Vec<(String, WorkspaceError)>,
}

// === impl Config ===

impl Default for Config {
    fn default() -> Self {
        Self {
            backoff: Backoff::default(),
            config_retry_interval: Duration::from_secs(300),
        }
    }
}

// === impl StaffAccess ===

impl<C, S> StaffAccess<C, S>
where
    C: Connect,
    S: StaffMembers,
{
    pub fn new(connector: C, staff: S, config: Config, metrics: SweepMetrics) -> Self {
        Self {
            connector,
            staff,
            config,
            metrics,
        }
    }

    async fn sweep(&self, deadline: Instant) -> Result<Sweep, Error> {
        let (remote, workspaces, members) = time::timeout_at(deadline, async {
            let remote = self.connector.connect().await?;
            let workspaces = remote.list_managed_workspaces().await?;
            let members = self.staff.list().await.map_err(Error::List)?;
            Ok::<_, Error>((remote, workspaces, members))
        })
        .await
        .map_err(|_| Error::Timeout)??;

        let subjects = desired_subjects(&members);
        debug!(
            workspaces = workspaces.len(),
            subjects = subjects.len(),
            "Rebuilding access bindings"
        );

        let mut sweep = Sweep {
            subjects: subjects.len(),
            ..Default::default()
        };
        for ws in workspaces {
            if Instant::now() >= deadline {
                sweep.failures.push((ws.name, WorkspaceError::Abandoned));
                continue;
            }

            let update = remote.create_or_update_access_binding(&ws.name, &subjects);
            let res = time::timeout_at(deadline, update).await;
            match res {
                Ok(Ok(())) => sweep.updated += 1,
                Ok(Err(error)) => {
                    warn!(workspace = %ws.name, %error, "Failed to update access binding");
                    sweep.failures.push((ws.name, WorkspaceError::Remote(error)));
                }
                Err(_) => sweep.failures.push((ws.name, WorkspaceError::Abandoned)),
            }
        }
        Ok(sweep)
    }

    async fn record_status(&self, id: &ResourceId, sweep: &Sweep) -> Result<(), Error> {
        let annotations = status_annotations(sweep, Utc::now());
        let found = self
            .staff
            .patch_annotations(id, &annotations)
            .await
            .map_err(Error::Status)?;
        if !found {
            debug!(%id, "Staff member was deleted; nothing to update");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl<C, S> Reconcile<Trigger> for StaffAccess<C, S>
where
    C: Connect,
    S: StaffMembers,
{
    type Error = Error;

    async fn reconcile(&self, trigger: &Trigger, deadline: Instant) -> Result<Action, Error> {
        let sweep = self.sweep(deadline).await?;
        self.metrics
            .record(sweep.subjects, sweep.updated, sweep.failures.len());
        info!(
            subjects = sweep.subjects,
            updated = sweep.updated,
            failed = sweep.failures.len(),
            "Access sweep complete"
        );

        if let Trigger::StaffMember(id) = trigger {
            self.record_status(id, &sweep).await?;
        }

        if sweep.failures.is_empty() {
            return Ok(Action::Done);
        }
        Err(Error::Sweep {
            total: sweep.updated + sweep.failures.len(),
            failures: sweep.failures,
        })
    }

    fn retry_after(&self, error: &Error, failures: u32) -> Duration {
        match error {
            Error::Remote(e) if e.is_config() => self.config.config_retry_interval,
            _ => self.config.backoff.delay(failures),
        }
    }
}

/// Computes the binding subjects for the staff roster. Members without an
/// email are skipped.
pub fn desired_subjects(members: &[StaffMember]) -> Vec<String> {
    members
        .iter()
        .filter_map(StaffMember::email)
        .map(remote::subject)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn status_annotations(sweep: &Sweep, now: DateTime<Utc>) -> Map {
    let failed = sweep.failures.len();
    let status = SyncStatus::from_counts(failed, sweep.updated + failed);
    Map::from([
        (
            annotations::LAST_SYNCED.to_string(),
            now.to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
        (annotations::SYNC_STATUS.to_string(), status.to_string()),
        (
            annotations::WORKSPACE_COUNT.to_string(),
            sweep.updated.to_string(),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn status_reflects_failures() {
        let sweep = Sweep {
            subjects: 2,
            updated: 2,
            failures: vec![("keda".to_string(), WorkspaceError::Abandoned)],
        };
        assert_eq!(
            status_annotations(&sweep, now()),
            Map::from([
                (
                    annotations::LAST_SYNCED.to_string(),
                    "2023-11-14T22:13:20Z".to_string()
                ),
                (annotations::SYNC_STATUS.to_string(), "partial".to_string()),
                (annotations::WORKSPACE_COUNT.to_string(), "2".to_string()),
            ])
        );
    }

    #[test]
    fn empty_sweep_is_successful() {
        let annos = status_annotations(&Sweep::default(), now());
        assert_eq!(annos[annotations::SYNC_STATUS], "success");
        assert_eq!(annos[annotations::WORKSPACE_COUNT], "0");
    }

    #[test]
    fn all_failed_is_error() {
        let sweep = Sweep {
            subjects: 1,
            updated: 0,
            failures: vec![
                ("zot".to_string(), WorkspaceError::Abandoned),
                ("keda".to_string(), WorkspaceError::Abandoned),
            ],
        };
        assert_eq!(
            status_annotations(&sweep, now())[annotations::SYNC_STATUS],
            "error"
        );
    }
}

use crate::{
    core::{self, Controller, QueueMetrics},
    k8s,
    projects::ProjectIndexes,
    remote, staff, workspace,
};
use anyhow::{bail, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use tokio::time::Duration;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "access-controller",
    about = "Grants foundation staff access to every project workspace"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "maintainerd=info,warn",
        env = "MAINTAINERD_ACCESS_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Namespace watched for StaffMember resources.
    #[clap(long, default_value = "maintainerd", env = "MAINTAINERD_STAFF_NAMESPACE")]
    staff_namespace: String,

    /// Namespace watched for Project resources.
    #[clap(
        long,
        default_value = "maintainerd",
        env = "MAINTAINERD_PROJECT_NAMESPACE"
    )]
    project_namespace: String,

    /// Namespace holding the remote control plane configuration.
    #[clap(
        long,
        default_value = "maintainerd",
        env = "MAINTAINERD_REMOTE_CONFIG_NAMESPACE"
    )]
    remote_config_namespace: String,

    #[clap(
        long,
        default_value = "kdp-workspaces",
        env = "MAINTAINERD_REMOTE_CONFIG_MAP"
    )]
    remote_config_map: String,

    #[clap(
        long,
        default_value = "kdp-credentials",
        env = "MAINTAINERD_REMOTE_CREDENTIALS_SECRET"
    )]
    remote_credentials_secret: String,

    /// Maximum number of concurrent reconciles per controller.
    #[clap(long, default_value = "4")]
    workers: usize,

    #[clap(long, default_value = "60")]
    reconcile_timeout_secs: u64,

    /// How often workspaces that are not yet Ready are polled.
    #[clap(long, default_value = "10")]
    workspace_poll_interval_secs: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            staff_namespace,
            project_namespace,
            remote_config_namespace,
            remote_config_map,
            remote_credentials_secret,
            workers,
            reconcile_timeout_secs,
            workspace_poll_interval_secs,
        } = self;

        if workers == 0 {
            bail!("--workers must be at least 1");
        }
        let queue_config = core::Config {
            workers,
            timeout: Duration::from_secs(reconcile_timeout_secs),
        };

        let mut prom = <Registry>::default();
        let queue_metrics = QueueMetrics::register(prom.sub_registry_with_prefix("controller"));
        let sweep_metrics =
            staff::SweepMetrics::register(prom.sub_registry_with_prefix("staff_access"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let client = runtime.client();
        let connector = remote::KubeConnector::new(
            client.clone(),
            remote::ConfigRef {
                namespace: remote_config_namespace,
                config_map: remote_config_map,
                secret: remote_credentials_secret,
            },
            &staff_namespace,
        );

        // Build the controllers. Each owns a work queue that the indexes
        // below feed.
        let lifecycle = Controller::new(
            workspace::CONTROLLER_NAME,
            workspace::Lifecycle::new(
                connector.clone(),
                workspace::KubeProjects::new(client.clone()),
                workspace::Config {
                    poll_interval: Duration::from_secs(workspace_poll_interval_secs),
                    ..Default::default()
                },
            ),
            queue_config,
            queue_metrics.controller(workspace::CONTROLLER_NAME),
        );

        let staff_access = Controller::new(
            staff::CONTROLLER_NAME,
            staff::StaffAccess::new(
                connector,
                staff::KubeStaffMembers::new(client, &staff_namespace),
                staff::Config::default(),
                sweep_metrics,
            ),
            queue_config,
            queue_metrics.controller(staff::CONTROLLER_NAME),
        );

        // Spawn resource watches.

        let projects = runtime
            .watch_namespaced::<k8s::Project>(project_namespace.clone(), watcher::Config::default());
        let projects_indexes = ProjectIndexes::shared(
            workspace::ProjectIndex::shared(lifecycle.queue()),
            staff::ProjectForwarder::shared(staff_access.queue()),
        );
        tokio::spawn(
            kubert::index::namespaced(projects_indexes, projects)
                .instrument(info_span!("projects")),
        );

        let staff_members = runtime
            .watch_namespaced::<k8s::StaffMember>(staff_namespace.clone(), watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(
                staff::StaffIndex::shared(staff_access.queue()),
                staff_members,
            )
            .instrument(info_span!("staffmembers")),
        );

        // Spawn the controllers. Shutdown waits for in-flight reconciles.
        tokio::spawn(
            lifecycle
                .run(runtime.shutdown_handle())
                .instrument(info_span!("workspace_lifecycle")),
        );
        tokio::spawn(
            staff_access
                .run(runtime.shutdown_handle())
                .instrument(info_span!("staff_access")),
        );

        info!(%project_namespace, %staff_namespace, workers, "Controllers started");

        // Block the main thread on the shutdown signal. Once it fires, wait for
        // in-flight reconciles to complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

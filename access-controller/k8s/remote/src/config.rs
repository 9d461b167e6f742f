//! Remote connection settings, stored in the local cluster as a ConfigMap
//! (non-secret settings) and a Secret (credentials).

use crate::Error;
use kube::config::{KubeConfigOptions, Kubeconfig, KubeconfigError};
use maintainerd_access_controller_k8s_api::{self as k8s, ConfigMap, Secret};
use std::fmt;

pub const DEFAULT_ROOT_PATH: &str = "root";

// ConfigMap keys.
pub const ROOT_PATH_KEY: &str = "workspace-root-path";
pub const WORKSPACE_TYPE_KEY: &str = "workspace-type";
pub const SERVER_KEY: &str = "server";

// Secret keys.
pub const KUBECONFIG_KEY: &str = "kubeconfig";

/// Names the objects that hold the remote configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigRef {
    pub namespace: String,
    pub config_map: String,
    pub secret: String,
}

#[derive(Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// The workspace under which project workspaces are created.
    pub root_path: String,
    pub workspace_type: String,
    /// Overrides the server in the kubeconfig.
    pub server: Option<String>,
    kubeconfig: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("{kind} {name} is missing the {key} key")]
    MissingKey {
        kind: &'static str,
        name: String,
        key: &'static str,
    },

    #[error("Secret {name} key {key} is not valid UTF-8")]
    NotUtf8 { name: String, key: &'static str },

    #[error("invalid kubeconfig: {0}")]
    Kubeconfig(#[source] KubeconfigError),

    #[error("invalid server URL: {0}")]
    InvalidServer(String),
}

// === impl RemoteConfig ===

impl RemoteConfig {
    /// Reads the configuration objects from the local cluster.
    pub async fn load(client: &k8s::Client, refs: &ConfigRef) -> Result<Self, Error> {
        let config_maps = k8s::Api::<ConfigMap>::namespaced(client.clone(), &refs.namespace);
        let config_map = config_maps
            .get_opt(&refs.config_map)
            .await
            .map_err(Error::Local)?
            .ok_or_else(|| ConfigError::NotFound {
                kind: "ConfigMap",
                namespace: refs.namespace.clone(),
                name: refs.config_map.clone(),
            })?;

        let secrets = k8s::Api::<Secret>::namespaced(client.clone(), &refs.namespace);
        let secret = secrets
            .get_opt(&refs.secret)
            .await
            .map_err(Error::Local)?
            .ok_or_else(|| ConfigError::NotFound {
                kind: "Secret",
                namespace: refs.namespace.clone(),
                name: refs.secret.clone(),
            })?;

        Ok(Self::from_objects(&config_map, &secret)?)
    }

    pub fn from_objects(config_map: &ConfigMap, secret: &Secret) -> Result<Self, ConfigError> {
        use k8s::ResourceExt;

        let data = config_map.data.clone().unwrap_or_default();
        let setting = |key: &str| {
            data.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let root_path = setting(ROOT_PATH_KEY).unwrap_or_else(|| DEFAULT_ROOT_PATH.to_string());
        let workspace_type = setting(WORKSPACE_TYPE_KEY).ok_or_else(|| ConfigError::MissingKey {
            kind: "ConfigMap",
            name: config_map.name_any(),
            key: WORKSPACE_TYPE_KEY,
        })?;
        let server = setting(SERVER_KEY);

        let kubeconfig = secret
            .data
            .as_ref()
            .and_then(|data| data.get(KUBECONFIG_KEY))
            .ok_or_else(|| ConfigError::MissingKey {
                kind: "Secret",
                name: secret.name_any(),
                key: KUBECONFIG_KEY,
            })?;
        let kubeconfig =
            String::from_utf8(kubeconfig.0.clone()).map_err(|_| ConfigError::NotUtf8 {
                name: secret.name_any(),
                key: KUBECONFIG_KEY,
            })?;

        Ok(Self {
            root_path,
            workspace_type,
            server,
            kubeconfig,
        })
    }

    /// Builds a client configuration that targets the root workspace.
    pub async fn client_config(&self) -> Result<kube::Config, ConfigError> {
        let kubeconfig = Kubeconfig::from_yaml(&self.kubeconfig).map_err(ConfigError::Kubeconfig)?;
        let mut config =
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(ConfigError::Kubeconfig)?;

        if let Some(server) = self.server.as_deref() {
            config.cluster_url = server
                .parse()
                .map_err(|_| ConfigError::InvalidServer(server.to_string()))?;
        }
        config.cluster_url = crate::path::cluster_url(&config.cluster_url, &self.root_path)?;
        Ok(config)
    }
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("root_path", &self.root_path)
            .field("workspace_type", &self.workspace_type)
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

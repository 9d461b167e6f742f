//! Logical cluster addressing.
//!
//! Every workspace is served by the same API server under its own URL path,
//! `/clusters/<logical path>`, where the logical path joins the parent path and
//! the workspace name with `:`.

use crate::ConfigError;
use http::uri::{PathAndQuery, Uri};

const CLUSTERS: &str = "/clusters/";

pub fn logical_path(root: &str, workspace: &str) -> String {
    format!("{root}:{workspace}")
}

/// Rewrites `server` so that it targets the logical cluster at `path`.
///
/// Any logical cluster the server URL already points at is replaced.
pub fn cluster_url(server: &Uri, path: &str) -> Result<Uri, ConfigError> {
    let invalid = || ConfigError::InvalidServer(server.to_string());

    let base = server.path();
    let prefix = match base.find(CLUSTERS) {
        Some(idx) => &base[..idx],
        None => base.trim_end_matches('/'),
    };
    let path_and_query = format!("{prefix}{CLUSTERS}{path}")
        .parse::<PathAndQuery>()
        .map_err(|_| invalid())?;

    let mut parts = server.clone().into_parts();
    parts.path_and_query = Some(path_and_query);
    Uri::from_parts(parts).map_err(|_| invalid())
}

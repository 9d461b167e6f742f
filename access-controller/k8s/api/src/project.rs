use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// An onboarded project. Each project is given its own workspace in the
/// remote control plane.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "maintainer-d.cncf.io",
    version = "v1alpha1",
    kind = "Project",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSpec {
    pub display_name: Option<String>,
    /// Foundation maturity level, e.g. sandbox, incubating or graduated.
    pub maturity: Option<String>,
    #[serde(default)]
    pub repositories: Vec<String>,
}

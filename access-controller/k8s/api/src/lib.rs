#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod annotations;
pub mod project;
pub mod staff_member;
pub mod workspace;

pub use self::{
    project::{Project, ProjectSpec},
    staff_member::{StaffMember, StaffMemberSpec},
    workspace::{Workspace, WorkspacePhase, WorkspaceSpec, WorkspaceStatus},
};
pub use k8s_openapi::{
    api::{
        core::v1::{ConfigMap, Secret},
        rbac::v1::{ClusterRoleBinding, RoleRef, Subject},
    },
    ByteString,
};
pub use kube::{
    api::{Api, ListParams, ObjectMeta, Patch, PatchParams, PostParams, ResourceExt},
    error::ErrorResponse,
    runtime::watcher,
    Client, Error, Resource,
};

/// Returns true if the error is an API response with the given status code.
pub fn is_status(error: &Error, code: u16) -> bool {
    matches!(error, Error::Api(ErrorResponse { code: c, .. }) if *c == code)
}

pub fn is_not_found(error: &Error) -> bool {
    is_status(error, 404)
}

pub fn is_conflict(error: &Error) -> bool {
    is_status(error, 409)
}

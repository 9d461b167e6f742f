#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use maintainerd_access_controller_core as core;
pub use maintainerd_access_controller_k8s_api as k8s;
pub use maintainerd_access_controller_k8s_remote as remote;
pub use maintainerd_access_controller_k8s_staff as staff;
pub use maintainerd_access_controller_k8s_workspace as workspace;

mod args;
mod projects;

pub use self::args::Args;

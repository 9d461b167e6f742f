#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Provisions a remote workspace for every Project and records the
//! workspace's identity, URL and phase on the Project.

mod controller;
mod index;
mod name;
mod store;


pub use self::{
    controller::{Config, Error, Lifecycle},
    index::{ProjectIndex, SharedIndex},
    name::workspace_name,
    store::{KubeProjects, Projects},
};

pub const CONTROLLER_NAME: &str = "workspace-lifecycle";

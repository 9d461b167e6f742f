#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod metrics;
pub mod queue;
mod resource_id;

pub use self::{
    metrics::{ControllerMetrics, QueueMetrics},
    queue::{Action, Backoff, Config, Controller, Queue, Reconcile},
    resource_id::ResourceId,
};

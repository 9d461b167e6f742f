use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct SweepMetrics {
    sweeps: Counter,
    workspaces_updated: Counter,
    workspaces_failed: Counter,
    subjects: Gauge,
}

impl SweepMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let sweeps = Counter::default();
        reg.register("sweeps", "Total number of access sweeps", sweeps.clone());

        let workspaces_updated = Counter::default();
        reg.register(
            "workspaces_updated",
            "Total number of workspace access bindings written",
            workspaces_updated.clone(),
        );

        let workspaces_failed = Counter::default();
        reg.register(
            "workspaces_failed",
            "Total number of workspace access bindings that could not be written",
            workspaces_failed.clone(),
        );

        let subjects = Gauge::default();
        reg.register(
            "subjects",
            "Number of subjects granted access by the most recent sweep",
            subjects.clone(),
        );

        Self {
            sweeps,
            workspaces_updated,
            workspaces_failed,
            subjects,
        }
    }

    pub(crate) fn record(&self, subjects: usize, updated: usize, failed: usize) {
        self.sweeps.inc();
        self.subjects.set(subjects as i64);
        self.workspaces_updated.inc_by(updated as u64);
        self.workspaces_failed.inc_by(failed as u64);
    }
}

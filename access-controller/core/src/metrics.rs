use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, histogram::Histogram},
    registry::{Registry, Unit},
};
use tokio::time;

/// Work queue metrics, shared by all controllers and labeled by controller
/// name.
#[derive(Clone, Debug)]
pub struct QueueMetrics {
    reconciles: Family<Labels, Counter>,
    failures: Family<Labels, Counter>,
    requeues: Family<Labels, Counter>,
    duration: Family<Labels, Histogram>,
}

#[derive(Clone, Debug)]
pub struct ControllerMetrics {
    reconciles: Counter,
    failures: Counter,
    requeues: Counter,
    duration: Histogram,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct Labels {
    controller: &'static str,
}

// === impl QueueMetrics ===

impl QueueMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let reconciles = Family::<Labels, Counter>::default();
        reg.register(
            "reconciles",
            "Total number of reconciles started",
            reconciles.clone(),
        );

        let failures = Family::<Labels, Counter>::default();
        reg.register(
            "failures",
            "Total number of reconciles that returned an error",
            failures.clone(),
        );

        let requeues = Family::<Labels, Counter>::default();
        reg.register(
            "requeues",
            "Total number of keys scheduled for a delayed reconcile",
            requeues.clone(),
        );

        let duration = Family::<Labels, Histogram>::new_with_constructor(|| {
            // Sweeps touch every workspace sequentially, so allow for long
            // reconciles.
            Histogram::new([0.01, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0])
        });
        reg.register_with_unit(
            "duration",
            "Histogram of reconcile durations",
            Unit::Seconds,
            duration.clone(),
        );

        Self {
            reconciles,
            failures,
            requeues,
            duration,
        }
    }

    pub fn controller(&self, controller: &'static str) -> ControllerMetrics {
        let labels = Labels { controller };
        ControllerMetrics {
            reconciles: self.reconciles.get_or_create(&labels).clone(),
            failures: self.failures.get_or_create(&labels).clone(),
            requeues: self.requeues.get_or_create(&labels).clone(),
            duration: self.duration.get_or_create(&labels).clone(),
        }
    }
}

// === impl ControllerMetrics ===

impl ControllerMetrics {
    pub(crate) fn started(&self) -> time::Instant {
        self.reconciles.inc();
        time::Instant::now()
    }

    pub(crate) fn finished(&self, start: time::Instant, failed: bool) {
        self.duration.observe(start.elapsed().as_secs_f64());
        if failed {
            self.failures.inc();
        }
    }

    pub(crate) fn requeued(&self) {
        self.requeues.inc();
    }
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        QueueMetrics::register(&mut Registry::default()).controller("default")
    }
}

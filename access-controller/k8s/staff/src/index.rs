use crate::Trigger;
use ahash::AHashMap as HashMap;
use maintainerd_access_controller_core::{Queue, ResourceId};
use maintainerd_access_controller_k8s_api::{
    annotations::{self, Map},
    ResourceExt, StaffMember, StaffMemberSpec,
};
use parking_lot::RwLock;
use std::{collections::hash_map::Entry, sync::Arc};
use tracing::trace;

pub type SharedIndex = Arc<RwLock<StaffIndex>>;

/// Enqueues a sweep for every StaffMember change that is not caused by the
/// controller's own status annotations.
pub struct StaffIndex {
    queue: Queue<Trigger>,
    members: HashMap<ResourceId, Fingerprint>,
}

/// The parts of a StaffMember that can affect access bindings.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Fingerprint {
    generation: Option<i64>,
    spec: StaffMemberSpec,
    annotations: Map,
}

/// Returns true if moving from `old` to `new` warrants a sweep: the member spec
/// changed, or an annotation other than the sync status annotations changed.
pub fn is_relevant_change(old: &StaffMember, new: &StaffMember) -> bool {
    Fingerprint::of(old) != Fingerprint::of(new)
}

// === impl StaffIndex ===

impl StaffIndex {
    pub fn shared(queue: Queue<Trigger>) -> SharedIndex {
        Arc::new(RwLock::new(Self {
            queue,
            members: HashMap::new(),
        }))
    }

    // If the member is new or has changed, return true so that a sweep is
    // enqueued; otherwise return false.
    fn update(&mut self, id: ResourceId, fingerprint: Fingerprint) -> bool {
        match self.members.entry(id) {
            Entry::Vacant(entry) => {
                entry.insert(fingerprint);
            }
            Entry::Occupied(mut entry) => {
                if *entry.get() == fingerprint {
                    return false;
                }
                entry.insert(fingerprint);
            }
        }
        true
    }
}

impl kubert::index::IndexNamespacedResource<StaffMember> for StaffIndex {
    fn apply(&mut self, member: StaffMember) {
        let namespace = member
            .namespace()
            .expect("StaffMember must have a namespace");
        let id = ResourceId::new(namespace, member.name_unchecked());

        if self.update(id.clone(), Fingerprint::of(&member)) {
            self.queue.enqueue(Trigger::StaffMember(id));
        } else {
            trace!(%id, "Ignoring status-only update");
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        let id = ResourceId::new(namespace, name);
        self.members.remove(&id);
        // The next sweep no longer includes the member.
        self.queue.enqueue(Trigger::StaffMember(id));
    }
}

// === impl Fingerprint ===

impl Fingerprint {
    fn of(member: &StaffMember) -> Self {
        Self {
            generation: member.metadata.generation,
            spec: member.spec.clone(),
            annotations: annotations::without_sync(member.annotations()),
        }
    }
}

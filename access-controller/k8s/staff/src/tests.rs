use crate::{
    desired_subjects, is_relevant_change, Config, Error, ProjectForwarder, StaffAccess,
    StaffIndex, StaffMembers, SweepMetrics, Trigger, WorkspaceError,
};
use kubert::index::IndexNamespacedResource;
use maintainerd_access_controller_core::{Action, Queue, Reconcile, ResourceId};
use maintainerd_access_controller_k8s_api::{
    self as k8s,
    annotations::{self, Map},
    ClusterRoleBinding, ObjectMeta, Project, ResourceExt, StaffMember, StaffMemberSpec, Subject,
    WorkspacePhase,
};
use maintainerd_access_controller_k8s_remote::{memory::InMemory, ACCESS_BINDING_NAME};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::{collections::BTreeMap, sync::Arc};
use tokio::{
    sync::mpsc,
    time::{Duration, Instant},
};

const NS: &str = "maintainerd";

#[derive(Clone, Default)]
struct FakeStaff {
    members: Arc<Mutex<BTreeMap<ResourceId, StaffMember>>>,
    patches: Arc<Mutex<Vec<(ResourceId, Map)>>>,
}

#[async_trait::async_trait]
impl StaffMembers for FakeStaff {
    async fn list(&self) -> Result<Vec<StaffMember>, k8s::Error> {
        Ok(self.members.lock().values().cloned().collect())
    }

    async fn patch_annotations(&self, id: &ResourceId, annos: &Map) -> Result<bool, k8s::Error> {
        let mut members = self.members.lock();
        let Some(member) = members.get_mut(id) else {
            return Ok(false);
        };
        member.annotations_mut().extend(annos.clone());
        self.patches.lock().push((id.clone(), annos.clone()));
        Ok(true)
    }
}

impl FakeStaff {
    fn add(&self, name: &str, email: &str) -> ResourceId {
        let id = ResourceId::new(NS.to_string(), name.to_string());
        self.members.lock().insert(id.clone(), member(name, email));
        id
    }

    fn remove(&self, id: &ResourceId) {
        self.members.lock().remove(id);
    }

    fn annotation(&self, id: &ResourceId, key: &str) -> Option<String> {
        self.members
            .lock()
            .get(id)
            .and_then(|m| m.annotations().get(key).cloned())
    }

    fn patch_count(&self) -> usize {
        self.patches.lock().len()
    }
}

fn member(name: &str, email: &str) -> StaffMember {
    let mut member = StaffMember::new(
        name,
        StaffMemberSpec {
            display_name: Some(name.to_string()),
            primary_email: email.to_string(),
            github_account: None,
        },
    );
    member.metadata.namespace = Some(NS.to_string());
    member.metadata.generation = Some(1);
    member
}

fn project(name: &str, annos: &[(&str, &str)]) -> Project {
    let mut project = Project::new(name, Default::default());
    project.metadata.namespace = Some(NS.to_string());
    project.metadata.annotations = Some(
        annos
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    );
    project
}

fn staff_access() -> (StaffAccess<InMemory, FakeStaff>, InMemory, FakeStaff) {
    let remote = InMemory::default();
    let staff = FakeStaff::default();
    let controller = StaffAccess::new(
        remote.clone(),
        staff.clone(),
        Config::default(),
        SweepMetrics::default(),
    );
    (controller, remote, staff)
}

fn deadline() -> Instant {
    Instant::now() + Duration::from_secs(30)
}

fn drain<K>(rx: &mut mpsc::UnboundedReceiver<K>) -> Vec<K> {
    let mut keys = Vec::new();
    while let Ok(key) = rx.try_recv() {
        keys.push(key);
    }
    keys
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

#[tokio::test]
async fn ready_workspace_receives_full_roster() {
    let (controller, remote, staff) = staff_access();
    staff.add("alice", "a@x.io");
    staff.add("bob", "b@y.io");
    remote.add_workspace("zot", WorkspacePhase::Ready, true);

    // The lifecycle controller marks the project Ready; the forwarder turns
    // that into a workspace-triggered sweep.
    let (queue, mut rx) = Queue::channel();
    let forwarder = ProjectForwarder::shared(queue);
    forwarder.write().apply(project(
        "zot",
        &[
            (annotations::WORKSPACE_NAME, "zot"),
            (annotations::WORKSPACE_PHASE, "Ready"),
        ],
    ));
    let triggers = drain(&mut rx);
    assert_eq!(triggers, vec![Trigger::Workspaces]);

    let action = controller.reconcile(&triggers[0], deadline()).await.unwrap();
    assert_eq!(action, Action::Done);

    let binding = remote.binding("zot").expect("binding must exist");
    assert_eq!(binding.metadata.name.as_deref(), Some(ACCESS_BINDING_NAME));
    assert_eq!(
        remote.subjects("zot"),
        Some(strings(&["oidc:a@x.io", "oidc:b@y.io"]))
    );
    assert_eq!(
        binding.annotations().get(annotations::STAFF_COUNT).map(String::as_str),
        Some("2")
    );

    // Workspace triggers are not attributable to a staff member.
    assert_eq!(staff.patch_count(), 0);
}

#[tokio::test]
async fn stale_subjects_are_replaced() {
    let (controller, remote, staff) = staff_access();
    let id = staff.add("alice", "a@x.io");
    remote.add_workspace("zot", WorkspacePhase::Ready, true);
    remote.set_binding(
        "zot",
        ClusterRoleBinding {
            metadata: ObjectMeta {
                name: Some(ACCESS_BINDING_NAME.to_string()),
                ..Default::default()
            },
            subjects: Some(vec![Subject {
                kind: "User".to_string(),
                name: "oidc:mallory@evil.io".to_string(),
                api_group: Some("rbac.authorization.k8s.io".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        },
    );

    controller
        .reconcile(&Trigger::StaffMember(id), deadline())
        .await
        .unwrap();
    assert_eq!(remote.subjects("zot"), Some(strings(&["oidc:a@x.io"])));
}

#[tokio::test]
async fn deleted_members_lose_access() {
    let (controller, remote, staff) = staff_access();
    let alice = staff.add("alice", "a@x.io");
    let bob = staff.add("bob", "b@y.io");
    remote.add_workspace("zot", WorkspacePhase::Ready, true);

    controller
        .reconcile(&Trigger::StaffMember(alice.clone()), deadline())
        .await
        .unwrap();
    assert_eq!(remote.subjects("zot").map(|s| s.len()), Some(2));

    staff.remove(&bob);
    controller
        .reconcile(&Trigger::StaffMember(bob), deadline())
        .await
        .unwrap();
    assert_eq!(remote.subjects("zot"), Some(strings(&["oidc:a@x.io"])));

    // An empty roster still leaves the binding in place, with no subjects.
    staff.remove(&alice);
    let action = controller
        .reconcile(&Trigger::StaffMember(alice), deadline())
        .await
        .unwrap();
    assert_eq!(action, Action::Done);
    assert_eq!(remote.subjects("zot"), Some(vec![]));
    assert_eq!(
        remote
            .binding("zot")
            .and_then(|b| b.annotations().get(annotations::STAFF_COUNT).cloned())
            .as_deref(),
        Some("0")
    );
}

#[tokio::test]
async fn members_without_email_are_skipped() {
    let (controller, remote, staff) = staff_access();
    staff.add("alice", "a@x.io");
    let carol = staff.add("carol", "  ");
    remote.add_workspace("zot", WorkspacePhase::Ready, true);

    controller
        .reconcile(&Trigger::StaffMember(carol.clone()), deadline())
        .await
        .unwrap();
    assert_eq!(remote.subjects("zot"), Some(strings(&["oidc:a@x.io"])));
    assert_eq!(
        staff.annotation(&carol, annotations::SYNC_STATUS).as_deref(),
        Some("success")
    );
}

#[tokio::test]
async fn partial_failures_are_recorded_and_retried() {
    let (controller, remote, staff) = staff_access();
    let id = staff.add("alice", "a@x.io");
    for name in ["zot", "keda", "argo"] {
        remote.add_workspace(name, WorkspacePhase::Ready, true);
    }
    remote.fail_workspace("keda", true);

    let trigger = Trigger::StaffMember(id.clone());
    let error = controller.reconcile(&trigger, deadline()).await.unwrap_err();
    match &error {
        Error::Sweep { total, failures } => {
            assert_eq!(*total, 3);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].0, "keda");
            assert!(matches!(failures[0].1, WorkspaceError::Remote(_)));
        }
        error => panic!("unexpected error: {error}"),
    }
    assert_eq!(remote.subjects("zot"), Some(strings(&["oidc:a@x.io"])));
    assert_eq!(remote.subjects("argo"), Some(strings(&["oidc:a@x.io"])));
    assert_eq!(remote.binding("keda"), None);
    assert_eq!(
        staff.annotation(&id, annotations::SYNC_STATUS).as_deref(),
        Some("partial")
    );
    assert_eq!(
        staff.annotation(&id, annotations::WORKSPACE_COUNT).as_deref(),
        Some("2")
    );
    assert_eq!(
        controller.retry_after(&error, 1),
        Config::default().backoff.delay(1)
    );

    remote.fail_workspace("keda", false);
    controller.reconcile(&trigger, deadline()).await.unwrap();
    assert_eq!(remote.subjects("keda"), Some(strings(&["oidc:a@x.io"])));
    assert_eq!(
        staff.annotation(&id, annotations::SYNC_STATUS).as_deref(),
        Some("success")
    );
    assert_eq!(
        staff.annotation(&id, annotations::WORKSPACE_COUNT).as_deref(),
        Some("3")
    );
}

#[tokio::test]
async fn all_workspaces_failing_is_an_error() {
    let (controller, remote, staff) = staff_access();
    let id = staff.add("alice", "a@x.io");
    remote.add_workspace("zot", WorkspacePhase::Ready, true);
    remote.fail_workspace("zot", true);

    let error = controller
        .reconcile(&Trigger::StaffMember(id.clone()), deadline())
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Sweep { total: 1, .. }), "{error}");
    assert_eq!(
        staff.annotation(&id, annotations::SYNC_STATUS).as_deref(),
        Some("error")
    );
    assert_eq!(
        staff.annotation(&id, annotations::WORKSPACE_COUNT).as_deref(),
        Some("0")
    );
}

#[tokio::test]
async fn deleted_trigger_member_is_not_an_error() {
    let (controller, remote, staff) = staff_access();
    staff.add("alice", "a@x.io");
    remote.add_workspace("zot", WorkspacePhase::Ready, true);
    let gone = ResourceId::new(NS.to_string(), "gone".to_string());

    let action = controller
        .reconcile(&Trigger::StaffMember(gone), deadline())
        .await
        .unwrap();
    assert_eq!(action, Action::Done);
    assert_eq!(staff.patch_count(), 0);
    assert_eq!(remote.subjects("zot"), Some(strings(&["oidc:a@x.io"])));
}

#[tokio::test]
async fn only_managed_ready_workspaces_are_updated() {
    let (controller, remote, staff) = staff_access();
    staff.add("alice", "a@x.io");
    remote.add_workspace("zot", WorkspacePhase::Ready, true);
    remote.add_workspace("keda", WorkspacePhase::Initializing, true);
    remote.add_workspace("argo", WorkspacePhase::Ready, false);

    controller
        .reconcile(&Trigger::Workspaces, deadline())
        .await
        .unwrap();
    assert_eq!(remote.binding_writes("zot"), 1);
    assert_eq!(remote.binding_writes("keda"), 0);
    assert_eq!(remote.binding_writes("argo"), 0);
}

#[tokio::test]
async fn unreachable_remote_retries_with_backoff() {
    let (controller, remote, staff) = staff_access();
    let id = staff.add("alice", "a@x.io");
    remote.set_unreachable(true);

    let error = controller
        .reconcile(&Trigger::StaffMember(id), deadline())
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Remote(_)), "{error}");
    assert_eq!(controller.retry_after(&error, 1), Duration::from_secs(5));
    assert_eq!(controller.retry_after(&error, 2), Duration::from_secs(10));
    assert_eq!(staff.patch_count(), 0);
}

#[tokio::test]
async fn config_errors_retry_slowly() {
    let (controller, remote, staff) = staff_access();
    staff.add("alice", "a@x.io");
    remote.set_misconfigured(true);

    let error = controller
        .reconcile(&Trigger::Workspaces, deadline())
        .await
        .unwrap_err();
    assert_eq!(
        controller.retry_after(&error, 1),
        Config::default().config_retry_interval
    );
}

#[tokio::test]
async fn expired_deadline_abandons_remaining_workspaces() {
    let (controller, remote, staff) = staff_access();
    staff.add("alice", "a@x.io");
    remote.add_workspace("zot", WorkspacePhase::Ready, true);
    remote.add_workspace("keda", WorkspacePhase::Ready, true);

    let error = controller
        .reconcile(&Trigger::Workspaces, Instant::now())
        .await
        .unwrap_err();
    match error {
        Error::Sweep { total, failures } => {
            assert_eq!(total, 2);
            assert!(failures
                .iter()
                .all(|(_, e)| matches!(e, WorkspaceError::Abandoned)));
        }
        error => panic!("unexpected error: {error}"),
    }
    assert_eq!(remote.binding("zot"), None);
}

#[test]
fn subjects_are_sorted_and_deduplicated() {
    let members = vec![
        member("bob", "b@y.io"),
        member("alice", "a@x.io"),
        member("alice-alt", " a@x.io "),
        member("nobody", ""),
    ];
    assert_eq!(
        desired_subjects(&members),
        strings(&["oidc:a@x.io", "oidc:b@y.io"])
    );
}

#[test]
fn staff_index_ignores_status_only_updates() {
    let (queue, mut rx) = Queue::channel();
    let index = StaffIndex::shared(queue);
    let id = ResourceId::new(NS.to_string(), "alice".to_string());

    let alice = member("alice", "a@x.io");
    index.write().apply(alice.clone());
    assert_eq!(drain(&mut rx), vec![Trigger::StaffMember(id.clone())]);

    let mut synced = alice.clone();
    synced.annotations_mut().extend([
        (annotations::SYNC_STATUS.to_string(), "success".to_string()),
        (annotations::WORKSPACE_COUNT.to_string(), "3".to_string()),
        (
            annotations::LAST_SYNCED.to_string(),
            "2025-01-01T00:00:00Z".to_string(),
        ),
    ]);
    index.write().apply(synced.clone());
    assert_eq!(drain(&mut rx), vec![]);

    let mut labeled = synced.clone();
    labeled
        .annotations_mut()
        .insert("example.com/team".to_string(), "infra".to_string());
    index.write().apply(labeled);
    assert_eq!(drain(&mut rx), vec![Trigger::StaffMember(id.clone())]);

    let mut changed = synced;
    changed.spec.primary_email = "alice@x.io".to_string();
    changed.metadata.generation = Some(2);
    index.write().apply(changed);
    assert_eq!(drain(&mut rx), vec![Trigger::StaffMember(id.clone())]);

    index
        .write()
        .delete(NS.to_string(), "alice".to_string());
    assert_eq!(drain(&mut rx), vec![Trigger::StaffMember(id)]);
}

#[test]
fn forwarder_enqueues_on_readiness_transitions() {
    let (queue, mut rx) = Queue::channel();
    let forwarder = ProjectForwarder::shared(queue);
    let pending = project(
        "zot",
        &[
            (annotations::WORKSPACE_NAME, "zot"),
            (annotations::WORKSPACE_PHASE, "Initializing"),
        ],
    );
    let ready = project(
        "zot",
        &[
            (annotations::WORKSPACE_NAME, "zot"),
            (annotations::WORKSPACE_URL, "https://kcp.test/clusters/root:zot"),
            (annotations::WORKSPACE_PHASE, "Ready"),
        ],
    );

    forwarder.write().apply(pending.clone());
    assert_eq!(drain(&mut rx), vec![]);

    forwarder.write().apply(ready.clone());
    assert_eq!(drain(&mut rx), vec![Trigger::Workspaces]);

    // Resyncs of an already-Ready project do not trigger sweeps.
    forwarder.write().apply(ready.clone());
    assert_eq!(drain(&mut rx), vec![]);

    forwarder.write().apply(pending);
    forwarder.write().apply(ready.clone());
    assert_eq!(drain(&mut rx), vec![Trigger::Workspaces]);

    forwarder
        .write()
        .delete(NS.to_string(), "zot".to_string());
    forwarder.write().apply(ready);
    assert_eq!(drain(&mut rx), vec![Trigger::Workspaces]);
}

#[rstest]
#[case::identical(|_: &mut StaffMember| {}, false)]
#[case::sync_status(
    |m: &mut StaffMember| {
        m.annotations_mut()
            .insert(annotations::SYNC_STATUS.to_string(), "error".to_string());
    },
    false
)]
#[case::email(|m: &mut StaffMember| m.spec.primary_email = "new@x.io".to_string(), true)]
#[case::generation(|m: &mut StaffMember| m.metadata.generation = Some(7), true)]
#[case::other_annotation(
    |m: &mut StaffMember| {
        m.annotations_mut()
            .insert("example.com/note".to_string(), "hi".to_string());
    },
    true
)]
fn relevant_changes(#[case] change: fn(&mut StaffMember), #[case] expected: bool) {
    let old = member("alice", "a@x.io");
    let mut new = old.clone();
    change(&mut new);
    assert_eq!(is_relevant_change(&old, &new), expected);
}

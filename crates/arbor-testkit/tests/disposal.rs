//! Disposal and lifecycle ordering

use arbor_composition::{Controller, ControllerContext, HierarchyRoot, InstancePart};
use arbor_core::{ArborError, BoxError, ExportDefinition, ExportValue, ImportDefinition, Scope};
use arbor_testkit::{failing_part, Journal, LifecycleEvent, RecordingController, TreeFixture};
use assert_matches::assert_matches;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

fn journaled(name: &str, journal: &Journal) -> Arc<RecordingController> {
    RecordingController::builder(name).journal(journal).build()
}

#[test]
fn children_deactivate_before_parents() {
    let journal = Journal::new();
    let mut tree = TreeFixture::new();
    tree.module_with(journaled("M", &journal));
    tree.child_with(journaled("A", &journal), "M");
    tree.child_with(journaled("B", &journal), "A");
    tree.child_with(journaled("C", &journal), "A");
    tree.child_with(journaled("D", &journal), "B");

    tree.detach("A").unwrap();
    assert_eq!(journal.names_for("deactivated"), vec!["D", "B", "C", "A"]);
    assert_eq!(tree.names(), vec!["M"]);
    assert_eq!(tree.root.node_count(), 1);
}

#[test]
fn failures_aggregate_across_subtree() {
    let mut tree = TreeFixture::new();
    tree.module("M");
    tree.child("A", "M");
    tree.child_with(
        RecordingController::builder("B")
            .fail_on_deactivated("refused")
            .build(),
        "A",
    );
    tree.child("C", "B");
    tree.get("A")
        .context()
        .add_part(failing_part("a-svc", "a leaked"))
        .unwrap();
    tree.get("C")
        .context()
        .add_part(failing_part("c-svc", "c leaked"))
        .unwrap();
    let controllers: Vec<_> = ["A", "B", "C"]
        .iter()
        .map(|name| Arc::clone(tree.get(name)))
        .collect();

    let aggregate = match tree.detach("A") {
        Err(ArborError::Disposal(aggregate)) => aggregate,
        other => panic!("expected a disposal aggregate, got {other:?}"),
    };
    assert_eq!(aggregate.len(), 3);
    assert!(aggregate
        .failures()
        .iter()
        .any(|f| matches!(f, ArborError::Lifecycle { hook, .. } if hook == "on_deactivated")));

    for controller in &controllers {
        assert!(!controller.context().is_activated());
        assert_eq!(controller.count(&LifecycleEvent::Deactivated), 1);
    }
    assert_eq!(tree.root.node_count(), 1);
    assert_eq!(tree.root.edge_count(), 0);
}

#[test]
fn second_dispose_is_a_noop() {
    let mut tree = TreeFixture::new();
    tree.module("M");
    tree.child("A", "M");
    tree.get("A")
        .context()
        .add_part(failing_part("svc", "leaked"))
        .unwrap();
    let node = tree.node("A");
    let a = Arc::clone(tree.get("A"));

    assert_matches!(
        node.dispose(),
        Err(ArborError::Disposal(ref failures)) if failures.len() == 1
    );
    assert_matches!(node.dispose(), Ok(()));
    assert_eq!(a.count(&LifecycleEvent::Deactivated), 1);
    assert_matches!(a.context().deactivate(), Err(ArborError::NotActivated { .. }));
}

#[test]
fn stale_node_dispose_leaves_new_node_alone() {
    let mut tree = TreeFixture::new();
    tree.module("M");
    tree.child("A", "M");
    let a = Arc::clone(tree.get("A"));
    let stale = tree.node("A");
    tree.detach("A").unwrap();
    let fresh = tree.child_with(Arc::clone(&a), "M");

    stale.dispose().unwrap();
    assert!(fresh.is_active());
    assert!(a.context().is_activated());
    assert_eq!(a.count(&LifecycleEvent::Deactivated), 1);
}

#[test]
fn failed_activation_hook_keeps_node_attached() {
    let mut tree = TreeFixture::new();
    tree.module("M");
    let broken = RecordingController::builder("broken")
        .fail_on_activated("no thanks")
        .build();
    let m = Arc::clone(tree.get("M"));

    assert_matches!(
        m.context().activate(broken.clone()),
        Err(ArborError::Lifecycle { ref hook, .. }) if hook == "on_activated"
    );
    assert!(broken.context().is_activated());
    assert_eq!(tree.root.node_count(), 2);
    broken.context().deactivate().unwrap();
    assert_eq!(tree.root.node_count(), 1);
}

#[test]
fn failed_initialize_is_reported() {
    let tree = TreeFixture::new();
    let module = RecordingController::builder("M")
        .fail_on_initialize("bad setup")
        .build();
    assert_matches!(
        tree.root.activate_module(Arc::clone(&module)),
        Err(ArborError::Lifecycle { ref hook, .. }) if hook == "initialize"
    );
    assert_eq!(
        module.events(),
        vec![LifecycleEvent::Activated, LifecycleEvent::Initialized]
    );
}

#[test]
fn composed_and_catalog_parts_are_disposed() {
    let disposed = Arc::new(AtomicUsize::new(0));
    let counting_part = |contract: &str| {
        let counter = Arc::clone(&disposed);
        InstancePart::builder()
            .export_value(
                ExportDefinition::new(contract).with_scope(Scope::Protected),
                Arc::new(contract.to_string()) as ExportValue,
            )
            .on_dispose(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .build()
    };

    let mut tree = TreeFixture::new();
    tree.module("M");
    tree.child("A", "M");
    let a = tree.node("A");
    tree.get("A")
        .context()
        .add_part(counting_part("composed"))
        .unwrap();
    let lazy = counting_part("lazy");
    a.catalog().register(
        vec![ExportDefinition::new("lazy").with_scope(Scope::Protected)],
        Arc::new(move || Ok(Arc::clone(&lazy))),
    );
    let never = counting_part("never");
    a.catalog().register(
        vec![ExportDefinition::new("never").with_scope(Scope::Protected)],
        Arc::new(move || Ok(Arc::clone(&never))),
    );

    let value: Arc<String> = tree.get("A").context().get_exported_value("lazy").unwrap();
    assert_eq!(value.as_str(), "lazy");

    tree.detach("A").unwrap();
    assert_eq!(disposed.load(Ordering::SeqCst), 2);
    assert!(a.composed_parts().is_empty());
}

#[test]
fn shutdown_reports_every_failure_and_empties_tree() {
    let mut tree = TreeFixture::new();
    tree.module("M");
    tree.module("N");
    tree.child("A", "N");
    tree.get("M")
        .context()
        .add_part(failing_part("m", "m leaked"))
        .unwrap();
    tree.get("A")
        .context()
        .add_part(failing_part("a", "a leaked"))
        .unwrap();

    assert_matches!(
        tree.root.shutdown(),
        Err(ArborError::Disposal(ref failures)) if failures.len() == 2
    );
    assert_eq!(tree.root.node_count(), 0);
    assert!(tree.root.modules().is_empty());
    assert_matches!(tree.root.shutdown(), Ok(()));
}

#[test]
fn dropping_root_deactivates_modules() {
    let module = RecordingController::new("M");
    {
        let root = arbor_composition::HierarchyRoot::new().unwrap();
        root.activate_module(Arc::clone(&module)).unwrap();
        assert!(module.context().is_activated());
    }
    assert!(!module.context().is_activated());
    assert_eq!(module.count(&LifecycleEvent::Deactivated), 1);
}

/// Run `f` on a worker thread, failing the test if it hangs
fn within_deadline<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
    let (tx, rx) = crossbeam_channel::bounded(1);
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx.recv_timeout(Duration::from_secs(5))
        .expect("hierarchy call did not return")
}

fn root_of(root: &Weak<HierarchyRoot>) -> arbor_core::Result<Arc<HierarchyRoot>> {
    root.upgrade().ok_or_else(|| ArborError::composition("hierarchy dropped"))
}

#[test]
fn part_disposal_may_reenter_the_hierarchy() {
    let root = Arc::new(HierarchyRoot::new().unwrap());
    let module = RecordingController::new("M");
    let owner = RecordingController::new("owner");
    let helper = RecordingController::new("helper");
    root.activate_module(Arc::clone(&module)).unwrap();
    root.activate(owner.clone(), module.as_ref()).unwrap();
    root.activate(helper.clone(), module.as_ref()).unwrap();
    let helper_node = helper.context().node().unwrap().id();

    let observed = Arc::new(Mutex::new(Vec::new()));
    let (hierarchy, seen, other) = (
        Arc::downgrade(&root),
        Arc::clone(&observed),
        Arc::clone(&helper),
    );
    let part = InstancePart::builder()
        .export_value(ExportDefinition::new("svc"), Arc::new(()) as ExportValue)
        .on_dispose(move || {
            let root = root_of(&hierarchy)?;
            seen.lock().push((
                root.node_count(),
                root.edges().len(),
                root.find(helper_node).is_some(),
            ));
            other.context().deactivate()
        })
        .build();
    owner.context().add_part(part).unwrap();

    let detaching = Arc::clone(&owner);
    within_deadline(move || detaching.context().deactivate()).unwrap();

    assert_eq!(*observed.lock(), vec![(2, 2, true)]);
    assert!(!owner.context().is_activated());
    assert!(!helper.context().is_activated());
    assert_eq!(helper.count(&LifecycleEvent::Deactivated), 1);
    assert_eq!(root.node_count(), 1);
    assert_eq!(root.edge_count(), 0);
}

#[test]
fn catalog_disposal_and_deactivation_hook_may_reenter() {
    struct Auditor {
        context: ControllerContext,
        root: Weak<HierarchyRoot>,
        nodes_seen: Mutex<Option<usize>>,
    }

    impl Controller for Auditor {
        fn context(&self) -> &ControllerContext {
            &self.context
        }

        fn on_deactivated(&self) -> Result<(), BoxError> {
            let root = root_of(&self.root)?;
            *self.nodes_seen.lock() = Some(root.node_count());
            let late = RecordingController::new("late");
            root.activate(late, root.modules()[0].controller().as_ref())?;
            Ok(())
        }
    }

    let root = Arc::new(HierarchyRoot::new().unwrap());
    let module = RecordingController::new("M");
    root.activate_module(Arc::clone(&module)).unwrap();
    let auditor = Arc::new(Auditor {
        context: ControllerContext::named("auditor"),
        root: Arc::downgrade(&root),
        nodes_seen: Mutex::new(None),
    });
    module.context().activate(auditor.clone()).unwrap();

    let edges_seen = Arc::new(AtomicUsize::new(usize::MAX));
    let (hierarchy, seen) = (Arc::downgrade(&root), Arc::clone(&edges_seen));
    auditor.context().require_node().unwrap().catalog().register(
        vec![ExportDefinition::new("cache")],
        Arc::new(move || {
            let (hierarchy, seen) = (hierarchy.clone(), Arc::clone(&seen));
            Ok(InstancePart::builder()
                .export_value(ExportDefinition::new("cache"), Arc::new(()) as ExportValue)
                .on_dispose(move || {
                    seen.store(root_of(&hierarchy)?.edge_count(), Ordering::SeqCst);
                    Ok(())
                })
                .build())
        }),
    );
    assert_eq!(
        auditor
            .context()
            .query(&ImportDefinition::many("cache"))
            .unwrap()
            .len(),
        1
    );

    let detaching = Arc::clone(&auditor);
    within_deadline(move || detaching.context().deactivate()).unwrap();

    assert_eq!(edges_seen.load(Ordering::SeqCst), 0);
    assert_eq!(*auditor.nodes_seen.lock(), Some(1));
    assert_eq!(root.node_count(), 2);
    assert_eq!(root.edge_count(), 2);
}

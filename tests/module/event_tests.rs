//! Event delivery tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::test_utils::*;
use bllvm_modules::module::api::events::{
    EventCategory, ModuleEventKind, ResolutionEvent, RuntimeEvent, ServiceEventKind,
};
use bllvm_modules::module::{Attributes, FailureKind, Filter, Interest};

fn recorder() -> (
    Arc<Mutex<Vec<RuntimeEvent>>>,
    impl Fn(&RuntimeEvent) -> anyhow::Result<()> + Send + Sync + 'static,
) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    (events, move |event: &RuntimeEvent| -> anyhow::Result<()> {
        sink.lock().push(event.clone());
        Ok(())
    })
}

#[test]
fn test_resolution_events_carry_reasons() {
    let manager = manager();
    let (events, listener) = recorder();
    manager.add_listener(Interest::Categories(EventCategory::RESOLUTION), listener);

    let a = manager.install(consumer("a", "X")).unwrap();
    let b = manager.install(module("b")).unwrap();
    manager.resolve_all().unwrap();
    manager.flush_events().unwrap();

    let events = events.lock();
    assert_eq!(events.len(), 2);
    match &events[0] {
        RuntimeEvent::Resolution(ResolutionEvent::Failed { module, reasons }) => {
            assert_eq!(*module, a);
            assert_eq!(reasons[0].kind, FailureKind::Unsatisfied);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(
        events[1],
        RuntimeEvent::Resolution(ResolutionEvent::Resolved { module: b })
    );
}

#[test]
fn test_module_events_for_update_cascade() {
    let manager = manager();
    let (events, listener) = recorder();
    let a = manager.install(consumer("a", "X")).unwrap();
    let b = manager.install(provider("b", "X")).unwrap();
    manager.resolve_all().unwrap();
    manager.add_listener(Interest::Categories(EventCategory::MODULE), listener);

    manager.update(b, provider("b", "X")).unwrap();
    manager.flush_events().unwrap();

    let kinds: Vec<_> = events
        .lock()
        .iter()
        .filter_map(|e| match e {
            RuntimeEvent::Module { module, kind } => Some((*module, *kind)),
            _ => None,
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            (b, ModuleEventKind::Unresolved),
            (a, ModuleEventKind::Unresolved),
            (b, ModuleEventKind::Updated),
        ]
    );
}

#[test]
fn test_failing_listeners_do_not_block_others() {
    let manager = manager();
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);

    manager.add_listener(
        Interest::Categories(EventCategory::all()),
        |_: &RuntimeEvent| -> anyhow::Result<()> { anyhow::bail!("listener error") },
    );
    manager.add_listener(
        Interest::Categories(EventCategory::all()),
        |_: &RuntimeEvent| -> anyhow::Result<()> { panic!("listener panic") },
    );
    manager.add_listener(
        Interest::Categories(EventCategory::all()),
        move |_: &RuntimeEvent| -> anyhow::Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
    );

    let owner = manager.install(module("a")).unwrap();
    manager.resolve_all().unwrap();
    let registration = manager
        .register_service(owner, &["T"], Attributes::new(), Arc::new(()))
        .unwrap();
    // The synchronous notification must not surface listener failures either
    manager.unregister_service(&registration).unwrap();
    manager.flush_events().unwrap();

    // Installed, Resolved (module), Resolved (resolution), Registered, Unregistering
    assert_eq!(delivered.load(Ordering::SeqCst), 5);
    let failures = manager.recent_listener_failures(100);
    assert_eq!(failures.len(), 10);
    assert!(failures.iter().any(|f| f.error.contains("listener error")));
    assert!(failures.iter().any(|f| f.error.contains("listener panic")));
}

#[test]
fn test_service_listener_sees_end_of_match() {
    let manager = manager();
    let (events, listener) = recorder();
    manager.add_listener(
        Interest::service("Greeter", Filter::parse("(lang=en)").unwrap()),
        listener,
    );

    let owner = manager.install(module("a")).unwrap();
    let registration = manager
        .register_service(
            owner,
            &["Greeter"],
            Attributes::new().with("lang", "en"),
            Arc::new(()),
        )
        .unwrap();
    manager
        .register_service(
            owner,
            &["Greeter"],
            Attributes::new().with("lang", "fr"),
            Arc::new(()),
        )
        .unwrap();
    manager
        .update_service_properties(&registration, Attributes::new().with("lang", "fr"))
        .unwrap();
    manager
        .update_service_properties(&registration, Attributes::new().with("lang", "de"))
        .unwrap();
    manager.flush_events().unwrap();

    let kinds: Vec<ServiceEventKind> = events
        .lock()
        .iter()
        .filter_map(|e| match e {
            RuntimeEvent::Service(service) => Some(service.kind),
            _ => None,
        })
        .collect();
    assert_eq!(
        kinds,
        vec![ServiceEventKind::Registered, ServiceEventKind::ModifiedEndMatch]
    );
}

#[test]
fn test_predicate_listener_and_removal() {
    let manager = manager();
    let (events, listener) = recorder();
    let id = manager.add_listener(
        Interest::predicate(|e| matches!(e, RuntimeEvent::Module { kind: ModuleEventKind::Installed, .. })),
        listener,
    );

    manager.install(module("a")).unwrap();
    manager.resolve_all().unwrap();
    manager.flush_events().unwrap();
    assert_eq!(events.lock().len(), 1);

    assert!(manager.remove_listener(id));
    assert!(!manager.remove_listener(id));
    manager.install(module("b")).unwrap();
    manager.flush_events().unwrap();
    assert_eq!(events.lock().len(), 1);
}

#[test]
fn test_shutdown_delivers_pending_events() {
    let manager = manager();
    let (events, listener) = recorder();
    manager.add_listener(Interest::Categories(EventCategory::MODULE), listener);

    for name in ["a", "b", "c"] {
        manager.install(module(name)).unwrap();
    }
    manager.shutdown();
    assert_eq!(events.lock().len(), 3);
    assert!(!manager.events().is_running());
}

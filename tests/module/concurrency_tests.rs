//! Concurrent use of the graph, resolver and registry

use std::sync::Arc;
use std::thread;

use super::test_utils::*;
use bllvm_modules::module::service::SERVICE_RANKING;
use bllvm_modules::module::{
    Attributes, Capability, ModuleManager, ModuleState, ServiceReference,
};

const THREADS: usize = 8;

/// Every wire of a resolved module points at a resolved module
fn assert_wiring_consistent(manager: &ModuleManager) {
    for (id, state) in manager.modules() {
        let wires = manager.get_wires(id).unwrap();
        if !state.is_resolved() {
            assert!(wires.is_empty(), "unresolved module {} has wires", id);
            continue;
        }
        for wire in wires {
            let provider = manager.state(wire.provider);
            assert!(
                provider.is_some_and(ModuleState::is_resolved),
                "module {} wired to unresolved {}",
                id,
                wire.provider
            );
        }
    }
}

#[test]
fn test_parallel_install_and_resolve() {
    let manager = manager();

    thread::scope(|scope| {
        for i in 0..THREADS {
            let manager = &manager;
            scope.spawn(move || {
                let namespace = format!("X{}", i);
                let p = manager
                    .install(provider(&format!("p{}", i), &namespace))
                    .unwrap();
                let c = manager
                    .install(consumer(&format!("c{}", i), &namespace))
                    .unwrap();
                let report = manager.resolve(&[c]).unwrap();
                assert!(report.is_resolved(c));
                assert_eq!(providers(manager, c), vec![p]);
            });
        }
    });

    assert_eq!(manager.modules().len(), THREADS * 2);
    assert!(manager
        .modules()
        .iter()
        .all(|(_, state)| *state == ModuleState::Resolved));
    assert_wiring_consistent(&manager);
}

#[test]
fn test_parallel_singletons_resolve_once() {
    let manager = manager();

    thread::scope(|scope| {
        for i in 0..THREADS {
            let manager = &manager;
            scope.spawn(move || {
                let id = manager
                    .install(versioned("s", 1, i as u64).singleton(true))
                    .unwrap();
                manager.resolve(&[id]).unwrap();
            });
        }
    });

    let resolved = manager
        .modules()
        .into_iter()
        .filter(|(_, state)| state.is_resolved())
        .count();
    assert_eq!(resolved, 1);
}

#[test]
fn test_parallel_updates_and_resolution_stay_consistent() {
    let manager = manager();
    let b = manager.install(provider("b", "X")).unwrap();
    let consumers: Vec<_> = (0..THREADS)
        .map(|i| manager.install(consumer(&format!("c{}", i), "X")).unwrap())
        .collect();

    thread::scope(|scope| {
        let manager = &manager;
        scope.spawn(move || {
            for minor in 1..20 {
                manager
                    .update(b, versioned("b", 1, minor).capability(Capability::new("X")))
                    .unwrap();
            }
        });
        for c in &consumers {
            let c = *c;
            scope.spawn(move || {
                for _ in 0..20 {
                    manager.resolve(&[c]).unwrap();
                }
            });
        }
    });

    assert_wiring_consistent(&manager);
    manager.resolve_all().unwrap();
    for c in consumers {
        assert_eq!(providers(&manager, c), vec![b]);
    }
}

#[test]
fn test_lookups_always_ranked_during_registration() {
    let manager = Arc::new(manager());
    let owner = manager.install(module("owner")).unwrap();

    let is_ranked = |refs: &[ServiceReference]| {
        refs.windows(2)
            .all(|w| w[0].ranking_order(&w[1]) != std::cmp::Ordering::Greater)
    };

    thread::scope(|scope| {
        for t in 0..4i64 {
            let manager = &manager;
            scope.spawn(move || {
                for i in 0..50i64 {
                    let registration = manager
                        .register_service(
                            owner,
                            &["Greeter"],
                            Attributes::new().with(SERVICE_RANKING, (i * 7 + t) % 11),
                            Arc::new(i),
                        )
                        .unwrap();
                    if i % 5 == 0 {
                        manager.unregister_service(&registration).unwrap();
                    }
                }
            });
        }
        for _ in 0..4 {
            let manager = &manager;
            scope.spawn(move || {
                for _ in 0..100 {
                    let found = manager.lookup("Greeter", None).unwrap();
                    assert!(is_ranked(&found));
                }
            });
        }
    });

    assert_eq!(manager.lookup("Greeter", None).unwrap().len(), 4 * 40);
}

#[test]
fn test_registration_racing_uninstall_leaves_no_service() {
    let manager = manager();

    for i in 0..2000 {
        let id = manager.install(module(&format!("m{}", i))).unwrap();
        thread::scope(|scope| {
            let manager = &manager;
            scope.spawn(move || {
                // Either outcome is fine as long as nothing is left behind
                let _ = manager.register_service(id, &["T"], Attributes::new(), Arc::new(i));
            });
            scope.spawn(move || manager.uninstall(id).unwrap());
        });

        assert_eq!(manager.state(id), Some(ModuleState::Uninstalled));
        assert!(
            manager.services().registered_by(id).is_empty(),
            "module {} kept a service after uninstall",
            id
        );
    }
    assert!(manager.lookup("T", None).unwrap().is_empty());
    assert!(manager.services().is_empty());
}

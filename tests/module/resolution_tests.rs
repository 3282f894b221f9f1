//! Resolution tests
//!
//! Scenarios for the batch resolver: wiring, failure attribution, candidate
//! preference, singletons, uses constraints and re-resolution after graph
//! changes.

use super::test_utils::*;
use bllvm_modules::module::model::VersionRange;
use bllvm_modules::module::registry::{CapabilityRef, RequirementRef};
use bllvm_modules::module::resolver::ModuleOutcome;
use bllvm_modules::module::{
    Capability, FailureKind, ModuleError, ModuleManager, ModuleState, Requirement, Version,
};
use tokio_util::sync::CancellationToken;

#[test]
fn test_requirement_wired_to_later_installed_provider() {
    let manager = manager();
    let a = manager.install(consumer("a", "X")).unwrap();
    let b = manager
        .install(module("b").capability(Capability::new("X").with_version(Version::new(1, 0, 0))))
        .unwrap();

    let report = manager.resolve_all().unwrap();
    assert!(report.is_success());
    assert_eq!(manager.state(a), Some(ModuleState::Resolved));

    let wires = manager.get_wires(a).unwrap();
    assert_eq!(wires.len(), 1);
    assert_eq!(wires[0].provider, b);
    assert_eq!(wires[0].capability, CapabilityRef { module: b, index: 0 });
    assert_eq!(wires[0].capability_type.namespace, "X");
}

#[test]
fn test_update_removing_capability_unresolves_dependent() {
    let manager = manager();
    let a = manager.install(consumer("a", "X")).unwrap();
    let b = manager.install(provider("b", "X")).unwrap();
    manager.resolve_all().unwrap();

    manager.update(b, versioned("b", 2, 0)).unwrap();
    assert_eq!(manager.state(a), Some(ModuleState::Installed));
    assert!(manager.get_wires(a).unwrap().is_empty());

    let report = manager.resolve_all().unwrap();
    assert!(report.is_resolved(b));
    let reasons = report.failures(a).expect("a should fail");
    assert_eq!(reasons.len(), 1);
    assert_eq!(reasons[0].requirer, a);
    assert_eq!(
        reasons[0].requirement,
        Some(RequirementRef { module: a, index: 0 })
    );
    assert_eq!(reasons[0].kind, FailureKind::Unsatisfied);
}

#[test]
fn test_failure_names_the_unsatisfiable_requirement_of_a_provider() {
    let manager = manager();
    let a = manager.install(consumer("a", "X")).unwrap();
    let b = manager
        .install(provider("b", "X").requirement(Requirement::new("Y")))
        .unwrap();

    let report = manager.resolve(&[a]).unwrap();
    let reasons = report.failures(a).unwrap();
    assert_eq!(reasons[0].requirer, b);
    assert_eq!(
        reasons[0].requirement,
        Some(RequirementRef { module: b, index: 0 })
    );
    assert_eq!(reasons[0].kind, FailureKind::Unsatisfied);
    assert!(report.outcome(b).is_none());
    assert_eq!(manager.state(b), Some(ModuleState::Installed));
}

#[test]
fn test_failed_provider_is_reported_as_no_resolvable_provider() {
    let manager = manager();
    let b = manager
        .install(provider("b", "X").requirement(Requirement::new("Y")))
        .unwrap();
    let a = manager.install(consumer("a", "X")).unwrap();

    let report = manager.resolve_all().unwrap();
    assert_eq!(report.failed().count(), 2);
    let reasons = report.failures(a).unwrap();
    assert_eq!(
        reasons[0].kind,
        FailureKind::NoResolvableProvider { candidates: vec![b] }
    );
    assert_eq!(
        reasons[0].requirement,
        Some(RequirementRef { module: a, index: 0 })
    );
}

#[test]
fn test_resolving_twice_is_idempotent() {
    let manager = manager();
    let a = manager.install(consumer("a", "X")).unwrap();
    let b = manager.install(provider("b", "X")).unwrap();
    manager.resolve_all().unwrap();
    let wires = manager.get_wires(a).unwrap();
    let generation = manager.graph().generation();

    let report = manager.resolve(&[a, b]).unwrap();
    assert!(report.is_success());
    assert_eq!(report.newly_resolved().count(), 0);
    assert_eq!(
        report.outcome(a),
        Some(&ModuleOutcome::Resolved { already: true })
    );
    assert_eq!(manager.get_wires(a).unwrap(), wires);
    assert_eq!(manager.graph().generation(), generation);
    assert!(manager.resolve_all().unwrap().outcomes.is_empty());
}

fn build_mixed_graph(manager: &ModuleManager) {
    manager.install(consumer("app", "X").requirement(Requirement::new("Y"))).unwrap();
    manager.install(versioned("x-old", 1, 0).capability(Capability::new("X"))).unwrap();
    manager.install(versioned("x-new", 2, 0).capability(Capability::new("X"))).unwrap();
    manager
        .install(provider("y", "Y").requirement(Requirement::new("X")))
        .unwrap();
    manager.install(consumer("broken", "Missing")).unwrap();
    manager
        .install(module("opt").requirement(Requirement::new("Y").optional()))
        .unwrap();
}

fn resolution_fingerprint(manager: &ModuleManager) -> String {
    let report = manager.resolve_all().unwrap();
    let wires: Vec<_> = manager
        .modules()
        .into_iter()
        .map(|(id, _)| (id, manager.get_wires(id).unwrap()))
        .collect();
    serde_json::to_string(&(report, wires)).unwrap()
}

#[test]
fn test_identical_graphs_resolve_identically() {
    let first = manager();
    let second = manager();
    build_mixed_graph(&first);
    build_mixed_graph(&second);

    assert_eq!(resolution_fingerprint(&first), resolution_fingerprint(&second));
}

#[test]
fn test_higher_version_preferred() {
    let manager = manager();
    let a = manager.install(consumer("a", "X")).unwrap();
    manager
        .install(versioned("b1", 1, 0).capability(Capability::new("X")))
        .unwrap();
    let b2 = manager
        .install(versioned("b2", 2, 0).capability(Capability::new("X")))
        .unwrap();

    manager.resolve(&[a]).unwrap();
    assert_eq!(providers(&manager, a), vec![b2]);
}

#[test]
fn test_resolved_provider_preferred_over_newer_one() {
    let manager = manager();
    let b1 = manager
        .install(versioned("b1", 1, 0).capability(Capability::new("X")))
        .unwrap();
    manager.resolve(&[b1]).unwrap();
    manager
        .install(versioned("b2", 2, 0).capability(Capability::new("X")))
        .unwrap();
    let a = manager.install(consumer("a", "X")).unwrap();

    manager.resolve(&[a]).unwrap();
    assert_eq!(providers(&manager, a), vec![b1]);
}

#[test]
fn test_lower_id_breaks_ties() {
    let manager = manager();
    let first = manager.install(provider("p1", "X")).unwrap();
    manager.install(provider("p2", "X")).unwrap();
    let a = manager.install(consumer("a", "X")).unwrap();

    manager.resolve(&[a]).unwrap();
    assert_eq!(providers(&manager, a), vec![first]);
}

#[test]
fn test_filter_and_version_range_select_provider() {
    let manager = manager();
    let old = manager
        .install(
            module("old").capability(
                Capability::new("X")
                    .with_version(Version::new(1, 4, 0))
                    .with_attribute("lang", "en"),
            ),
        )
        .unwrap();
    manager
        .install(
            module("new").capability(
                Capability::new("X")
                    .with_version(Version::new(2, 0, 0))
                    .with_attribute("lang", "en"),
            ),
        )
        .unwrap();
    manager
        .install(
            module("french").capability(
                Capability::new("X")
                    .with_version(Version::new(1, 9, 0))
                    .with_attribute("lang", "fr"),
            ),
        )
        .unwrap();

    let range = VersionRange::parse("[1.0.0,2.0.0)").unwrap();
    let requirement = Requirement::new("X")
        .with_filter_str("(lang=en)")
        .unwrap()
        .with_version_range(&range);
    let a = manager.install(module("a").requirement(requirement)).unwrap();

    manager.resolve(&[a]).unwrap();
    assert_eq!(providers(&manager, a), vec![old]);
}

#[test]
fn test_backtracks_to_next_candidate() {
    let manager = manager();
    // Preferred by version but unresolvable
    manager
        .install(
            versioned("dead-end", 2, 0)
                .capability(Capability::new("X"))
                .requirement(Requirement::new("Missing")),
        )
        .unwrap();
    let working = manager
        .install(versioned("working", 1, 0).capability(Capability::new("X")))
        .unwrap();
    let a = manager.install(consumer("a", "X")).unwrap();

    let report = manager.resolve(&[a]).unwrap();
    assert!(report.is_success());
    assert_eq!(providers(&manager, a), vec![working]);
}

#[test]
fn test_optional_requirement() {
    let manager = manager();
    let a = manager
        .install(module("a").requirement(Requirement::new("X").optional()))
        .unwrap();
    manager.resolve(&[a]).unwrap();
    assert_eq!(manager.state(a), Some(ModuleState::Resolved));
    assert!(manager.get_wires(a).unwrap().is_empty());

    let c = manager
        .install(module("c").requirement(Requirement::new("X").optional()))
        .unwrap();
    let b = manager.install(provider("b", "X")).unwrap();
    manager.resolve(&[c]).unwrap();
    assert_eq!(providers(&manager, c), vec![b]);
}

#[test]
fn test_only_one_singleton_per_name_resolves() {
    let manager = manager();
    let s1 = manager.install(versioned("s", 1, 0).singleton(true)).unwrap();
    let s2 = manager.install(versioned("s", 2, 0).singleton(true)).unwrap();

    let report = manager.resolve_all().unwrap();
    assert!(report.is_resolved(s1));
    let reasons = report.failures(s2).unwrap();
    assert_eq!(reasons[0].requirement, None);
    assert_eq!(
        reasons[0].kind,
        FailureKind::SingletonConflict {
            candidate: s2,
            competitor: s1
        }
    );

    manager.uninstall(s1).unwrap();
    let report = manager.resolve_all().unwrap();
    assert!(report.is_resolved(s2));
}

#[test]
fn test_singleton_candidate_rejected_for_requirement() {
    let manager = manager();
    let s1 = manager.install(versioned("s", 1, 0).singleton(true)).unwrap();
    manager.resolve(&[s1]).unwrap();
    let s2 = manager.install(versioned("s", 2, 0).singleton(true)).unwrap();

    let requirement = Requirement::module("s")
        .with_version_range(&VersionRange::at_least(Version::new(2, 0, 0)));
    let a = manager.install(module("a").requirement(requirement)).unwrap();

    let report = manager.resolve(&[a]).unwrap();
    let reasons = report.failures(a).unwrap();
    assert_eq!(
        reasons[0].kind,
        FailureKind::SingletonConflict {
            candidate: s2,
            competitor: s1
        }
    );
    assert_eq!(manager.state(s2), Some(ModuleState::Installed));
}

/// a -> P -> T(vendor=one), a -> Q -> T(vendor=two)
fn install_diamond(manager: &ModuleManager, follow_q: bool) -> [bllvm_modules::ModuleId; 5] {
    let t1 = manager
        .install(module("t1").capability(Capability::new("T").with_attribute("vendor", "one")))
        .unwrap();
    let t2 = manager
        .install(module("t2").capability(Capability::new("T").with_attribute("vendor", "two")))
        .unwrap();
    let p = manager
        .install(
            provider("p", "P")
                .requirement(Requirement::new("T").with_filter_str("(vendor=one)").unwrap()),
        )
        .unwrap();
    let q = manager
        .install(
            provider("q", "Q")
                .requirement(Requirement::new("T").with_filter_str("(vendor=two)").unwrap()),
        )
        .unwrap();
    let via_q = if follow_q {
        Requirement::new("Q")
    } else {
        Requirement::new("Q").without_uses()
    };
    let a = manager
        .install(consumer("a", "P").requirement(via_q))
        .unwrap();
    [t1, t2, p, q, a]
}

#[test]
fn test_diamond_fails_with_uses_conflict() {
    let manager = manager();
    let [t1, t2, p, q, a] = install_diamond(&manager, true);

    let report = manager.resolve_all().unwrap();
    for module in [t1, t2, p, q] {
        assert!(report.is_resolved(module));
    }
    let reasons = report.failures(a).expect("a must not pick a side");
    assert!(reasons.iter().any(|r| matches!(
        &r.kind,
        FailureKind::UsesConflict { capability_type, providers }
            if capability_type.namespace == "T" && providers == &vec![t1, t2]
    )));
    assert_eq!(manager.state(a), Some(ModuleState::Installed));
}

#[test]
fn test_requirement_without_uses_is_not_followed() {
    let manager = manager();
    let [_, _, p, q, a] = install_diamond(&manager, false);

    let report = manager.resolve(&[a]).unwrap();
    assert!(report.is_success());
    assert_eq!(providers(&manager, a), vec![p, q]);
}

#[test]
fn test_stale_dependents_are_picked_up_implicitly() {
    let manager = manager();
    let a = manager.install(consumer("a", "X")).unwrap();
    let b = manager.install(provider("b", "X")).unwrap();
    manager.resolve_all().unwrap();

    manager
        .update(b, versioned("b", 1, 1).capability(Capability::new("X")))
        .unwrap();
    assert_eq!(manager.graph().stale_modules(), vec![a]);

    let report = manager.resolve(&[b]).unwrap();
    assert!(report.is_resolved(a));
    assert!(report.is_resolved(b));
    assert_eq!(providers(&manager, a), vec![b]);
    assert!(manager.graph().stale_modules().is_empty());
}

#[test]
fn test_uninstalled_provider_replaced_by_alternative() {
    let manager = manager();
    let b1 = manager
        .install(versioned("b1", 1, 0).capability(Capability::new("X")))
        .unwrap();
    let b2 = manager
        .install(versioned("b2", 2, 0).capability(Capability::new("X")))
        .unwrap();
    let a = manager.install(consumer("a", "X")).unwrap();
    manager.resolve_all().unwrap();
    assert_eq!(providers(&manager, a), vec![b2]);

    manager.uninstall(b2).unwrap();
    assert_eq!(manager.state(a), Some(ModuleState::Installed));
    assert!(matches!(
        manager.resolve(&[b2]),
        Err(ModuleError::InvalidState { .. })
    ));
    assert!(matches!(
        manager.update(b2, module("b2")),
        Err(ModuleError::InvalidState { .. })
    ));

    manager.resolve_all().unwrap();
    assert_eq!(providers(&manager, a), vec![b1]);
}

#[test]
fn test_dependency_cycle_resolves() {
    let manager = manager();
    let a = manager
        .install(provider("a", "A").requirement(Requirement::new("B")))
        .unwrap();
    let b = manager
        .install(provider("b", "B").requirement(Requirement::new("A")))
        .unwrap();

    let report = manager.resolve(&[a]).unwrap();
    assert!(report.is_success());
    assert_eq!(providers(&manager, a), vec![b]);
    assert_eq!(providers(&manager, b), vec![a]);
}

#[test]
fn test_dynamic_requirement_wired_on_demand() {
    let manager = manager();
    let a = manager
        .install(module("a").requirement(Requirement::new("Y").dynamic()))
        .unwrap();
    manager.resolve_all().unwrap();
    assert_eq!(manager.state(a), Some(ModuleState::Resolved));
    assert_eq!(manager.resolve_dynamic(a, 0).unwrap(), None);

    let c = manager.install(provider("c", "Y")).unwrap();
    manager.resolve_all().unwrap();
    let wire = manager.resolve_dynamic(a, 0).unwrap().expect("provider is resolved");
    assert_eq!(wire.provider, c);
    assert!(wire.dynamic);
    assert_eq!(manager.get_wires(a).unwrap(), vec![wire]);
}

#[test]
fn test_dynamic_requirement_respects_uses_constraint() {
    let manager = manager();
    let [_, t2, _, _, _] = install_diamond(&manager, true);
    let b = manager
        .install(
            consumer("b", "P").requirement(
                Requirement::new("T")
                    .with_filter_str("(vendor=two)")
                    .unwrap()
                    .dynamic(),
            ),
        )
        .unwrap();
    manager.resolve(&[b, t2]).unwrap();
    assert_eq!(manager.state(t2), Some(ModuleState::Resolved));

    // b already sees T through P, so wiring T2 would split the space
    assert_eq!(manager.resolve_dynamic(b, 1).unwrap(), None);
}

#[test]
fn test_cancelled_resolution_has_no_effect() {
    let manager = manager();
    let a = manager.install(consumer("a", "X")).unwrap();
    let b = manager.install(provider("b", "X")).unwrap();
    let token = CancellationToken::new();
    token.cancel();

    assert!(matches!(
        manager.resolve_with_cancel(&[a], &token),
        Err(ModuleError::Cancelled)
    ));
    assert_eq!(manager.state(a), Some(ModuleState::Installed));
    assert_eq!(manager.state(b), Some(ModuleState::Installed));
    assert!(manager.get_wires(a).unwrap().is_empty());

    let report = manager
        .resolve_with_cancel(&[a], &CancellationToken::new())
        .unwrap();
    assert!(report.is_success());
}

#[test]
fn test_invalid_descriptors_rejected() {
    let manager = manager();
    assert!(matches!(
        manager.install(module("")),
        Err(ModuleError::InvalidDescriptor(_))
    ));
    assert!(matches!(
        manager.install(module("bad").capability(Capability::new("module"))),
        Err(ModuleError::InvalidDescriptor(_))
    ));
    assert!(manager.modules().is_empty());
}

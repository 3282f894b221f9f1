//! Fragment tests
//!
//! Fragments attach to a host when it resolves and contribute their
//! capabilities and requirements to it.

use super::test_utils::*;
use bllvm_modules::module::registry::{CapabilityRef, RequirementRef};
use bllvm_modules::module::{Capability, FailureKind, ModuleState, Requirement};

#[test]
fn test_fragment_attaches_and_contributes_capability() {
    let manager = manager();
    let host = manager.install(module("host")).unwrap();
    let fragment = manager
        .install(module("frag").fragment_of("host").capability(Capability::new("Z")))
        .unwrap();
    let a = manager.install(consumer("a", "Z")).unwrap();

    let report = manager.resolve_all().unwrap();
    assert!(report.is_success());
    assert_eq!(manager.state(fragment), Some(ModuleState::Resolved));

    let host_wiring = manager.wiring(host).unwrap();
    assert_eq!(host_wiring.fragments, vec![fragment]);
    let fragment_wiring = manager.wiring(fragment).unwrap();
    assert_eq!(fragment_wiring.hosts, vec![host]);
    assert_eq!(fragment_wiring.wires[0].provider, host);

    // The host offers the fragment's capability
    let wires = manager.get_wires(a).unwrap();
    assert_eq!(wires[0].provider, host);
    assert_eq!(
        wires[0].capability,
        CapabilityRef {
            module: fragment,
            index: 0
        }
    );
}

#[test]
fn test_fragment_requirement_wired_into_host() {
    let manager = manager();
    let y = manager.install(provider("y", "Y")).unwrap();
    let host = manager.install(module("host")).unwrap();
    let fragment = manager
        .install(module("frag").fragment_of("host").requirement(Requirement::new("Y")))
        .unwrap();

    manager.resolve(&[host]).unwrap();
    let wires = manager.get_wires(host).unwrap();
    assert_eq!(wires.len(), 1);
    assert_eq!(wires[0].requirer, host);
    assert_eq!(
        wires[0].requirement,
        RequirementRef {
            module: fragment,
            index: 1
        }
    );
    assert_eq!(wires[0].provider, y);
}

#[test]
fn test_unsatisfiable_fragment_is_detached() {
    let manager = manager();
    let host = manager.install(module("host")).unwrap();
    let fragment = manager
        .install(module("frag").fragment_of("host").requirement(Requirement::new("Missing")))
        .unwrap();

    let report = manager.resolve_all().unwrap();
    assert!(report.is_resolved(host));
    assert!(manager.wiring(host).unwrap().fragments.is_empty());

    let reasons = report.failures(fragment).unwrap();
    assert_eq!(
        reasons[0].requirement,
        Some(RequirementRef {
            module: fragment,
            index: 1
        })
    );
    assert_eq!(reasons[0].kind, FailureKind::Unsatisfied);
    assert_eq!(manager.state(fragment), Some(ModuleState::Installed));
}

#[test]
fn test_fragment_for_resolved_host_reports_host() {
    let manager = manager();
    let host = manager.install(module("host")).unwrap();
    manager.resolve(&[host]).unwrap();
    let fragment = manager.install(module("frag").fragment_of("host")).unwrap();

    let report = manager.resolve(&[fragment]).unwrap();
    let reasons = report.failures(fragment).unwrap();
    assert_eq!(
        reasons[0].kind,
        FailureKind::HostAlreadyResolved { hosts: vec![host] }
    );
}

#[test]
fn test_fragment_without_host_is_unsatisfied() {
    let manager = manager();
    let fragment = manager.install(module("frag").fragment_of("nowhere")).unwrap();

    let report = manager.resolve_all().unwrap();
    let reasons = report.failures(fragment).unwrap();
    assert_eq!(reasons[0].kind, FailureKind::Unsatisfied);
    assert_eq!(
        reasons[0].requirement,
        Some(RequirementRef {
            module: fragment,
            index: 0
        })
    );
}

#[test]
fn test_resolving_fragment_resolves_its_host() {
    let manager = manager();
    let host = manager.install(module("host")).unwrap();
    let fragment = manager.install(module("frag").fragment_of("host")).unwrap();

    let report = manager.resolve(&[fragment]).unwrap();
    assert!(report.is_resolved(fragment));
    assert_eq!(report.also_resolved, vec![host]);
    assert_eq!(manager.state(host), Some(ModuleState::Resolved));
}

#[test]
fn test_host_update_releases_fragment() {
    let manager = manager();
    let host = manager.install(module("host")).unwrap();
    let fragment = manager.install(module("frag").fragment_of("host")).unwrap();
    manager.resolve_all().unwrap();

    manager.update(host, versioned("host", 1, 1)).unwrap();
    assert_eq!(manager.state(fragment), Some(ModuleState::Installed));

    let report = manager.resolve(&[host]).unwrap();
    assert!(report.is_resolved(fragment));
    assert_eq!(manager.wiring(host).unwrap().fragments, vec![fragment]);
}

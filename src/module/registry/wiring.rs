//! Wires and per-module wiring
//!
//! A wire records that one requirement of a module is satisfied by one
//! capability of another. Wires are immutable; a module's wiring is replaced
//! wholesale when it resolves again.

use serde::{Deserialize, Serialize};

use crate::module::model::CapabilityType;
use crate::module::traits::ModuleId;

/// A requirement, identified by the module that declared it and its index
///
/// For requirements contributed by a fragment, `module` is the fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequirementRef {
    pub module: ModuleId,
    pub index: usize,
}

/// A capability, identified by the declaring module and its index in that
/// module's effective capability list
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CapabilityRef {
    pub module: ModuleId,
    pub index: usize,
}

/// Committed binding of one requirement to one capability
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Wire {
    /// Module whose class space the wire belongs to (a host for fragment requirements)
    pub requirer: ModuleId,
    pub requirement: RequirementRef,
    /// Module providing the capability (a host for fragment capabilities)
    pub provider: ModuleId,
    pub capability: CapabilityRef,
    pub capability_type: CapabilityType,
    /// Produced by on-demand resolution of a dynamic requirement
    #[serde(default)]
    pub dynamic: bool,
}

/// Wiring of a resolved module
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleWiring {
    /// Wires in requirement order: own requirements first, then attached fragments'
    pub wires: Vec<Wire>,
    /// Fragments attached to this module (hosts only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fragments: Vec<ModuleId>,
    /// Hosts this module is attached to (fragments only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<ModuleId>,
}

impl ModuleWiring {
    /// Modules this wiring depends on, excluding the module itself
    pub fn providers(&self, owner: ModuleId) -> impl Iterator<Item = ModuleId> + '_ {
        self.wires
            .iter()
            .map(|w| w.provider)
            .chain(self.hosts.iter().copied())
            .filter(move |p| *p != owner)
    }

    /// Whether releasing `module` invalidates this wiring
    pub fn depends_on(&self, owner: ModuleId, module: ModuleId) -> bool {
        self.providers(owner).any(|p| p == module)
            || self.fragments.contains(&module)
            || self.wires.iter().any(|w| {
                (w.requirement.module == module && w.requirement.module != owner)
                    || (w.capability.module == module && w.capability.module != w.provider)
            })
    }

    /// The wire satisfying a given requirement, if any
    pub fn wire_for(&self, requirement: RequirementRef) -> Option<&Wire> {
        self.wires.iter().find(|w| w.requirement == requirement)
    }
}

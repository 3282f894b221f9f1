//! Uses-constraint consistency check
//!
//! The consistency space of a module maps every capability type it can reach
//! to the providers it reaches it through: its direct wires, plus the wires of
//! each provider followed transitively while the requirement's `uses` flag is
//! set. A type reached through two providers is a conflict.

use std::collections::{BTreeMap, BTreeSet};

use crate::module::model::{CapabilityType, HOST_NAMESPACE};
use crate::module::registry::{RequirementRef, Wire};
use crate::module::traits::ModuleId;

/// Where the check reads wires and requirement flags from
pub(super) trait WiringSource {
    /// Current wires of `module`; empty when it has none
    fn wires(&self, module: ModuleId) -> &[Wire];

    /// Whether the requirement asks for its provider's wires to be followed
    fn uses(&self, requirement: RequirementRef) -> bool;
}

/// Two providers reachable for one capability type
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Conflict {
    pub capability_type: CapabilityType,
    pub providers: Vec<ModuleId>,
}

pub(super) type Space = BTreeMap<CapabilityType, BTreeSet<ModuleId>>;

/// Build the consistency space of `module`
pub(super) fn space(source: &impl WiringSource, module: ModuleId) -> Space {
    let mut space = Space::new();
    let mut visited = BTreeSet::from([module]);
    let mut worklist = vec![module];

    while let Some(current) = worklist.pop() {
        for wire in source.wires(current) {
            if wire.capability_type.namespace == HOST_NAMESPACE {
                continue;
            }
            space
                .entry(wire.capability_type.clone())
                .or_default()
                .insert(wire.provider);
            if source.uses(wire.requirement) && visited.insert(wire.provider) {
                worklist.push(wire.provider);
            }
        }
    }

    space
}

/// Check every module in `modules`; returns the first conflict found
pub(super) fn check(
    source: &impl WiringSource,
    modules: impl IntoIterator<Item = ModuleId>,
) -> Result<(), Conflict> {
    for module in modules {
        let space = space(source, module);
        if let Some((capability_type, providers)) = space.into_iter().find(|(_, p)| p.len() > 1) {
            return Err(Conflict {
                capability_type,
                providers: providers.into_iter().collect(),
            });
        }
    }
    Ok(())
}

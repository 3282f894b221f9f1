//! Resolution reports
//!
//! Resolution failures are data, not errors: every failed module carries an
//! ordered list of reasons, each attributed to the requirement that could not
//! be satisfied.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::module::model::CapabilityType;
use crate::module::registry::RequirementRef;
use crate::module::traits::ModuleId;

/// Why a requirement could not be wired
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// No capability in the graph matches the requirement
    Unsatisfied,
    /// Matching capabilities exist but none of their providers can resolve
    NoResolvableProvider { candidates: Vec<ModuleId> },
    /// The candidate is a singleton and another module of that name is resolved
    SingletonConflict {
        candidate: ModuleId,
        competitor: ModuleId,
    },
    /// Wiring the candidate would expose two providers of the same capability type
    UsesConflict {
        capability_type: CapabilityType,
        providers: Vec<ModuleId>,
    },
    /// Every host a fragment could attach to is already resolved
    HostAlreadyResolved { hosts: Vec<ModuleId> },
    /// The search step bound was reached
    SearchLimitExceeded,
}

/// A structured failure reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    /// Module whose requirement failed
    pub requirer: ModuleId,
    /// The failing requirement; `None` when the module itself was rejected
    pub requirement: Option<RequirementRef>,
    #[serde(flatten)]
    pub kind: FailureKind,
}

impl FailureReason {
    pub fn new(requirer: ModuleId, requirement: Option<RequirementRef>, kind: FailureKind) -> Self {
        Self {
            requirer,
            requirement,
            kind,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.requirement {
            Some(r) if r.module == self.requirer => {
                write!(f, "module {} requirement {}: ", self.requirer, r.index)?
            }
            Some(r) => write!(
                f,
                "module {} requirement {} (from fragment {}): ",
                self.requirer, r.index, r.module
            )?,
            None => write!(f, "module {}: ", self.requirer)?,
        }
        match &self.kind {
            FailureKind::Unsatisfied => f.write_str("no matching capability"),
            FailureKind::NoResolvableProvider { candidates } => {
                write!(f, "no resolvable provider among {}", join(candidates))
            }
            FailureKind::SingletonConflict {
                candidate,
                competitor,
            } => write!(
                f,
                "singleton {} conflicts with resolved {}",
                candidate, competitor
            ),
            FailureKind::UsesConflict {
                capability_type,
                providers,
            } => write!(
                f,
                "uses conflict on {} between {}",
                capability_type,
                join(providers)
            ),
            FailureKind::HostAlreadyResolved { hosts } => {
                write!(f, "hosts {} are already resolved", join(hosts))
            }
            FailureKind::SearchLimitExceeded => f.write_str("search limit exceeded"),
        }
    }
}

fn join(ids: &[ModuleId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result for one requested module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModuleOutcome {
    /// The module is resolved; `already` when it was resolved before the batch
    Resolved { already: bool },
    Failed { reasons: Vec<FailureReason> },
}

/// Outcome of one resolution batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionReport {
    /// Requested modules plus the stale modules the batch picked up
    pub outcomes: BTreeMap<ModuleId, ModuleOutcome>,
    /// Modules resolved as a side effect (providers, attached fragments)
    #[serde(default)]
    pub also_resolved: Vec<ModuleId>,
}

impl ResolutionReport {
    /// Whether every module in the report resolved
    pub fn is_success(&self) -> bool {
        self.outcomes
            .values()
            .all(|o| matches!(o, ModuleOutcome::Resolved { .. }))
    }

    pub fn outcome(&self, module: ModuleId) -> Option<&ModuleOutcome> {
        self.outcomes.get(&module)
    }

    pub fn is_resolved(&self, module: ModuleId) -> bool {
        matches!(self.outcome(module), Some(ModuleOutcome::Resolved { .. }))
            || self.also_resolved.contains(&module)
    }

    /// Failure reasons of a module that did not resolve
    pub fn failures(&self, module: ModuleId) -> Option<&[FailureReason]> {
        match self.outcome(module)? {
            ModuleOutcome::Failed { reasons } => Some(reasons),
            ModuleOutcome::Resolved { .. } => None,
        }
    }

    /// Modules that resolved in this batch (not those already resolved)
    pub fn newly_resolved(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, ModuleOutcome::Resolved { already: false }))
            .map(|(id, _)| *id)
            .chain(self.also_resolved.iter().copied())
    }

    /// Modules that failed, ascending by id
    pub fn failed(&self) -> impl Iterator<Item = (ModuleId, &[FailureReason])> + '_ {
        self.outcomes.iter().filter_map(|(id, o)| match o {
            ModuleOutcome::Failed { reasons } => Some((*id, reasons.as_slice())),
            ModuleOutcome::Resolved { .. } => None,
        })
    }
}

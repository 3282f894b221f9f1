//! Candidate enumeration and ordering
//!
//! Candidates for a requirement come from the namespace index, are filtered by
//! the matcher and sorted by preference: providers already resolved (or already
//! pulled into the current search) first, then higher version, then lower
//! provider id. Capability origin breaks any remaining tie.

use std::cmp::Ordering;

use super::batch::Batch;
use super::search::SearchState;
use crate::module::model::{CapabilityType, Requirement, Version, HOST_NAMESPACE};
use crate::module::registry::CapabilityRef;
use crate::module::traits::ModuleId;

#[derive(Debug, Clone)]
pub(super) struct Candidate {
    /// Module the wire points at; the host when the capability comes from a fragment
    pub provider: ModuleId,
    pub capability: CapabilityRef,
    pub capability_type: CapabilityType,
    preferred: bool,
    version: Version,
}

impl Candidate {
    fn preference(&self, other: &Self) -> Ordering {
        other
            .preferred
            .cmp(&self.preferred)
            .then_with(|| other.version.cmp(&self.version))
            .then_with(|| self.provider.cmp(&other.provider))
            .then_with(|| self.capability.cmp(&other.capability))
    }
}

#[derive(Debug, Default)]
pub(super) struct CandidateSet {
    pub candidates: Vec<Candidate>,
    /// Matching providers skipped because they already failed in this batch
    pub pruned: Vec<ModuleId>,
}

impl Batch<'_> {
    /// Ordered candidates for `requirement` given the current search state
    pub(super) fn candidates(
        &self,
        state: &SearchState,
        requirement: &Requirement,
        resolved_only: bool,
    ) -> CandidateSet {
        let mut set = CandidateSet::default();

        for origin in self.snapshot.providers_of(&requirement.namespace) {
            let Some(record) = self.record(origin) else {
                continue;
            };
            for (index, capability) in record.capabilities.iter().enumerate() {
                if !requirement.matches(capability) {
                    continue;
                }
                let capability_ref = CapabilityRef {
                    module: origin,
                    index,
                };
                let version = capability
                    .version()
                    .unwrap_or(&record.descriptor.version)
                    .clone();

                for provider in self.providers_for(state, origin) {
                    if self.failed.contains_key(&provider) {
                        set.pruned.push(provider);
                        continue;
                    }
                    let preferred = self.is_resolved(provider) || state.is_pending(provider);
                    if resolved_only && !self.is_resolved(provider) {
                        continue;
                    }
                    set.candidates.push(Candidate {
                        provider,
                        capability: capability_ref,
                        capability_type: capability.capability_type(),
                        preferred,
                        version: version.clone(),
                    });
                }
            }
        }

        set.candidates.sort_by(Candidate::preference);
        set.pruned.sort();
        set.pruned.dedup();
        set
    }

    /// Modules that can offer a capability declared by `origin`
    ///
    /// A regular module offers its own capabilities. A fragment's capabilities
    /// are offered by the hosts it is, or can become, attached to.
    fn providers_for(&self, state: &SearchState, origin: ModuleId) -> Vec<ModuleId> {
        let is_fragment = self.record(origin).is_some_and(|r| r.is_fragment());
        if !is_fragment {
            return vec![origin];
        }

        self.snapshot
            .providers_of(HOST_NAMESPACE)
            .filter(|host| {
                let attached = state.fragments_of(*host).is_some_and(|f| f.contains(&origin))
                    || self
                        .wiring_of(*host)
                        .is_some_and(|w| w.fragments.contains(&origin));
                let attachable = !self.is_resolved(*host)
                    && !state.is_pending(*host)
                    && self.is_attachable(origin)
                    && self.fragment_matches_host(origin, *host);
                attached || attachable
            })
            .collect()
    }
}

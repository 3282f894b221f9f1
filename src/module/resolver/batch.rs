//! Resolution batch
//!
//! One batch resolves a set of targets against a single graph snapshot. Each
//! target is searched independently; successful searches are folded into the
//! batch so later targets see them as resolved providers. The batch produces
//! a [`WiringPlan`] plus the report, and never touches the graph itself.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::report::{FailureKind, FailureReason, ModuleOutcome, ResolutionReport};
use super::search::{SearchError, SearchState};
use crate::module::model::{Capability, Requirement, Version, HOST_NAMESPACE};
use crate::module::registry::{
    CapabilityRef, GraphSnapshot, ModuleRecord, ModuleWiring, RequirementRef, Wire, WiringPlan,
};
use crate::module::traits::{ModuleError, ModuleId, ModuleState};

pub(super) struct Batch<'a> {
    pub(super) snapshot: &'a GraphSnapshot,
    pub(super) max_steps: u64,
    cancel: Option<&'a CancellationToken>,
    /// Wirings decided so far
    pub(super) committed: BTreeMap<ModuleId, ModuleWiring>,
    /// Modules that failed in this batch; never offered as providers again
    pub(super) failed: BTreeMap<ModuleId, Vec<FailureReason>>,
    /// Fragments detached for the rest of the batch, with the failure that caused it
    excluded: BTreeMap<ModuleId, Vec<FailureReason>>,
    /// Resolved singletons by symbolic name
    pub(super) singletons: BTreeMap<String, ModuleId>,
    /// Fragments that were unresolved when the batch started
    loose_fragments: BTreeSet<ModuleId>,
}

impl<'a> Batch<'a> {
    pub(super) fn new(
        snapshot: &'a GraphSnapshot,
        max_steps: u64,
        cancel: Option<&'a CancellationToken>,
    ) -> Self {
        let mut singletons = BTreeMap::new();
        let mut loose_fragments = BTreeSet::new();
        for (id, entry) in &snapshot.modules {
            let descriptor = &entry.record.descriptor;
            if entry.state.is_resolved() && descriptor.singleton {
                singletons
                    .entry(descriptor.symbolic_name.clone())
                    .or_insert(*id);
            }
            if entry.state == ModuleState::Installed && descriptor.is_fragment() {
                loose_fragments.insert(*id);
            }
        }

        Self {
            snapshot,
            max_steps: max_steps.max(1),
            cancel,
            committed: BTreeMap::new(),
            failed: BTreeMap::new(),
            excluded: BTreeMap::new(),
            singletons,
            loose_fragments,
        }
    }

    pub(super) fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(CancellationToken::is_cancelled)
    }

    pub(super) fn record(&self, id: ModuleId) -> Option<&'a Arc<ModuleRecord>> {
        self.snapshot.record(id)
    }

    pub(super) fn requirement(&self, r: RequirementRef) -> Option<&'a Requirement> {
        self.record(r.module)?.requirement(r.index)
    }

    /// Resolved before the batch or decided in it
    pub(super) fn is_resolved(&self, id: ModuleId) -> bool {
        self.snapshot.is_resolved(id) || self.committed.contains_key(&id)
    }

    /// Wiring of a resolved module, as of this batch
    pub(super) fn wiring_of(&self, id: ModuleId) -> Option<&ModuleWiring> {
        self.committed.get(&id).or_else(|| {
            self.snapshot
                .get(id)
                .and_then(|e| e.wiring.as_deref())
        })
    }

    /// Singleton already holding `host`'s symbolic name, if it is not `host`
    pub(super) fn singleton_competitor(
        &self,
        state: &SearchState,
        host: ModuleId,
    ) -> Option<ModuleId> {
        let descriptor = &self.record(host)?.descriptor;
        if !descriptor.singleton {
            return None;
        }
        let name = descriptor.symbolic_name.as_str();
        [self.singletons.get(name), state.singleton(name)]
            .into_iter()
            .flatten()
            .copied()
            .find(|holder| *holder != host)
    }

    /// Index and value of the host capability a non-fragment module offers
    pub(super) fn host_capability(&self, host: ModuleId) -> Option<(usize, &'a Capability)> {
        self.record(host)?
            .capabilities
            .iter()
            .enumerate()
            .find(|(_, c)| c.namespace == HOST_NAMESPACE)
    }

    pub(super) fn fragment_matches_host(&self, fragment: ModuleId, host: ModuleId) -> bool {
        let Some(record) = self.record(fragment) else {
            return false;
        };
        let Some((_, requirement)) = record.descriptor.host_requirement() else {
            return false;
        };
        self.host_capability(host)
            .is_some_and(|(_, capability)| requirement.matches(capability))
    }

    /// Whether `fragment` may still attach to a host resolved in this batch
    pub(super) fn is_attachable(&self, fragment: ModuleId) -> bool {
        self.loose_fragments.contains(&fragment) && !self.excluded.contains_key(&fragment)
    }

    /// Fragments that attach to `host` when it resolves, ascending by id
    pub(super) fn attachable_fragments(&self, host: ModuleId) -> Vec<ModuleId> {
        self.loose_fragments
            .iter()
            .copied()
            .filter(|f| !self.excluded.contains_key(f) && self.fragment_matches_host(*f, host))
            .collect()
    }

    fn is_attached(&self, fragment: ModuleId) -> bool {
        self.committed
            .values()
            .any(|w| w.fragments.contains(&fragment))
    }

    /// Resolve every target, then turn the batch into a plan and a report
    pub(super) fn run(
        mut self,
        requested: &[ModuleId],
    ) -> Result<(WiringPlan, ResolutionReport), ModuleError> {
        let mut targets: BTreeSet<ModuleId> = BTreeSet::new();
        for id in requested {
            if self.snapshot.get(*id).is_none() {
                return Err(ModuleError::ModuleNotFound(*id));
            }
            targets.insert(*id);
        }
        targets.extend(
            self.snapshot
                .modules
                .iter()
                .filter(|(_, e)| e.stale && e.state == ModuleState::Installed)
                .map(|(id, _)| *id),
        );

        for target in &targets {
            self.resolve_target(*target)?;
        }

        Ok(self.finish(&targets))
    }

    fn resolve_target(&mut self, target: ModuleId) -> Result<(), ModuleError> {
        if self.is_resolved(target) || self.failed.contains_key(&target) {
            return Ok(());
        }
        let is_fragment = self
            .record(target)
            .is_some_and(|r| r.is_fragment());
        if is_fragment {
            self.resolve_fragment(target)
        } else {
            self.resolve_host(target).map(|_| ())
        }
    }

    /// Search for `host`, detaching fragments whose requirements break it
    fn resolve_host(&mut self, host: ModuleId) -> Result<bool, ModuleError> {
        loop {
            match self.search(host) {
                Ok(state) => {
                    self.accept(state);
                    return Ok(true);
                }
                Err(SearchError::Cancelled) => return Err(ModuleError::Cancelled),
                Err(SearchError::Failed(reasons)) => {
                    let culprit = reasons
                        .iter()
                        .filter_map(|r| r.requirement)
                        .map(|r| r.module)
                        .find(|m| self.is_attachable(*m));
                    if let Some(fragment) = culprit {
                        debug!(
                            "Detaching fragment {} from batch: its requirements block {}",
                            fragment, host
                        );
                        self.excluded.insert(fragment, reasons);
                        continue;
                    }
                    debug!(
                        "Module {} failed to resolve ({} reason(s))",
                        host,
                        reasons.len()
                    );
                    self.failed.insert(host, reasons);
                    return Ok(false);
                }
            }
        }
    }

    /// Resolve a fragment by resolving a host it can attach to
    fn resolve_fragment(&mut self, fragment: ModuleId) -> Result<(), ModuleError> {
        let Some(record) = self.record(fragment) else {
            return Ok(());
        };
        let Some((index, _)) = record.descriptor.host_requirement() else {
            return Ok(());
        };
        let key = Some(RequirementRef {
            module: fragment,
            index,
        });

        let hosts: Vec<ModuleId> = self
            .snapshot
            .providers_of(HOST_NAMESPACE)
            .filter(|h| self.fragment_matches_host(fragment, *h))
            .collect();
        if hosts.is_empty() {
            self.failed.insert(
                fragment,
                vec![FailureReason::new(fragment, key, FailureKind::Unsatisfied)],
            );
            return Ok(());
        }

        let mut unresolved: Vec<(Version, ModuleId)> = hosts
            .iter()
            .filter(|h| !self.is_resolved(**h))
            .filter_map(|h| Some((self.record(*h)?.descriptor.version.clone(), *h)))
            .collect();
        unresolved.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        for (_, host) in &unresolved {
            if self.is_attached(fragment) {
                return Ok(());
            }
            if let Some(reasons) = self.excluded.get(&fragment) {
                self.failed.insert(fragment, reasons.clone());
                return Ok(());
            }
            if self.failed.contains_key(host) {
                continue;
            }
            self.resolve_host(*host)?;
        }

        if self.is_attached(fragment) {
            return Ok(());
        }
        let reasons = match self.excluded.get(&fragment) {
            Some(reasons) => reasons.clone(),
            None if unresolved.is_empty() => vec![FailureReason::new(
                fragment,
                key,
                FailureKind::HostAlreadyResolved { hosts },
            )],
            None => vec![FailureReason::new(
                fragment,
                key,
                FailureKind::NoResolvableProvider {
                    candidates: unresolved.into_iter().map(|(_, h)| h).collect(),
                },
            )],
        };
        self.failed.insert(fragment, reasons);
        Ok(())
    }

    /// Fold a successful search into the batch
    fn accept(&mut self, state: SearchState) {
        let SearchState {
            units, mut wires, ..
        } = state;
        for (host, fragments) in units {
            if let Some(record) = self.record(host) {
                if record.descriptor.singleton {
                    self.singletons
                        .insert(record.descriptor.symbolic_name.clone(), host);
                }
            }
            let wiring = ModuleWiring {
                wires: wires.remove(&host).unwrap_or_default(),
                fragments,
                hosts: Vec::new(),
            };
            self.committed.insert(host, wiring);
        }
    }

    /// Wirings for fragments attached during the batch
    fn fragment_wirings(&self) -> BTreeMap<ModuleId, ModuleWiring> {
        let mut wirings: BTreeMap<ModuleId, ModuleWiring> = BTreeMap::new();
        for (host, wiring) in &self.committed {
            let Some((cap_index, capability)) = self.host_capability(*host) else {
                continue;
            };
            for fragment in &wiring.fragments {
                let Some((req_index, _)) = self
                    .record(*fragment)
                    .and_then(|r| r.descriptor.host_requirement())
                else {
                    continue;
                };
                let entry = wirings.entry(*fragment).or_default();
                entry.wires.push(Wire {
                    requirer: *fragment,
                    requirement: RequirementRef {
                        module: *fragment,
                        index: req_index,
                    },
                    provider: *host,
                    capability: CapabilityRef {
                        module: *host,
                        index: cap_index,
                    },
                    capability_type: capability.capability_type(),
                    dynamic: false,
                });
                entry.hosts.push(*host);
            }
        }
        wirings
    }

    fn finish(mut self, targets: &BTreeSet<ModuleId>) -> (WiringPlan, ResolutionReport) {
        let fragments = self.fragment_wirings();
        self.committed.extend(fragments);

        let mut report = ResolutionReport::default();
        for target in targets {
            let outcome = if self.snapshot.is_resolved(*target) {
                ModuleOutcome::Resolved { already: true }
            } else if self.committed.contains_key(target) {
                ModuleOutcome::Resolved { already: false }
            } else {
                ModuleOutcome::Failed {
                    reasons: self.failed.remove(target).unwrap_or_default(),
                }
            };
            report.outcomes.insert(*target, outcome);
        }
        report.also_resolved = self
            .committed
            .keys()
            .filter(|id| !targets.contains(*id))
            .copied()
            .collect();

        let plan = WiringPlan {
            generation: self.snapshot.generation,
            resolved: self.committed,
            dynamic_wires: Vec::new(),
        };
        (plan, report)
    }
}

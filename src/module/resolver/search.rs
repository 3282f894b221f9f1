//! Backtracking search over an explicit choice-point stack
//!
//! Each open requirement becomes a choice point holding the state it was
//! created from and its ordered candidates. Advancing a choice point clones
//! that base state and applies the next candidate; when a choice point runs
//! out of candidates it is popped and its parent advances instead. Optional
//! requirements get an implicit last alternative that leaves them unwired.
//!
//! A failure is recorded only for choice points where no candidate was
//! locally acceptable, so the report names the requirement that actually
//! could not be satisfied rather than every choice the search unwound.

use std::collections::{BTreeMap, VecDeque};

use super::batch::Batch;
use super::candidates::Candidate;
use super::report::{FailureKind, FailureReason};
use super::uses::{self, WiringSource};
use crate::module::registry::{RequirementRef, Wire};
use crate::module::traits::ModuleId;

/// A requirement waiting for a wire, owned by the host it wires into
#[derive(Debug, Clone, Copy)]
struct OpenRequirement {
    host: ModuleId,
    requirement: RequirementRef,
}

/// Tentative state of one search
#[derive(Debug, Clone, Default)]
pub(super) struct SearchState {
    /// Hosts pulled into the search, with the fragments attached to each
    pub(super) units: BTreeMap<ModuleId, Vec<ModuleId>>,
    /// Tentative wires per host, in requirement order
    pub(super) wires: BTreeMap<ModuleId, Vec<Wire>>,
    open: VecDeque<OpenRequirement>,
    singletons: BTreeMap<String, ModuleId>,
}

impl SearchState {
    pub(super) fn is_pending(&self, module: ModuleId) -> bool {
        self.units.contains_key(&module)
    }

    pub(super) fn fragments_of(&self, host: ModuleId) -> Option<&[ModuleId]> {
        self.units.get(&host).map(Vec::as_slice)
    }

    pub(super) fn singleton(&self, name: &str) -> Option<&ModuleId> {
        self.singletons.get(name)
    }
}

pub(super) enum SearchError {
    Failed(Vec<FailureReason>),
    Cancelled,
}

struct ChoicePoint {
    base: SearchState,
    open: OpenRequirement,
    candidates: Vec<Candidate>,
    next: usize,
    optional: bool,
    skipped: bool,
    accepted_any: bool,
    pruned: Vec<ModuleId>,
    rejections: Vec<FailureKind>,
}

impl ChoicePoint {
    /// Reason to report when this point is exhausted, if it is to blame
    fn failure(self) -> Option<FailureReason> {
        if self.accepted_any {
            return None;
        }
        let kind = if let Some(rejection) = self.rejections.into_iter().next() {
            rejection
        } else if !self.pruned.is_empty() {
            FailureKind::NoResolvableProvider {
                candidates: self.pruned,
            }
        } else {
            FailureKind::Unsatisfied
        };
        Some(FailureReason::new(
            self.open.host,
            Some(self.open.requirement),
            kind,
        ))
    }
}

/// Wires as seen from inside a search: tentative for pending hosts, decided
/// for everything else
struct View<'s, 'b> {
    batch: &'s Batch<'b>,
    state: &'s SearchState,
}

impl WiringSource for View<'_, '_> {
    fn wires(&self, module: ModuleId) -> &[Wire] {
        if let Some(wires) = self.state.wires.get(&module) {
            return wires;
        }
        self.batch
            .wiring_of(module)
            .map(|w| w.wires.as_slice())
            .unwrap_or(&[])
    }

    fn uses(&self, requirement: RequirementRef) -> bool {
        self.batch
            .requirement(requirement)
            .is_some_and(|r| r.uses)
    }
}

impl Batch<'_> {
    /// Pull `host` and its attachable fragments into the search
    ///
    /// Returns the competing singleton when `host` cannot join.
    fn add_unit(&self, state: &mut SearchState, host: ModuleId) -> Result<(), ModuleId> {
        if let Some(competitor) = self.singleton_competitor(state, host) {
            return Err(competitor);
        }
        let Some(record) = self.record(host) else {
            return Ok(());
        };
        if record.descriptor.singleton {
            state
                .singletons
                .insert(record.descriptor.symbolic_name.clone(), host);
        }

        let fragments = self.attachable_fragments(host);
        let mut open = Vec::new();
        for module in std::iter::once(host).chain(fragments.iter().copied()) {
            let Some(declaring) = self.record(module) else {
                continue;
            };
            for (index, requirement) in declaring.descriptor.requirements.iter().enumerate() {
                if requirement.is_host() || requirement.is_dynamic() {
                    continue;
                }
                open.push(OpenRequirement {
                    host,
                    requirement: RequirementRef { module, index },
                });
            }
        }

        state.units.insert(host, fragments);
        state.wires.entry(host).or_default();
        // Depth first: the new unit's requirements are decided before the
        // remaining ones of whoever pulled it in
        for requirement in open.into_iter().rev() {
            state.open.push_front(requirement);
        }
        Ok(())
    }

    fn choice_point(&self, state: SearchState, open: OpenRequirement) -> ChoicePoint {
        let requirement = self.requirement(open.requirement);
        let set = requirement
            .map(|r| self.candidates(&state, r, false))
            .unwrap_or_default();
        ChoicePoint {
            base: state,
            open,
            candidates: set.candidates,
            next: 0,
            optional: requirement.is_some_and(|r| !r.is_mandatory()),
            skipped: false,
            accepted_any: false,
            pruned: set.pruned,
            rejections: Vec::new(),
        }
    }

    /// Next consistent state reachable from `point`, if any remain
    fn advance(&self, point: &mut ChoicePoint) -> Option<SearchState> {
        while let Some(candidate) = point.candidates.get(point.next) {
            point.next += 1;
            let mut state = point.base.clone();

            if !self.is_resolved(candidate.provider) && !state.is_pending(candidate.provider) {
                if let Err(competitor) = self.add_unit(&mut state, candidate.provider) {
                    point.rejections.push(FailureKind::SingletonConflict {
                        candidate: candidate.provider,
                        competitor,
                    });
                    continue;
                }
            }

            state
                .wires
                .entry(point.open.host)
                .or_default()
                .push(wire(point.open, candidate, false));

            let view = View {
                batch: self,
                state: &state,
            };
            if let Err(conflict) = uses::check(&view, state.units.keys().copied()) {
                point.rejections.push(FailureKind::UsesConflict {
                    capability_type: conflict.capability_type,
                    providers: conflict.providers,
                });
                continue;
            }

            point.accepted_any = true;
            return Some(state);
        }

        if point.optional && !point.skipped {
            point.skipped = true;
            point.accepted_any = true;
            return Some(point.base.clone());
        }
        None
    }

    /// Search for a consistent wiring of `target` and everything it pulls in
    pub(super) fn search(&self, target: ModuleId) -> Result<SearchState, SearchError> {
        let mut state = SearchState::default();
        if let Err(competitor) = self.add_unit(&mut state, target) {
            return Err(SearchError::Failed(vec![FailureReason::new(
                target,
                None,
                FailureKind::SingletonConflict {
                    candidate: target,
                    competitor,
                },
            )]));
        }

        let mut stack: Vec<ChoicePoint> = Vec::new();
        let mut failures: Vec<FailureReason> = Vec::new();
        let mut steps: u64 = 0;

        loop {
            let Some(open) = state.open.pop_front() else {
                return Ok(state);
            };
            stack.push(self.choice_point(state, open));

            state = loop {
                if self.is_cancelled() {
                    return Err(SearchError::Cancelled);
                }
                let Some(point) = stack.last_mut() else {
                    return Err(SearchError::Failed(failures));
                };
                steps += 1;
                if steps > self.max_steps {
                    return Err(SearchError::Failed(vec![FailureReason::new(
                        point.open.host,
                        Some(point.open.requirement),
                        FailureKind::SearchLimitExceeded,
                    )]));
                }
                if let Some(next) = self.advance(point) {
                    break next;
                }
                if let Some(exhausted) = stack.pop() {
                    if let Some(reason) = exhausted.failure() {
                        if !failures.iter().any(|f| f.requirement == reason.requirement) {
                            failures.push(reason);
                        }
                    }
                }
            };
        }
    }

    /// Pick a wire for a dynamic requirement of resolved module `module`
    ///
    /// Only resolved providers are considered, and the new wire must keep
    /// every resolved module's consistency space free of conflicts.
    pub(super) fn dynamic_wire(&self, module: ModuleId, requirement: RequirementRef) -> Option<Wire> {
        let declared = self.requirement(requirement)?;
        let mut base = SearchState::default();
        base.units.insert(module, Vec::new());
        base.wires.insert(
            module,
            self.wiring_of(module)
                .map(|w| w.wires.clone())
                .unwrap_or_default(),
        );

        let open = OpenRequirement {
            host: module,
            requirement,
        };
        let set = self.candidates(&base, declared, true);
        let resolved: Vec<ModuleId> = self
            .snapshot
            .modules
            .iter()
            .filter(|(_, e)| e.state.is_resolved())
            .map(|(id, _)| *id)
            .collect();

        set.candidates.iter().find_map(|candidate| {
            let mut state = base.clone();
            let wire = wire(open, candidate, true);
            state.wires.entry(module).or_default().push(wire.clone());
            let view = View {
                batch: self,
                state: &state,
            };
            uses::check(&view, resolved.iter().copied())
                .ok()
                .map(|_| wire)
        })
    }
}

fn wire(open: OpenRequirement, candidate: &Candidate, dynamic: bool) -> Wire {
    Wire {
        requirer: open.host,
        requirement: open.requirement,
        provider: candidate.provider,
        capability: candidate.capability,
        capability_type: candidate.capability_type.clone(),
        dynamic,
    }
}

//! Module graph
//!
//! Holds every installed module keyed by identifier, the namespace index the
//! resolver queries, and each module's state and wiring. State and wiring
//! always change together under the graph's write lock.

pub mod wiring;

pub use wiring::{CapabilityRef, ModuleWiring, RequirementRef, Wire};

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use crate::module::model::{Capability, ModuleDescriptor, Requirement};
use crate::module::traits::{ModuleError, ModuleId, ModuleState};

/// Immutable view of one installed revision of a module
#[derive(Debug)]
pub struct ModuleRecord {
    pub id: ModuleId,
    pub descriptor: ModuleDescriptor,
    /// Declared plus implicit capabilities; [`CapabilityRef::index`] points here
    pub capabilities: Vec<Capability>,
}

impl ModuleRecord {
    fn new(id: ModuleId, descriptor: ModuleDescriptor) -> Self {
        let capabilities = descriptor.effective_capabilities();
        Self {
            id,
            descriptor,
            capabilities,
        }
    }

    pub fn symbolic_name(&self) -> &str {
        &self.descriptor.symbolic_name
    }

    pub fn is_fragment(&self) -> bool {
        self.descriptor.is_fragment()
    }

    pub fn requirement(&self, index: usize) -> Option<&Requirement> {
        self.descriptor.requirements.get(index)
    }

    pub fn capability(&self, index: usize) -> Option<&Capability> {
        self.capabilities.get(index)
    }
}

/// A state change produced by a graph mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub module: ModuleId,
    pub previous: ModuleState,
    pub current: ModuleState,
}

/// Module entry as seen by a snapshot
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    pub record: Arc<ModuleRecord>,
    pub state: ModuleState,
    pub wiring: Option<Arc<ModuleWiring>>,
    pub stale: bool,
}

/// Consistent copy of the graph the resolver searches without holding a lock
///
/// Uninstalled modules are not part of a snapshot.
#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    pub generation: u64,
    pub modules: BTreeMap<ModuleId, SnapshotEntry>,
    pub index: HashMap<String, BTreeSet<ModuleId>>,
}

impl GraphSnapshot {
    pub fn get(&self, id: ModuleId) -> Option<&SnapshotEntry> {
        self.modules.get(&id)
    }

    pub fn record(&self, id: ModuleId) -> Option<&Arc<ModuleRecord>> {
        self.modules.get(&id).map(|e| &e.record)
    }

    pub fn is_resolved(&self, id: ModuleId) -> bool {
        self.modules
            .get(&id)
            .map(|e| e.state.is_resolved())
            .unwrap_or(false)
    }

    /// Modules declaring at least one capability in `namespace`, ascending by id
    pub fn providers_of(&self, namespace: &str) -> impl Iterator<Item = ModuleId> + '_ {
        self.index
            .get(namespace)
            .into_iter()
            .flat_map(|ids| ids.iter().copied())
    }
}

/// Outcome the resolver asks the graph to commit
#[derive(Debug, Clone, Default)]
pub struct WiringPlan {
    /// Generation of the snapshot the plan was computed from
    pub generation: u64,
    /// Modules to move to `Resolved` with their new wiring
    pub resolved: BTreeMap<ModuleId, ModuleWiring>,
    /// Dynamic wires to append to already resolved modules
    pub dynamic_wires: Vec<Wire>,
}

impl WiringPlan {
    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty() && self.dynamic_wires.is_empty()
    }
}

/// Commit rejected because the graph changed after the snapshot was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleSnapshot {
    pub expected: u64,
    pub actual: u64,
}

impl std::fmt::Display for StaleSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "graph changed during resolution (snapshot generation {}, now {})",
            self.expected, self.actual
        )
    }
}

#[derive(Debug)]
struct ModuleEntry {
    record: Arc<ModuleRecord>,
    state: ModuleState,
    wiring: Option<Arc<ModuleWiring>>,
    stale: bool,
}

#[derive(Debug, Default)]
pub(crate) struct GraphInner {
    modules: BTreeMap<ModuleId, ModuleEntry>,
    index: HashMap<String, BTreeSet<ModuleId>>,
    generation: u64,
    next_id: u64,
}

impl GraphInner {
    fn entry(&self, id: ModuleId) -> Result<&ModuleEntry, ModuleError> {
        self.modules.get(&id).ok_or(ModuleError::ModuleNotFound(id))
    }

    fn index_record(&mut self, record: &ModuleRecord) {
        for capability in &record.capabilities {
            self.index
                .entry(capability.namespace.clone())
                .or_default()
                .insert(record.id);
        }
    }

    fn unindex_record(&mut self, record: &ModuleRecord) {
        for capability in &record.capabilities {
            if let Some(ids) = self.index.get_mut(&capability.namespace) {
                ids.remove(&record.id);
                if ids.is_empty() {
                    self.index.remove(&capability.namespace);
                }
            }
        }
    }

    pub(crate) fn snapshot(&self) -> GraphSnapshot {
        let modules = self
            .modules
            .iter()
            .filter(|(_, e)| e.state != ModuleState::Uninstalled)
            .map(|(id, e)| {
                (
                    *id,
                    SnapshotEntry {
                        record: Arc::clone(&e.record),
                        state: e.state,
                        wiring: e.wiring.clone(),
                        stale: e.stale,
                    },
                )
            })
            .collect();
        GraphSnapshot {
            generation: self.generation,
            modules,
            index: self.index.clone(),
        }
    }

    /// Release the wiring of `module` without touching its dependents
    fn release(&mut self, module: ModuleId, stale: bool) -> Option<StateTransition> {
        let entry = self.modules.get_mut(&module)?;
        if !entry.state.is_resolved() {
            return None;
        }
        let previous = entry.state;
        entry.state = ModuleState::Installed;
        entry.wiring = None;
        entry.stale = stale;
        Some(StateTransition {
            module,
            previous,
            current: ModuleState::Installed,
        })
    }

    /// Unresolve every module whose wiring (transitively) depends on `root`
    fn unresolve_dependents(&mut self, root: ModuleId) -> Vec<StateTransition> {
        let mut transitions = Vec::new();
        let mut worklist = vec![root];
        let mut seen = BTreeSet::from([root]);

        while let Some(current) = worklist.pop() {
            let dependents: Vec<ModuleId> = self
                .modules
                .iter()
                .filter(|(id, e)| {
                    **id != current
                        && !seen.contains(*id)
                        && e.wiring
                            .as_ref()
                            .map(|w| w.depends_on(**id, current))
                            .unwrap_or(false)
                })
                .map(|(id, _)| *id)
                .collect();

            for dependent in dependents {
                seen.insert(dependent);
                if let Some(transition) = self.release(dependent, true) {
                    debug!(
                        "Module {} unresolved: wired to changed module {}",
                        dependent, current
                    );
                    transitions.push(transition);
                }
                worklist.push(dependent);
            }
        }

        transitions.sort_by_key(|t| t.module);
        transitions
    }

    pub(crate) fn apply(&mut self, plan: WiringPlan) -> Result<Vec<StateTransition>, StaleSnapshot> {
        if plan.generation != self.generation {
            return Err(StaleSnapshot {
                expected: plan.generation,
                actual: self.generation,
            });
        }
        Ok(self.install_plan(plan))
    }

    /// Install a plan without validating its generation; caller holds the lock
    pub(crate) fn install_plan(&mut self, plan: WiringPlan) -> Vec<StateTransition> {
        if plan.is_empty() {
            return Vec::new();
        }

        let mut transitions = Vec::new();
        for (id, wiring) in plan.resolved {
            if let Some(entry) = self.modules.get_mut(&id) {
                let previous = entry.state;
                entry.state = ModuleState::Resolved;
                entry.wiring = Some(Arc::new(wiring));
                entry.stale = false;
                transitions.push(StateTransition {
                    module: id,
                    previous,
                    current: ModuleState::Resolved,
                });
            }
        }

        for wire in plan.dynamic_wires {
            if let Some(entry) = self.modules.get_mut(&wire.requirer) {
                let mut wiring = entry.wiring.as_deref().cloned().unwrap_or_default();
                wiring.wires.push(wire);
                entry.wiring = Some(Arc::new(wiring));
            }
        }

        self.generation += 1;
        transitions
    }
}

/// Thread-safe module graph
#[derive(Debug, Default)]
pub struct ModuleGraph {
    inner: RwLock<GraphInner>,
}

impl ModuleGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a module; it starts in `Installed`
    pub fn install(&self, descriptor: ModuleDescriptor) -> Result<ModuleId, ModuleError> {
        descriptor.validate()?;

        let mut inner = self.inner.write();
        inner.next_id += 1;
        let id = ModuleId(inner.next_id);
        let record = Arc::new(ModuleRecord::new(id, descriptor));
        inner.index_record(&record);
        info!(
            "Installed module {} ({} {})",
            id,
            record.symbolic_name(),
            record.descriptor.version
        );
        inner.modules.insert(
            id,
            ModuleEntry {
                record,
                state: ModuleState::Installed,
                wiring: None,
                stale: false,
            },
        );
        inner.generation += 1;
        Ok(id)
    }

    /// Replace a module's descriptor
    ///
    /// A resolved module returns to `Installed`; every module wired to it is
    /// unresolved and marked stale so the next resolution picks it up.
    pub fn update(
        &self,
        id: ModuleId,
        descriptor: ModuleDescriptor,
    ) -> Result<Vec<StateTransition>, ModuleError> {
        descriptor.validate()?;

        let mut inner = self.inner.write();
        let state = inner.entry(id)?.state;
        if state == ModuleState::Uninstalled {
            return Err(ModuleError::InvalidState {
                module: id,
                state,
                operation: "update",
            });
        }

        let mut transitions = inner.unresolve_dependents(id);
        if let Some(transition) = inner.release(id, false) {
            transitions.insert(0, transition);
        }

        let old = Arc::clone(&inner.entry(id)?.record);
        inner.unindex_record(&old);
        let record = Arc::new(ModuleRecord::new(id, descriptor));
        inner.index_record(&record);
        if let Some(entry) = inner.modules.get_mut(&id) {
            entry.record = record;
        }
        inner.generation += 1;

        info!(
            "Updated module {} ({} unresolved as a consequence)",
            id,
            transitions.len()
        );
        Ok(transitions)
    }

    /// Uninstall a module; terminal
    pub fn uninstall(&self, id: ModuleId) -> Result<Vec<StateTransition>, ModuleError> {
        let mut inner = self.inner.write();
        let state = inner.entry(id)?.state;
        if state == ModuleState::Uninstalled {
            return Err(ModuleError::InvalidState {
                module: id,
                state,
                operation: "uninstall",
            });
        }

        let mut transitions = inner.unresolve_dependents(id);
        let record = Arc::clone(&inner.entry(id)?.record);
        inner.unindex_record(&record);
        if let Some(entry) = inner.modules.get_mut(&id) {
            entry.state = ModuleState::Uninstalled;
            entry.wiring = None;
            entry.stale = false;
        }
        transitions.insert(
            0,
            StateTransition {
                module: id,
                previous: state,
                current: ModuleState::Uninstalled,
            },
        );
        inner.generation += 1;

        info!("Uninstalled module {}", id);
        Ok(transitions)
    }

    /// Move a resolved module to `Active` (activation layer hook)
    pub fn mark_active(&self, id: ModuleId) -> Result<StateTransition, ModuleError> {
        self.transition(id, ModuleState::Resolved, ModuleState::Active, "activate")
    }

    /// Move an active module back to `Resolved` (activation layer hook)
    pub fn mark_inactive(&self, id: ModuleId) -> Result<StateTransition, ModuleError> {
        self.transition(id, ModuleState::Active, ModuleState::Resolved, "deactivate")
    }

    fn transition(
        &self,
        id: ModuleId,
        from: ModuleState,
        to: ModuleState,
        operation: &'static str,
    ) -> Result<StateTransition, ModuleError> {
        let mut inner = self.inner.write();
        let entry = inner
            .modules
            .get_mut(&id)
            .ok_or(ModuleError::ModuleNotFound(id))?;
        if entry.state != from {
            return Err(ModuleError::InvalidState {
                module: id,
                state: entry.state,
                operation,
            });
        }
        entry.state = to;
        inner.generation += 1;
        Ok(StateTransition {
            module: id,
            previous: from,
            current: to,
        })
    }

    /// Current state, `None` if the id was never issued
    pub fn state(&self, id: ModuleId) -> Option<ModuleState> {
        self.inner.read().modules.get(&id).map(|e| e.state)
    }

    /// Current descriptor
    pub fn descriptor(&self, id: ModuleId) -> Option<ModuleDescriptor> {
        self.inner
            .read()
            .modules
            .get(&id)
            .map(|e| e.record.descriptor.clone())
    }

    /// Wiring of a resolved module
    pub fn wiring(&self, id: ModuleId) -> Option<Arc<ModuleWiring>> {
        self.inner.read().modules.get(&id).and_then(|e| e.wiring.clone())
    }

    /// Ordered wires of a module; empty when it is not resolved
    pub fn wires(&self, id: ModuleId) -> Result<Vec<Wire>, ModuleError> {
        let inner = self.inner.read();
        let entry = inner.entry(id)?;
        Ok(entry
            .wiring
            .as_ref()
            .map(|w| w.wires.clone())
            .unwrap_or_default())
    }

    /// All modules ever installed with their current state, ascending by id
    pub fn modules(&self) -> Vec<(ModuleId, ModuleState)> {
        self.inner
            .read()
            .modules
            .iter()
            .map(|(id, e)| (*id, e.state))
            .collect()
    }

    /// Modules waiting to be re-resolved after a provider changed
    pub fn stale_modules(&self) -> Vec<ModuleId> {
        self.inner
            .read()
            .modules
            .iter()
            .filter(|(_, e)| e.stale && e.state == ModuleState::Installed)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Modules currently in `Installed`
    pub fn unresolved_modules(&self) -> Vec<ModuleId> {
        self.inner
            .read()
            .modules
            .iter()
            .filter(|(_, e)| e.state == ModuleState::Installed)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Mutation counter; bumped by every change
    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    /// Consistent copy for lock-free searching
    pub fn snapshot(&self) -> GraphSnapshot {
        self.inner.read().snapshot()
    }

    /// Commit a plan if the graph has not changed since its snapshot
    pub fn commit(&self, plan: WiringPlan) -> Result<Vec<StateTransition>, StaleSnapshot> {
        self.inner.write().apply(plan)
    }

    /// Run `f` with the graph exclusively locked
    ///
    /// Used by the resolver once optimistic commits keep losing races.
    pub(crate) fn with_exclusive<R>(&self, f: impl FnOnce(&mut GraphInner) -> R) -> R {
        let mut inner = self.inner.write();
        f(&mut inner)
    }
}

//! Module manager
//!
//! Composition root of the runtime: owns the module graph, the resolver, the
//! service registry and the event dispatcher, and exposes the lifecycle,
//! resolution, wiring, service and subscription calls to the surrounding
//! system. Every call publishes its events after the underlying mutation has
//! been applied and its locks released.

use std::any::Any;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::RuntimeConfig;
use crate::module::api::events::{
    EventDispatcher, Interest, ListenerFailure, ListenerId, ModuleEventKind, ResolutionEvent,
    RuntimeEvent,
};
use crate::module::filter::Filter;
use crate::module::model::{Attributes, ModuleDescriptor};
use crate::module::registry::{ModuleGraph, ModuleWiring, StateTransition, Wire};
use crate::module::resolver::{ModuleOutcome, Resolution, ResolutionReport, Resolver};
use crate::module::service::{
    ServiceObject, ServiceReference, ServiceRegistration, ServiceRegistry,
};
use crate::module::traits::{EventListener, ModuleError, ModuleId, ModuleState};

/// Module manager coordinates the graph, resolver, services and events
pub struct ModuleManager {
    graph: ModuleGraph,
    resolver: Resolver,
    services: ServiceRegistry,
    events: Arc<EventDispatcher>,
}

impl ModuleManager {
    /// Create a manager and start its event thread
    pub fn new(config: &RuntimeConfig) -> Result<Self, ModuleError> {
        let events = Arc::new(EventDispatcher::new(&config.events)?);
        Ok(Self {
            graph: ModuleGraph::new(),
            resolver: Resolver::new(config.resolver.clone()),
            services: ServiceRegistry::new(Arc::clone(&events)),
            events,
        })
    }

    /// Create a manager with default configuration
    pub fn with_defaults() -> Result<Self, ModuleError> {
        Self::new(&RuntimeConfig::default())
    }

    pub fn graph(&self) -> &ModuleGraph {
        &self.graph
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    pub fn events(&self) -> &Arc<EventDispatcher> {
        &self.events
    }

    // ---- lifecycle ----

    /// Install a module from an already-parsed descriptor
    pub fn install(&self, descriptor: ModuleDescriptor) -> Result<ModuleId, ModuleError> {
        let id = self.graph.install(descriptor)?;
        self.publish_module(id, ModuleEventKind::Installed);
        Ok(id)
    }

    /// Replace a module's descriptor; the module and its dependents unresolve
    pub fn update(&self, id: ModuleId, descriptor: ModuleDescriptor) -> Result<(), ModuleError> {
        let transitions = self.graph.update(id, descriptor)?;
        self.publish_unresolved(&transitions);
        self.publish_module(id, ModuleEventKind::Updated);
        Ok(())
    }

    /// Uninstall a module and remove every service it registered
    pub fn uninstall(&self, id: ModuleId) -> Result<(), ModuleError> {
        let transitions = self.graph.uninstall(id)?;
        let removed = self.services.unregister_all(id);
        if removed > 0 {
            info!("Removed {} service(s) of uninstalled module {}", removed, id);
        }
        self.publish_unresolved(&transitions);
        self.publish_module(id, ModuleEventKind::Uninstalled);
        Ok(())
    }

    /// Called by the activation layer once a resolved module has started
    pub fn mark_active(&self, id: ModuleId) -> Result<(), ModuleError> {
        self.graph.mark_active(id)?;
        self.publish_module(id, ModuleEventKind::Activated);
        Ok(())
    }

    /// Called by the activation layer once an active module has stopped
    pub fn mark_inactive(&self, id: ModuleId) -> Result<(), ModuleError> {
        self.graph.mark_inactive(id)?;
        self.publish_module(id, ModuleEventKind::Deactivated);
        Ok(())
    }

    pub fn state(&self, id: ModuleId) -> Option<ModuleState> {
        self.graph.state(id)
    }

    pub fn descriptor(&self, id: ModuleId) -> Option<ModuleDescriptor> {
        self.graph.descriptor(id)
    }

    /// All modules ever installed with their state, ascending by id
    pub fn modules(&self) -> Vec<(ModuleId, ModuleState)> {
        self.graph.modules()
    }

    // ---- resolution ----

    /// Resolve every module currently in `Installed`
    pub fn resolve_all(&self) -> Result<ResolutionReport, ModuleError> {
        let targets = self.graph.unresolved_modules();
        self.run_resolution(&targets, None)
    }

    /// Resolve the given modules (plus any stale ones)
    pub fn resolve(&self, targets: &[ModuleId]) -> Result<ResolutionReport, ModuleError> {
        self.check_resolvable(targets)?;
        self.run_resolution(targets, None)
    }

    /// Resolve, abandoning the batch without effect if `cancel` fires first
    pub fn resolve_with_cancel(
        &self,
        targets: &[ModuleId],
        cancel: &CancellationToken,
    ) -> Result<ResolutionReport, ModuleError> {
        self.check_resolvable(targets)?;
        self.run_resolution(targets, Some(cancel))
    }

    /// Try to wire a dynamic requirement of a resolved module
    pub fn resolve_dynamic(
        &self,
        id: ModuleId,
        requirement_index: usize,
    ) -> Result<Option<Wire>, ModuleError> {
        self.check_resolvable(&[id])?;
        self.resolver
            .resolve_dynamic(&self.graph, id, requirement_index)
    }

    /// Ordered wires of a module; empty when it is not resolved
    pub fn get_wires(&self, id: ModuleId) -> Result<Vec<Wire>, ModuleError> {
        self.graph.wires(id)
    }

    /// Full wiring of a resolved module, including attached fragments or hosts
    pub fn wiring(&self, id: ModuleId) -> Option<Arc<ModuleWiring>> {
        self.graph.wiring(id)
    }

    fn check_resolvable(&self, targets: &[ModuleId]) -> Result<(), ModuleError> {
        for id in targets {
            match self.graph.state(*id) {
                None => return Err(ModuleError::ModuleNotFound(*id)),
                Some(ModuleState::Uninstalled) => {
                    return Err(ModuleError::InvalidState {
                        module: *id,
                        state: ModuleState::Uninstalled,
                        operation: "resolve",
                    })
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn run_resolution(
        &self,
        targets: &[ModuleId],
        cancel: Option<&CancellationToken>,
    ) -> Result<ResolutionReport, ModuleError> {
        let Resolution {
            report,
            transitions,
        } = self.resolver.resolve(&self.graph, targets, cancel)?;

        for transition in &transitions {
            if transition.current == ModuleState::Resolved {
                self.publish_module(transition.module, ModuleEventKind::Resolved);
            }
        }
        for (module, outcome) in &report.outcomes {
            match outcome {
                ModuleOutcome::Resolved { already: true } => {}
                ModuleOutcome::Resolved { already: false } => self.events.publish(
                    RuntimeEvent::Resolution(ResolutionEvent::Resolved { module: *module }),
                ),
                ModuleOutcome::Failed { reasons } => {
                    self.events
                        .publish(RuntimeEvent::Resolution(ResolutionEvent::Failed {
                            module: *module,
                            reasons: reasons.clone(),
                        }))
                }
            }
        }
        for module in &report.also_resolved {
            self.events
                .publish(RuntimeEvent::Resolution(ResolutionEvent::Resolved {
                    module: *module,
                }));
        }
        Ok(report)
    }

    // ---- services ----

    /// Register a service on behalf of an installed module
    pub fn register_service(
        &self,
        owner: ModuleId,
        types: &[&str],
        properties: Attributes,
        service: ServiceObject,
    ) -> Result<ServiceRegistration, ModuleError> {
        match self.graph.state(owner) {
            None => Err(ModuleError::ModuleNotFound(owner)),
            Some(ModuleState::Uninstalled) => Err(ModuleError::InvalidState {
                module: owner,
                state: ModuleState::Uninstalled,
                operation: "register a service for",
            }),
            Some(_) => self.services.register(owner, types, properties, service),
        }
    }

    pub fn unregister_service(&self, registration: &ServiceRegistration) -> Result<(), ModuleError> {
        self.services.unregister(registration)
    }

    pub fn update_service_properties(
        &self,
        registration: &ServiceRegistration,
        properties: Attributes,
    ) -> Result<ServiceReference, ModuleError> {
        self.services.update_properties(registration, properties)
    }

    /// Ranked registrations of `type_name`, optionally filtered
    pub fn lookup(
        &self,
        type_name: &str,
        filter: Option<&str>,
    ) -> Result<Vec<ServiceReference>, ModuleError> {
        let filter = parse_filter(filter)?;
        Ok(self.services.lookup(type_name, &filter))
    }

    /// Like [`lookup`](Self::lookup), restricted to services of `Active` modules
    pub fn lookup_active(
        &self,
        type_name: &str,
        filter: Option<&str>,
    ) -> Result<Vec<ServiceReference>, ModuleError> {
        Ok(self
            .lookup(type_name, filter)?
            .into_iter()
            .filter(|r| self.graph.state(r.owner()) == Some(ModuleState::Active))
            .collect())
    }

    pub fn get_service(&self, reference: &ServiceReference) -> Option<ServiceObject> {
        self.services.get_service(reference)
    }

    pub fn get_service_as<T: Any + Send + Sync>(
        &self,
        reference: &ServiceReference,
    ) -> Option<Arc<T>> {
        self.services.get_service_as(reference)
    }

    // ---- events ----

    pub fn add_listener(
        &self,
        interest: Interest,
        listener: impl EventListener + 'static,
    ) -> ListenerId {
        self.events.add_listener(interest, listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.events.remove_listener(id)
    }

    /// Wait until all queued events have been delivered
    pub fn flush_events(&self) -> Result<(), ModuleError> {
        self.events.flush()
    }

    pub fn recent_listener_failures(&self, limit: usize) -> Vec<ListenerFailure> {
        self.events.recent_failures(limit)
    }

    /// Deliver pending events and stop the event thread
    pub fn shutdown(&self) {
        info!("Shutting down module manager");
        self.events.shutdown();
    }

    fn publish_module(&self, module: ModuleId, kind: ModuleEventKind) {
        self.events.publish(RuntimeEvent::Module { module, kind });
    }

    fn publish_unresolved(&self, transitions: &[StateTransition]) {
        for transition in transitions {
            if transition.previous.is_resolved() && transition.current == ModuleState::Installed {
                self.publish_module(transition.module, ModuleEventKind::Unresolved);
            }
        }
    }
}

fn parse_filter(filter: Option<&str>) -> Result<Filter, ModuleError> {
    match filter {
        Some(f) => Ok(Filter::parse(f)?),
        None => Ok(Filter::match_all()),
    }
}

impl std::fmt::Debug for ModuleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleManager")
            .field("modules", &self.graph.modules().len())
            .field("services", &self.services.len())
            .finish()
    }
}

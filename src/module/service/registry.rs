//! Service registry
//!
//! A concurrent directory of service objects keyed by registration id and
//! indexed by implemented type name. Lookups compute a ranked, filtered view
//! on every call under a brief read lock. Mutations replace whole entries
//! under the write lock and queue their events before releasing it, so the
//! event order matches the mutation order.

use parking_lot::RwLock;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::registration::{ServiceId, ServiceReference, ServiceRegistration};
use crate::module::api::events::{EventDispatcher, RuntimeEvent, ServiceEvent, ServiceEventKind};
use crate::module::filter::Filter;
use crate::module::model::Attributes;
use crate::module::traits::{ModuleError, ModuleId, ModuleState};

/// Type-erased service object
pub type ServiceObject = Arc<dyn Any + Send + Sync>;

struct ServiceEntry {
    reference: ServiceReference,
    service: ServiceObject,
    /// Set while "unregistering" listeners run; hidden from lookups
    unregistering: bool,
}

#[derive(Default)]
struct RegistryInner {
    services: BTreeMap<ServiceId, ServiceEntry>,
    by_type: HashMap<String, BTreeSet<ServiceId>>,
    /// Owners whose services were withdrawn; they cannot register again
    retired: BTreeSet<ModuleId>,
}

impl RegistryInner {
    fn visible<'a>(
        &'a self,
        ids: impl Iterator<Item = &'a ServiceId> + 'a,
        filter: &'a Filter,
    ) -> impl Iterator<Item = ServiceReference> + 'a {
        ids.filter_map(|id| self.services.get(id))
            .filter(|entry| !entry.unregistering)
            .filter(|entry| filter.matches(entry.reference.properties()))
            .map(|entry| entry.reference.clone())
    }
}

/// Live service directory
pub struct ServiceRegistry {
    inner: RwLock<RegistryInner>,
    next_id: AtomicU64,
    events: Arc<EventDispatcher>,
}

impl ServiceRegistry {
    pub fn new(events: Arc<EventDispatcher>) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            next_id: AtomicU64::new(1),
            events,
        }
    }

    /// Register a service object under one or more type names
    pub fn register(
        &self,
        owner: ModuleId,
        types: &[&str],
        properties: Attributes,
        service: ServiceObject,
    ) -> Result<ServiceRegistration, ModuleError> {
        if types.is_empty() {
            return Err(ModuleError::InvalidRegistration(
                "at least one type name is required".to_string(),
            ));
        }
        if types.iter().any(|t| t.trim().is_empty()) {
            return Err(ModuleError::InvalidRegistration(
                "type names cannot be empty".to_string(),
            ));
        }

        let mut names: Vec<String> = Vec::with_capacity(types.len());
        for name in types {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }

        let mut inner = self.inner.write();
        if inner.retired.contains(&owner) {
            return Err(ModuleError::InvalidState {
                module: owner,
                state: ModuleState::Uninstalled,
                operation: "register a service for",
            });
        }
        let id = ServiceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let reference = ServiceReference::new(id, owner, names, properties);
        for name in reference.types() {
            inner.by_type.entry(name.clone()).or_default().insert(id);
        }
        inner.services.insert(
            id,
            ServiceEntry {
                reference: reference.clone(),
                service,
                unregistering: false,
            },
        );

        info!(
            "Registered {} {:?} for module {} (rank {})",
            id,
            reference.types(),
            owner,
            reference.rank()
        );
        self.events.publish(RuntimeEvent::Service(ServiceEvent {
            kind: ServiceEventKind::Registered,
            reference,
            previous: None,
        }));
        drop(inner);
        Ok(ServiceRegistration::new(id, owner))
    }

    /// Replace the user properties of a registration
    pub fn update_properties(
        &self,
        registration: &ServiceRegistration,
        properties: Attributes,
    ) -> Result<ServiceReference, ModuleError> {
        let id = registration.id();
        let mut inner = self.inner.write();
        let entry = inner
            .services
            .get_mut(&id)
            .filter(|e| !e.unregistering)
            .ok_or(ModuleError::ServiceUnregistered(id.0))?;
        let reference = entry.reference.with_properties(properties);
        let previous = std::mem::replace(&mut entry.reference, reference.clone());

        debug!("Updated properties of {} (rank {})", id, reference.rank());
        // Queued under the lock so `previous` is the state this update replaced
        self.events.publish(RuntimeEvent::Service(ServiceEvent {
            kind: ServiceEventKind::Modified,
            reference: reference.clone(),
            previous: Some(previous),
        }));
        Ok(reference)
    }

    /// Unregister a service
    ///
    /// "Unregistering" listeners run on the calling thread before the entry is
    /// removed; during that window the service is hidden from lookups but
    /// `get_service` still returns it.
    pub fn unregister(&self, registration: &ServiceRegistration) -> Result<(), ModuleError> {
        self.unregister_id(registration.id())
    }

    fn unregister_id(&self, id: ServiceId) -> Result<(), ModuleError> {
        let reference = {
            let mut inner = self.inner.write();
            let entry = inner
                .services
                .get_mut(&id)
                .filter(|e| !e.unregistering)
                .ok_or(ModuleError::ServiceUnregistered(id.0))?;
            entry.unregistering = true;
            entry.reference.clone()
        };

        self.events.dispatch_sync(RuntimeEvent::Service(ServiceEvent {
            kind: ServiceEventKind::Unregistering,
            reference: reference.clone(),
            previous: None,
        }));

        {
            let mut inner = self.inner.write();
            inner.services.remove(&id);
            for name in reference.types() {
                if let Some(ids) = inner.by_type.get_mut(name) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        inner.by_type.remove(name);
                    }
                }
            }
        }
        info!("Unregistered {} of module {}", id, reference.owner());
        Ok(())
    }

    /// Unregister every service owned by `owner`; returns how many were removed
    ///
    /// The owner is retired first, so a registration racing with this call
    /// is either collected here or rejected.
    pub fn unregister_all(&self, owner: ModuleId) -> usize {
        let owned: Vec<ServiceId> = {
            let mut inner = self.inner.write();
            inner.retired.insert(owner);
            inner
                .services
                .values()
                .filter(|e| e.reference.owner() == owner && !e.unregistering)
                .map(|e| e.reference.id())
                .collect()
        };
        // A concurrent unregister may win the race for some of them
        owned
            .into_iter()
            .filter(|id| self.unregister_id(*id).is_ok())
            .count()
    }

    /// Registrations of `type_name` matching `filter`, best ranked first
    pub fn lookup(&self, type_name: &str, filter: &Filter) -> Vec<ServiceReference> {
        let mut found: Vec<ServiceReference> = {
            let inner = self.inner.read();
            match inner.by_type.get(type_name) {
                Some(ids) => inner.visible(ids.iter(), filter).collect(),
                None => Vec::new(),
            }
        };
        found.sort_by(ServiceReference::ranking_order);
        found
    }

    /// Best ranked registration of `type_name` matching `filter`
    pub fn lookup_one(&self, type_name: &str, filter: &Filter) -> Option<ServiceReference> {
        self.lookup(type_name, filter).into_iter().next()
    }

    /// Registrations of any type matching `filter`, best ranked first
    pub fn lookup_all(&self, filter: &Filter) -> Vec<ServiceReference> {
        let mut found: Vec<ServiceReference> = {
            let inner = self.inner.read();
            inner.visible(inner.services.keys(), filter).collect()
        };
        found.sort_by(ServiceReference::ranking_order);
        found
    }

    /// Current reference for a registration id, if it is still registered
    pub fn reference(&self, id: ServiceId) -> Option<ServiceReference> {
        self.inner
            .read()
            .services
            .get(&id)
            .map(|e| e.reference.clone())
    }

    /// Registrations owned by `owner`, ascending by id
    pub fn registered_by(&self, owner: ModuleId) -> Vec<ServiceReference> {
        self.inner
            .read()
            .services
            .values()
            .filter(|e| e.reference.owner() == owner && !e.unregistering)
            .map(|e| e.reference.clone())
            .collect()
    }

    /// The service object, or `None` once the registration is gone
    ///
    /// An object obtained earlier stays valid for its holder after unregistration.
    pub fn get_service(&self, reference: &ServiceReference) -> Option<ServiceObject> {
        self.inner
            .read()
            .services
            .get(&reference.id())
            .map(|e| Arc::clone(&e.service))
    }

    /// Typed variant of [`get_service`](Self::get_service)
    pub fn get_service_as<T: Any + Send + Sync>(
        &self,
        reference: &ServiceReference,
    ) -> Option<Arc<T>> {
        self.get_service(reference)?.downcast::<T>().ok()
    }

    /// Number of registered services (including ones being unregistered)
    pub fn len(&self) -> usize {
        self.inner.read().services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.len())
            .finish()
    }
}

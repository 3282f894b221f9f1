//! Service registrations and references
//!
//! A [`ServiceReference`] is an immutable view of one registration's
//! properties at a point in time. Property updates replace the reference
//! wholesale, so a reader never sees a half-updated registration.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::module::model::{AttributeValue, Attributes};
use crate::module::traits::ModuleId;

/// Property holding the implemented type names
pub const OBJECT_CLASS: &str = "objectClass";
/// Property holding the registration id
pub const SERVICE_ID: &str = "service.id";
/// Property holding the rank (`Long`, default 0)
pub const SERVICE_RANKING: &str = "service.ranking";
/// Property holding the owning module id
pub const SERVICE_OWNER: &str = "service.owner";

/// Registration identifier; monotonically increasing, never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(pub u64);

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "service {}", self.0)
    }
}

#[derive(Debug)]
struct ReferenceData {
    id: ServiceId,
    owner: ModuleId,
    types: Vec<String>,
    properties: Attributes,
    rank: i64,
}

/// Snapshot of a registration's identity and properties
#[derive(Clone)]
pub struct ServiceReference {
    inner: Arc<ReferenceData>,
}

impl ServiceReference {
    /// Build a reference, overlaying the standard properties on `properties`
    ///
    /// A user supplied `service.ranking` sets the rank only when it is a `Long`.
    pub(crate) fn new(
        id: ServiceId,
        owner: ModuleId,
        types: Vec<String>,
        mut properties: Attributes,
    ) -> Self {
        let rank = properties
            .get(SERVICE_RANKING)
            .and_then(AttributeValue::as_long)
            .unwrap_or(0);
        properties.insert(
            OBJECT_CLASS,
            AttributeValue::List(types.iter().map(|t| AttributeValue::from(t.as_str())).collect()),
        );
        properties.insert(SERVICE_ID, id.0);
        properties.insert(SERVICE_OWNER, owner.0);
        properties.insert(SERVICE_RANKING, rank);

        Self {
            inner: Arc::new(ReferenceData {
                id,
                owner,
                types,
                properties,
                rank,
            }),
        }
    }

    /// Same registration with replaced user properties
    pub(crate) fn with_properties(&self, properties: Attributes) -> Self {
        Self::new(self.id(), self.owner(), self.inner.types.clone(), properties)
    }

    pub fn id(&self) -> ServiceId {
        self.inner.id
    }

    pub fn owner(&self) -> ModuleId {
        self.inner.owner
    }

    /// Implemented type names, in registration order
    pub fn types(&self) -> &[String] {
        &self.inner.types
    }

    pub fn implements(&self, type_name: &str) -> bool {
        self.inner.types.iter().any(|t| t == type_name)
    }

    /// All properties, including the standard ones
    pub fn properties(&self) -> &Attributes {
        &self.inner.properties
    }

    pub fn property(&self, key: &str) -> Option<&AttributeValue> {
        self.inner.properties.get(key)
    }

    pub fn rank(&self) -> i64 {
        self.inner.rank
    }

    /// Lookup order: higher rank first, then older registration first
    pub fn ranking_order(&self, other: &Self) -> Ordering {
        other
            .rank()
            .cmp(&self.rank())
            .then_with(|| self.id().cmp(&other.id()))
    }
}

impl fmt::Debug for ServiceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceReference")
            .field("id", &self.inner.id)
            .field("owner", &self.inner.owner)
            .field("types", &self.inner.types)
            .field("rank", &self.inner.rank)
            .finish()
    }
}

impl PartialEq for ServiceReference {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id() && self.properties() == other.properties()
    }
}

/// Handle returned to the registering module
///
/// Not `Clone`: whoever holds it controls the registration. Unregistering the
/// same registration twice fails with `ServiceUnregistered`.
#[derive(Debug)]
pub struct ServiceRegistration {
    id: ServiceId,
    owner: ModuleId,
}

impl ServiceRegistration {
    pub(crate) fn new(id: ServiceId, owner: ModuleId) -> Self {
        Self { id, owner }
    }

    pub fn id(&self) -> ServiceId {
        self.id
    }

    pub fn owner(&self) -> ModuleId {
        self.owner
    }
}

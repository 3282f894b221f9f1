//! Module system
//!
//! Modules are installed from descriptors declaring the capabilities they
//! provide and the requirements they need. The resolver wires every
//! requirement to a provider while honoring singleton and uses-consistency
//! rules. Resolved modules publish services into a ranked registry, and every
//! change is announced to listeners on a dedicated event thread.
//!
//! ## Layout
//!
//! - [`model`]: descriptors, capabilities, requirements, versions
//! - [`filter`]: LDAP-style attribute filters
//! - [`registry`]: the module graph and its wirings
//! - [`resolver`]: batch and dynamic resolution
//! - [`service`]: the service registry
//! - [`api`]: runtime events and listeners
//! - [`manager`]: the composition root tying them together

pub mod api;
pub mod filter;
pub mod manager;
pub mod model;
pub mod registry;
pub mod resolver;
pub mod service;
pub mod traits;

pub use api::events::{EventDispatcher, Interest, RuntimeEvent};
pub use filter::Filter;
pub use manager::ModuleManager;
pub use model::{
    AttributeValue, Attributes, Capability, ModuleDescriptor, Requirement, Version, VersionRange,
};
pub use registry::{ModuleGraph, ModuleWiring, Wire};
pub use resolver::{FailureKind, FailureReason, ResolutionReport, Resolver};
pub use service::{ServiceReference, ServiceRegistration, ServiceRegistry};
pub use traits::{EventListener, ModuleError, ModuleId, ModuleState};

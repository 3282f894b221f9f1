//! Capability/requirement model
//!
//! Pure data describing what modules offer and need, plus the matcher used by
//! the resolver.

pub mod attributes;
pub mod capability;
pub mod descriptor;
pub mod version;

pub use attributes::{AttributeValue, Attributes, NAME_ATTRIBUTE, VERSION_ATTRIBUTE};
pub use capability::{
    matches, Capability, CapabilityType, Cardinality, Requirement, ResolutionTime,
    HOST_NAMESPACE, MODULE_NAMESPACE,
};
pub use descriptor::ModuleDescriptor;
pub use version::{Version, VersionError, VersionRange};

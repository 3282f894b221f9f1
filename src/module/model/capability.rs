//! Capabilities and requirements
//!
//! A capability is a typed offer (namespace plus attributes); a requirement is
//! a filter over the attributes of capabilities in one namespace.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::attributes::{AttributeValue, Attributes, NAME_ATTRIBUTE, VERSION_ATTRIBUTE};
use super::version::{Version, VersionRange};
use crate::module::filter::{Filter, FilterError};

/// Namespace of the implicit capability every non-fragment module offers, so
/// requirements can target a module by symbolic name
pub const MODULE_NAMESPACE: &str = "module";

/// Namespace fragments use to declare their host
pub const HOST_NAMESPACE: &str = "module.host";

/// Conflict key for the uses-constraint check: namespace plus `name` attribute
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CapabilityType {
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl fmt::Display for CapabilityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}:{}", self.namespace, name),
            None => f.write_str(&self.namespace),
        }
    }
}

/// A named, versioned offer made by a module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub namespace: String,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Capability {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            attributes: Attributes::new(),
        }
    }

    /// Add an attribute
    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.attributes.insert(key, value);
        self
    }

    /// Set the `version` attribute
    pub fn with_version(self, version: Version) -> Self {
        self.with_attribute(VERSION_ATTRIBUTE, version)
    }

    /// The capability's `version` attribute, if it has one
    pub fn version(&self) -> Option<&Version> {
        self.attributes
            .get(VERSION_ATTRIBUTE)
            .and_then(AttributeValue::as_version)
    }

    /// Conflict key used by the uses-constraint check
    pub fn capability_type(&self) -> CapabilityType {
        CapabilityType {
            namespace: self.namespace.clone(),
            name: self.attributes.get_str(NAME_ATTRIBUTE).map(str::to_string),
        }
    }
}

/// Whether an unsatisfied requirement prevents resolution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    #[default]
    Mandatory,
    Optional,
}

/// When a requirement is wired
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionTime {
    /// Wired once, when the module resolves
    #[default]
    Static,
    /// Re-evaluated on every lookup attempt until a wire exists
    Dynamic,
}

fn default_true() -> bool {
    true
}

/// A filtered need a module declares against other modules' capabilities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    pub namespace: String,
    #[serde(default)]
    pub filter: Filter,
    #[serde(default)]
    pub cardinality: Cardinality,
    #[serde(default)]
    pub resolution: ResolutionTime,
    /// Follow the provider's own wires when checking for uses conflicts
    #[serde(default = "default_true")]
    pub uses: bool,
}

impl Requirement {
    /// Mandatory static requirement on any capability in `namespace`
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            filter: Filter::match_all(),
            cardinality: Cardinality::Mandatory,
            resolution: ResolutionTime::Static,
            uses: true,
        }
    }

    /// Requirement on the module with the given symbolic name
    pub fn module(symbolic_name: &str) -> Self {
        Self::new(MODULE_NAMESPACE).with_filter(Filter::equal(NAME_ATTRIBUTE, symbolic_name))
    }

    /// Fragment host requirement on the module with the given symbolic name
    pub fn host(symbolic_name: &str) -> Self {
        Self::new(HOST_NAMESPACE).with_filter(Filter::equal(NAME_ATTRIBUTE, symbolic_name))
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Parse and set the filter
    pub fn with_filter_str(self, filter: &str) -> Result<Self, FilterError> {
        Ok(self.with_filter(filter.parse()?))
    }

    /// Restrict the `version` attribute to a range, in addition to the current filter
    pub fn with_version_range(self, range: &VersionRange) -> Self {
        let range_filter = range.to_filter(VERSION_ATTRIBUTE);
        let filter = if self.filter.is_match_all() {
            range_filter
        } else {
            Filter::and(vec![self.filter.clone(), range_filter])
        };
        self.with_filter(filter)
    }

    pub fn optional(mut self) -> Self {
        self.cardinality = Cardinality::Optional;
        self
    }

    pub fn dynamic(mut self) -> Self {
        self.resolution = ResolutionTime::Dynamic;
        self
    }

    /// Do not follow the provider's wires in the uses-constraint check
    pub fn without_uses(mut self) -> Self {
        self.uses = false;
        self
    }

    pub fn is_mandatory(&self) -> bool {
        self.cardinality == Cardinality::Mandatory
    }

    pub fn is_dynamic(&self) -> bool {
        self.resolution == ResolutionTime::Dynamic
    }

    pub fn is_host(&self) -> bool {
        self.namespace == HOST_NAMESPACE
    }

    /// Whether `capability` satisfies this requirement
    pub fn matches(&self, capability: &Capability) -> bool {
        matches(self, capability)
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.namespace, self.filter)
    }
}

/// Evaluate a requirement against a capability
///
/// Pure and deterministic; shared by static resolution and dynamic
/// re-evaluation.
pub fn matches(requirement: &Requirement, capability: &Capability) -> bool {
    requirement.namespace == capability.namespace && requirement.filter.matches(&capability.attributes)
}

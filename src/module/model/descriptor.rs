//! Module descriptors
//!
//! The already-parsed description of a module handed to the runtime by the
//! manifest layer: identity, version, singleton flag, capabilities and
//! requirements.

use serde::{Deserialize, Serialize};

use super::attributes::{NAME_ATTRIBUTE, VERSION_ATTRIBUTE};
use super::capability::{Capability, Requirement, HOST_NAMESPACE, MODULE_NAMESPACE};
use super::version::Version;
use crate::module::traits::ModuleError;

/// Parsed module description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Symbolic name (not unique; several versions may be installed)
    pub symbolic_name: String,
    /// Module version
    #[serde(default)]
    pub version: Version,
    /// At most one resolved module per symbolic name may carry this flag
    #[serde(default)]
    pub singleton: bool,
    /// Declared capabilities
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    /// Declared requirements
    #[serde(default)]
    pub requirements: Vec<Requirement>,
}

impl ModuleDescriptor {
    pub fn new(symbolic_name: impl Into<String>, version: Version) -> Self {
        Self {
            symbolic_name: symbolic_name.into(),
            version,
            singleton: false,
            capabilities: Vec::new(),
            requirements: Vec::new(),
        }
    }

    pub fn singleton(mut self, singleton: bool) -> Self {
        self.singleton = singleton;
        self
    }

    pub fn capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn requirement(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    /// Declare this module a fragment of the module named `host`
    pub fn fragment_of(self, host: &str) -> Self {
        self.requirement(Requirement::host(host))
    }

    /// A fragment declares a requirement in the host namespace
    pub fn is_fragment(&self) -> bool {
        self.requirements.iter().any(Requirement::is_host)
    }

    /// Index and value of the fragment host requirement
    pub fn host_requirement(&self) -> Option<(usize, &Requirement)> {
        self.requirements.iter().enumerate().find(|(_, r)| r.is_host())
    }

    /// Check structural rules before the descriptor enters the graph
    pub fn validate(&self) -> Result<(), ModuleError> {
        if self.symbolic_name.trim().is_empty() {
            return Err(ModuleError::InvalidDescriptor(
                "Symbolic name cannot be empty".to_string(),
            ));
        }

        let hosts: Vec<&Requirement> = self.requirements.iter().filter(|r| r.is_host()).collect();
        if hosts.len() > 1 {
            return Err(ModuleError::InvalidDescriptor(format!(
                "Fragment {} declares {} host requirements",
                self.symbolic_name,
                hosts.len()
            )));
        }
        if let Some(host) = hosts.first() {
            if !host.is_mandatory() || host.is_dynamic() {
                return Err(ModuleError::InvalidDescriptor(format!(
                    "Host requirement of fragment {} must be mandatory and static",
                    self.symbolic_name
                )));
            }
        }

        for capability in &self.capabilities {
            if capability.namespace.trim().is_empty() {
                return Err(ModuleError::InvalidDescriptor(format!(
                    "Module {} declares a capability without a namespace",
                    self.symbolic_name
                )));
            }
            if capability.namespace == MODULE_NAMESPACE || capability.namespace == HOST_NAMESPACE {
                return Err(ModuleError::InvalidDescriptor(format!(
                    "Namespace '{}' is reserved",
                    capability.namespace
                )));
            }
        }
        for requirement in &self.requirements {
            if requirement.namespace.trim().is_empty() {
                return Err(ModuleError::InvalidDescriptor(format!(
                    "Module {} declares a requirement without a namespace",
                    self.symbolic_name
                )));
            }
        }

        Ok(())
    }

    /// Declared capabilities plus the implicit `module` and `module.host` ones
    ///
    /// Fragments get no implicit capabilities: they never resolve on their
    /// own, so nothing can wire to them directly.
    pub fn effective_capabilities(&self) -> Vec<Capability> {
        let mut capabilities = self.capabilities.clone();
        if !self.is_fragment() {
            for namespace in [MODULE_NAMESPACE, HOST_NAMESPACE] {
                capabilities.push(
                    Capability::new(namespace)
                        .with_attribute(NAME_ATTRIBUTE, self.symbolic_name.as_str())
                        .with_attribute(VERSION_ATTRIBUTE, self.version.clone()),
                );
            }
        }
        capabilities
    }
}

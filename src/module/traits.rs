//! Module system core types and interfaces
//!
//! Defines the identifiers, lifecycle states, errors and listener interface shared by the
//! module graph, the resolver and the service registry.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::module::api::events::RuntimeEvent;
use crate::module::filter::FilterError;
use crate::module::model::VersionError;

/// Unique identifier assigned to a module at install time
///
/// Identifiers are never reused, so they double as a stable tie-break
/// when ordering candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(pub u64);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Module lifecycle state
///
/// `Active` is driven exclusively by the external activation layer through
/// [`crate::module::ModuleManager::mark_active`]; the core only moves modules
/// between `Installed`, `Resolved` and `Uninstalled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleState {
    /// Installed but not (or no longer) wired
    Installed,
    /// Every mandatory requirement is wired
    Resolved,
    /// Resolved and started by the activation layer
    Active,
    /// Removed from the graph; terminal
    Uninstalled,
}

impl ModuleState {
    /// Whether the module currently holds a wiring
    pub fn is_resolved(self) -> bool {
        matches!(self, ModuleState::Resolved | ModuleState::Active)
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModuleState::Installed => "INSTALLED",
            ModuleState::Resolved => "RESOLVED",
            ModuleState::Active => "ACTIVE",
            ModuleState::Uninstalled => "UNINSTALLED",
        };
        f.write_str(name)
    }
}

/// Module system errors
///
/// These are the synchronous rejections of an operation. Resolution failures
/// are not errors; they are reported in a
/// [`crate::module::resolver::ResolutionReport`].
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Module not found: {0}")]
    ModuleNotFound(ModuleId),

    #[error("Cannot {operation} module {module} in state {state}")]
    InvalidState {
        module: ModuleId,
        state: ModuleState,
        operation: &'static str,
    },

    #[error("Invalid module descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Module {module} has no requirement at index {index}")]
    RequirementNotFound { module: ModuleId, index: usize },

    #[error("Requirement {index} of module {module} is not dynamic")]
    NotDynamic { module: ModuleId, index: usize },

    #[error("Service not found: {0}")]
    ServiceNotFound(u64),

    #[error("Service {0} is already unregistered")]
    ServiceUnregistered(u64),

    #[error("Invalid service registration: {0}")]
    InvalidRegistration(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(#[from] FilterError),

    #[error("Invalid version: {0}")]
    InvalidVersion(#[from] VersionError),

    #[error("Resolution cancelled before commit")]
    Cancelled,

    #[error("Event dispatcher is shut down")]
    DispatcherStopped,

    #[error("Failed to start event dispatcher: {0}")]
    DispatcherStart(std::io::Error),
}

/// Listener callback for runtime events
///
/// Implemented for any `Fn(&RuntimeEvent) -> anyhow::Result<()>` closure.
/// A listener that returns an error or panics is isolated: the failure is
/// logged and recorded, and delivery continues with the next listener.
pub trait EventListener: Send + Sync {
    /// Handle a single event
    fn on_event(&self, event: &RuntimeEvent) -> anyhow::Result<()>;
}

impl<F> EventListener for F
where
    F: Fn(&RuntimeEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, event: &RuntimeEvent) -> anyhow::Result<()> {
        self(event)
    }
}

//! bllvm-modules - module dependency resolution and service registry
//!
//! This crate provides the in-process module runtime used by hosts that load
//! optional functionality as modules. It decides which installed modules can
//! run together and how their requirements are wired, and it brokers the
//! services modules publish to each other.
//!
//! ## Components
//!
//! 1. **Module graph**: installed modules, their lifecycle state and wirings
//! 2. **Resolver**: backtracking search over candidate providers with
//!    singleton, fragment and uses-consistency constraints
//! 3. **Service registry**: ranked, filterable directory of live services
//! 4. **Event dispatcher**: ordered delivery of lifecycle, resolution and
//!    service events to listeners
//!
//! Loading module code, activation and persistence belong to the host.
//!
//! ```rust
//! use bllvm_modules::module::{Capability, ModuleDescriptor, ModuleManager, Requirement, Version};
//!
//! let manager = ModuleManager::with_defaults()?;
//! let provider = manager.install(
//!     ModuleDescriptor::new("provider", Version::new(1, 0, 0)).capability(Capability::new("X")),
//! )?;
//! let consumer = manager.install(
//!     ModuleDescriptor::new("consumer", Version::new(1, 0, 0)).requirement(Requirement::new("X")),
//! )?;
//! let report = manager.resolve_all()?;
//! assert!(report.is_success());
//! assert_eq!(manager.get_wires(consumer)?[0].provider, provider);
//! # Ok::<(), bllvm_modules::module::ModuleError>(())
//! ```

pub mod config;
pub mod module;
pub mod utils;

pub use config::{EventConfig, LoggingConfig, ResolverConfig, RuntimeConfig};
pub use module::{ModuleError, ModuleId, ModuleManager, ModuleState};

//! Helpers for building module graphs in tests

#![allow(dead_code)]

use bllvm_modules::module::{
    Capability, ModuleDescriptor, ModuleId, ModuleManager, Requirement, Version,
};

/// Manager with default configuration
pub fn manager() -> ModuleManager {
    ModuleManager::with_defaults().expect("event thread should start")
}

/// Descriptor at version 1.0.0
pub fn module(name: &str) -> ModuleDescriptor {
    ModuleDescriptor::new(name, Version::new(1, 0, 0))
}

/// Descriptor at the given version
pub fn versioned(name: &str, major: u64, minor: u64) -> ModuleDescriptor {
    ModuleDescriptor::new(name, Version::new(major, minor, 0))
}

/// Module offering one capability in `namespace`
pub fn provider(name: &str, namespace: &str) -> ModuleDescriptor {
    module(name).capability(Capability::new(namespace))
}

/// Module with one mandatory requirement on `namespace`
pub fn consumer(name: &str, namespace: &str) -> ModuleDescriptor {
    module(name).requirement(Requirement::new(namespace))
}

/// Providers of every wire of `id`
pub fn providers(manager: &ModuleManager, id: ModuleId) -> Vec<ModuleId> {
    manager
        .get_wires(id)
        .expect("module exists")
        .iter()
        .map(|w| w.provider)
        .collect()
}

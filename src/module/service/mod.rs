//! Service registry
//!
//! Live, ranked directory of service objects published by modules.

pub mod registration;
pub mod registry;

pub use registration::{
    ServiceId, ServiceReference, ServiceRegistration, OBJECT_CLASS, SERVICE_ID, SERVICE_OWNER,
    SERVICE_RANKING,
};
pub use registry::{ServiceObject, ServiceRegistry};

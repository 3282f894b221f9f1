//! Runtime-facing API surface: lifecycle, resolution and service events

pub mod events;

pub use events::{
    EventCategory, EventDispatcher, Interest, ListenerFailure, ListenerId, ModuleEventKind,
    ResolutionEvent, RuntimeEvent, ServiceEvent, ServiceEventKind,
};

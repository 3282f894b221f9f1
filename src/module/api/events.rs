//! Event notification system for the module runtime
//!
//! Module and resolution events are queued and delivered on a dedicated
//! thread, so the triggering call returns before listeners run. The service
//! "unregistering" event is the exception: it is delivered on the caller's
//! thread before the registration is removed.
//!
//! Listeners are snapshotted before delivery, so no lock is held while a
//! callback runs. A listener that errors or panics is recorded and skipped.

use bitflags::bitflags;
use parking_lot::{Mutex, RwLock};
use std::borrow::Cow;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::EventConfig;
use crate::module::filter::Filter;
use crate::module::resolver::FailureReason;
use crate::module::service::ServiceReference;
use crate::module::traits::{EventListener, ModuleError, ModuleId};
use crate::utils::time::current_timestamp;

/// Module lifecycle changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleEventKind {
    Installed,
    Updated,
    Resolved,
    /// Wiring released because the module or one of its providers changed
    Unresolved,
    Uninstalled,
    Activated,
    Deactivated,
}

/// Per-module outcome of a resolution batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionEvent {
    Resolved { module: ModuleId },
    Failed {
        module: ModuleId,
        reasons: Vec<FailureReason>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceEventKind {
    Registered,
    Modified,
    /// Properties changed so the registration no longer matches the listener's filter
    ModifiedEndMatch,
    Unregistering,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceEvent {
    pub kind: ServiceEventKind,
    pub reference: ServiceReference,
    /// The reference before a modification
    pub previous: Option<ServiceReference>,
}

/// Everything the runtime reports to listeners
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    Module {
        module: ModuleId,
        kind: ModuleEventKind,
    },
    Resolution(ResolutionEvent),
    Service(ServiceEvent),
}

impl RuntimeEvent {
    pub fn category(&self) -> EventCategory {
        match self {
            RuntimeEvent::Module { .. } => EventCategory::MODULE,
            RuntimeEvent::Resolution(_) => EventCategory::RESOLUTION,
            RuntimeEvent::Service(_) => EventCategory::SERVICE,
        }
    }
}

impl fmt::Display for RuntimeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeEvent::Module { module, kind } => write!(f, "module {} {:?}", module, kind),
            RuntimeEvent::Resolution(ResolutionEvent::Resolved { module }) => {
                write!(f, "module {} resolved", module)
            }
            RuntimeEvent::Resolution(ResolutionEvent::Failed { module, reasons }) => {
                write!(f, "module {} failed to resolve ({} reasons)", module, reasons.len())
            }
            RuntimeEvent::Service(event) => {
                write!(f, "{} {:?}", event.reference.id(), event.kind)
            }
        }
    }
}

bitflags! {
    /// Event categories a listener can subscribe to
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventCategory: u8 {
        const MODULE     = 1 << 0;
        const RESOLUTION = 1 << 1;
        const SERVICE    = 1 << 2;
    }
}

/// Listener identifier returned by `add_listener`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(pub u64);

type Predicate = Box<dyn Fn(&RuntimeEvent) -> bool + Send + Sync>;

/// What a listener wants to hear about
pub enum Interest {
    /// Every event in the given categories
    Categories(EventCategory),
    /// Every event the predicate accepts
    Predicate(Predicate),
    /// Service events for registrations of `type_name` (any type when `None`)
    /// whose properties match `filter`
    Service {
        type_name: Option<String>,
        filter: Filter,
    },
}

impl Interest {
    pub fn predicate(predicate: impl Fn(&RuntimeEvent) -> bool + Send + Sync + 'static) -> Self {
        Interest::Predicate(Box::new(predicate))
    }

    pub fn service(type_name: impl Into<String>, filter: Filter) -> Self {
        Interest::Service {
            type_name: Some(type_name.into()),
            filter,
        }
    }

    /// The event as this listener should see it, or `None` to skip it
    fn select<'e>(&self, event: &'e RuntimeEvent) -> Option<Cow<'e, RuntimeEvent>> {
        match self {
            Interest::Categories(categories) => categories
                .contains(event.category())
                .then_some(Cow::Borrowed(event)),
            Interest::Predicate(predicate) => predicate(event).then_some(Cow::Borrowed(event)),
            Interest::Service { type_name, filter } => {
                let RuntimeEvent::Service(service) = event else {
                    return None;
                };
                if let Some(type_name) = type_name {
                    if !service.reference.implements(type_name) {
                        return None;
                    }
                }
                if filter.matches(service.reference.properties()) {
                    return Some(Cow::Borrowed(event));
                }
                let matched_before = service.kind == ServiceEventKind::Modified
                    && service
                        .previous
                        .as_ref()
                        .is_some_and(|p| filter.matches(p.properties()));
                matched_before.then(|| {
                    Cow::Owned(RuntimeEvent::Service(ServiceEvent {
                        kind: ServiceEventKind::ModifiedEndMatch,
                        ..service.clone()
                    }))
                })
            }
        }
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interest::Categories(c) => f.debug_tuple("Categories").field(c).finish(),
            Interest::Predicate(_) => f.write_str("Predicate(..)"),
            Interest::Service { type_name, filter } => f
                .debug_struct("Service")
                .field("type_name", type_name)
                .field("filter", &filter.to_string())
                .finish(),
        }
    }
}

/// A listener that returned an error or panicked
#[derive(Debug, Clone)]
pub struct ListenerFailure {
    pub listener: ListenerId,
    pub event: String,
    pub error: String,
    pub timestamp: u64,
}

struct ListenerEntry {
    id: ListenerId,
    interest: Interest,
    listener: Arc<dyn EventListener>,
}

struct Shared {
    listeners: RwLock<Vec<Arc<ListenerEntry>>>,
    /// Listener failure log - bounded to the last `max_failures` entries
    failures: Mutex<VecDeque<ListenerFailure>>,
    max_failures: usize,
}

impl Shared {
    fn deliver(&self, event: &RuntimeEvent) {
        let listeners: Vec<Arc<ListenerEntry>> = self.listeners.read().clone();
        for entry in listeners {
            let Some(event) = entry.interest.select(event) else {
                continue;
            };
            let outcome = catch_unwind(AssertUnwindSafe(|| entry.listener.on_event(&event)));
            let error = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => format!("{:#}", e),
                Err(panic) => panic_message(panic.as_ref()),
            };
            warn!(
                "Listener {} failed on event '{}': {}",
                entry.id.0, event, error
            );
            self.record_failure(ListenerFailure {
                listener: entry.id,
                event: event.to_string(),
                error,
                timestamp: current_timestamp(),
            });
        }
    }

    fn record_failure(&self, failure: ListenerFailure) {
        let mut failures = self.failures.lock();
        failures.push_back(failure);
        // Limit log size (keep last N entries)
        while failures.len() > self.max_failures {
            failures.pop_front();
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

enum Command {
    Deliver(RuntimeEvent),
    Flush(oneshot::Sender<()>),
}

/// Event dispatcher owning the delivery thread
pub struct EventDispatcher {
    shared: Arc<Shared>,
    sender: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
    next_listener: AtomicU64,
}

impl EventDispatcher {
    /// Create a dispatcher and start its delivery thread
    pub fn new(config: &EventConfig) -> Result<Self, ModuleError> {
        let shared = Arc::new(Shared {
            listeners: RwLock::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            max_failures: config.max_recorded_failures,
        });
        let (sender, mut receiver) = mpsc::unbounded_channel::<Command>();

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || {
                while let Some(command) = receiver.blocking_recv() {
                    match command {
                        Command::Deliver(event) => worker_shared.deliver(&event),
                        Command::Flush(done) => {
                            let _ = done.send(());
                        }
                    }
                }
                debug!("Event dispatcher drained");
            })
            .map_err(ModuleError::DispatcherStart)?;

        info!("Event dispatcher started on thread '{}'", config.thread_name);
        Ok(Self {
            shared,
            sender: Mutex::new(Some(sender)),
            worker_id: worker.thread().id(),
            worker: Mutex::new(Some(worker)),
            next_listener: AtomicU64::new(1),
        })
    }

    /// Register a listener
    pub fn add_listener(
        &self,
        interest: Interest,
        listener: impl EventListener + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        debug!("Adding listener {} ({:?})", id.0, interest);
        self.shared.listeners.write().push(Arc::new(ListenerEntry {
            id,
            interest,
            listener: Arc::new(listener),
        }));
        id
    }

    /// Remove a listener; returns whether it was registered
    ///
    /// An event already being delivered may still reach it.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.shared.listeners.write();
        let before = listeners.len();
        listeners.retain(|entry| entry.id != id);
        before != listeners.len()
    }

    pub fn listener_count(&self) -> usize {
        self.shared.listeners.read().len()
    }

    /// Queue an event for asynchronous delivery
    pub fn publish(&self, event: RuntimeEvent) {
        let sender = self.sender.lock();
        let delivered = sender
            .as_ref()
            .is_some_and(|s| s.send(Command::Deliver(event)).is_ok());
        if !delivered {
            debug!("Event dispatcher stopped; dropping event");
        }
    }

    /// Deliver an event on the calling thread, after everything queued before it
    pub fn dispatch_sync(&self, event: RuntimeEvent) {
        // From inside a listener the queue cannot drain; deliver right away
        if thread::current().id() != self.worker_id {
            let _ = self.flush();
        }
        self.shared.deliver(&event);
    }

    /// Block until every event published before this call has been delivered
    ///
    /// Returns immediately when called from a listener. Must not be called
    /// from inside an async runtime.
    pub fn flush(&self) -> Result<(), ModuleError> {
        if thread::current().id() == self.worker_id {
            return Ok(());
        }
        let (done, wait) = oneshot::channel();
        {
            let sender = self.sender.lock();
            let sender = sender.as_ref().ok_or(ModuleError::DispatcherStopped)?;
            sender
                .send(Command::Flush(done))
                .map_err(|_| ModuleError::DispatcherStopped)?;
        }
        wait.blocking_recv()
            .map_err(|_| ModuleError::DispatcherStopped)
    }

    /// Most recent listener failures, oldest first
    pub fn recent_failures(&self, limit: usize) -> Vec<ListenerFailure> {
        let failures = self.shared.failures.lock();
        let start = failures.len().saturating_sub(limit);
        failures.range(start..).cloned().collect()
    }

    /// Deliver everything queued, then stop the delivery thread
    pub fn shutdown(&self) {
        let sender = self.sender.lock().take();
        if sender.is_none() {
            return;
        }
        drop(sender);
        if thread::current().id() == self.worker_id {
            return;
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!("Event dispatcher thread panicked during shutdown");
            }
        }
        info!("Event dispatcher stopped");
    }

    pub fn is_running(&self) -> bool {
        self.sender.lock().is_some()
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("listeners", &self.listener_count())
            .field("running", &self.is_running())
            .finish()
    }
}

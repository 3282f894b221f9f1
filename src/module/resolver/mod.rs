//! Module resolver
//!
//! Computes wirings for a batch of modules against a snapshot of the module
//! graph, then commits them only if the graph has not changed in the meantime.
//! Lost races are retried with backoff; after the configured number of
//! attempts the batch is searched and committed under the exclusive graph lock.

mod batch;
mod candidates;
pub mod report;
mod search;
mod uses;

pub use report::{FailureKind, FailureReason, ModuleOutcome, ResolutionReport};

use std::fmt;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use self::batch::Batch;
use crate::config::ResolverConfig;
use crate::module::registry::{
    GraphSnapshot, ModuleGraph, RequirementRef, StaleSnapshot, StateTransition, Wire, WiringPlan,
};
use crate::module::traits::{ModuleError, ModuleId};
use crate::utils::retry::{retry_if_retryable, IsRetryable, RetryConfig};

/// Committed result of a resolution batch
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub report: ResolutionReport,
    /// State changes applied to the graph, ascending by module
    pub transitions: Vec<StateTransition>,
}

enum Attempt {
    Stale(StaleSnapshot),
    Rejected(ModuleError),
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attempt::Stale(stale) => fmt::Display::fmt(stale, f),
            Attempt::Rejected(e) => fmt::Display::fmt(e, f),
        }
    }
}

impl IsRetryable for Attempt {
    fn is_retryable(&self) -> bool {
        matches!(self, Attempt::Stale(_))
    }
}

/// Stateless resolver; all state lives in the graph it is given
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    config: ResolverConfig,
}

impl Resolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve `targets` plus every stale module
    ///
    /// Unknown targets reject the whole call. A cancelled batch returns
    /// [`ModuleError::Cancelled`] without touching the graph.
    pub fn resolve(
        &self,
        graph: &ModuleGraph,
        targets: &[ModuleId],
        cancel: Option<&CancellationToken>,
    ) -> Result<Resolution, ModuleError> {
        debug!("Resolving {} requested module(s)", targets.len());
        let (report, transitions) = self.commit_optimistically(graph, cancel, |snapshot| {
            Batch::new(snapshot, self.config.max_search_steps, cancel).run(targets)
        })?;

        let failed = report.failed().count();
        if failed > 0 {
            info!(
                "Resolution batch: {} module(s) resolved, {} failed",
                transitions.len(),
                failed
            );
        } else {
            debug!("Resolution batch: {} module(s) resolved", transitions.len());
        }
        Ok(Resolution {
            report,
            transitions,
        })
    }

    /// Wire a dynamic requirement of a resolved module, if a provider is available
    ///
    /// An existing wire is returned unchanged; `None` means no resolved
    /// provider currently satisfies the requirement without a uses conflict.
    pub fn resolve_dynamic(
        &self,
        graph: &ModuleGraph,
        module: ModuleId,
        index: usize,
    ) -> Result<Option<Wire>, ModuleError> {
        let requirement = RequirementRef { module, index };
        let (wire, _) = self.commit_optimistically(graph, None, |snapshot| {
            let entry = snapshot
                .get(module)
                .ok_or(ModuleError::ModuleNotFound(module))?;
            let declared = entry
                .record
                .requirement(index)
                .ok_or(ModuleError::RequirementNotFound { module, index })?;
            if !declared.is_dynamic() {
                return Err(ModuleError::NotDynamic { module, index });
            }
            if !entry.state.is_resolved() {
                return Err(ModuleError::InvalidState {
                    module,
                    state: entry.state,
                    operation: "wire a dynamic requirement of",
                });
            }

            let mut plan = WiringPlan {
                generation: snapshot.generation,
                ..Default::default()
            };
            if let Some(existing) = entry.wiring.as_ref().and_then(|w| w.wire_for(requirement)) {
                return Ok((plan, Some(existing.clone())));
            }

            let wire = Batch::new(snapshot, self.config.max_search_steps, None)
                .dynamic_wire(module, requirement);
            if let Some(wire) = &wire {
                debug!(
                    "Dynamic requirement {} of module {} wired to {}",
                    index, module, wire.provider
                );
                plan.dynamic_wires.push(wire.clone());
            }
            Ok((plan, wire))
        })?;
        Ok(wire)
    }

    /// Plan against a snapshot and commit, retrying lost races
    fn commit_optimistically<T>(
        &self,
        graph: &ModuleGraph,
        cancel: Option<&CancellationToken>,
        plan: impl Fn(&GraphSnapshot) -> Result<(WiringPlan, T), ModuleError>,
    ) -> Result<(T, Vec<StateTransition>), ModuleError> {
        let cancelled = || cancel.is_some_and(CancellationToken::is_cancelled);
        let retry = RetryConfig::from(&self.config);

        let attempt = || {
            if cancelled() {
                return Err(Attempt::Rejected(ModuleError::Cancelled));
            }
            let snapshot = graph.snapshot();
            let (wiring, value) = plan(&snapshot).map_err(Attempt::Rejected)?;
            if cancelled() {
                return Err(Attempt::Rejected(ModuleError::Cancelled));
            }
            if wiring.is_empty() {
                return Ok((value, Vec::new()));
            }
            let transitions = graph.commit(wiring).map_err(Attempt::Stale)?;
            Ok((value, transitions))
        };

        match retry_if_retryable(&retry, attempt) {
            Ok(done) => Ok(done),
            Err(Attempt::Rejected(e)) => Err(e),
            Err(Attempt::Stale(stale)) => {
                warn!(
                    "Resolution lost {} commit race(s) ({}); resolving under exclusive lock",
                    retry.max_attempts.max(1),
                    stale
                );
                graph.with_exclusive(|inner| {
                    let snapshot = inner.snapshot();
                    let (wiring, value) = plan(&snapshot)?;
                    if cancelled() {
                        return Err(ModuleError::Cancelled);
                    }
                    Ok((value, inner.install_plan(wiring)))
                })
            }
        }
    }
}

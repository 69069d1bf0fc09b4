use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use quorum_core::event::EventBus;
use quorum_core::types::{RunEvent, RunId};

use crate::budget::BudgetTracker;

/// Run-scoped state threaded through every step, continuation and invocation.
///
/// The budget tracker is the only mutable state shared between concurrent
/// invocations; everything else is either immutable or a handle.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: RunId,
    pub cancel: CancellationToken,
    pub budget: Arc<BudgetTracker>,
    pub events: Arc<EventBus>,
}

impl RunContext {
    pub fn new(
        run_id: RunId,
        cancel: CancellationToken,
        budget: Arc<BudgetTracker>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            run_id,
            cancel,
            budget,
            events,
        }
    }

    /// A standalone context with a fresh run id, no budget and a private bus.
    pub fn detached() -> Self {
        Self::new(
            RunId::new(),
            CancellationToken::new(),
            Arc::new(BudgetTracker::unlimited()),
            Arc::new(EventBus::default()),
        )
    }

    /// Same run, different cancellation scope (used for all-or-nothing branch groups).
    pub fn with_cancel(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn publish(&self, event: RunEvent) {
        self.events.publish(event);
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("budget", &self.budget)
            .finish()
    }
}

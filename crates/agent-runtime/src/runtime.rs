//! The trait boundary at C5. The Agent Runtime itself is opaque and
//! external (§4.4); this crate only defines the shape the Orchestrator
//! drives it through, plus the cancellation handle described in §5
//! ("Cancellation. The orchestrator exposes an interrupt callback that the
//! Stream Manager stores").

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::Notify;

use crate::error::Result;
use crate::events::AgentEvent;
use crate::options::TurnOptions;

/// A cheaply cloneable handle that lets a caller ask a running turn to stop
/// at its next safe point. `signal` is idempotent; a turn that already
/// finished simply ignores it.
#[derive(Clone)]
pub struct InterruptHandle(Arc<Notify>);

impl InterruptHandle {
    pub fn new() -> Self {
        Self(Arc::new(Notify::new()))
    }

    pub fn signal(&self) {
        self.0.notify_waiters();
    }

    /// Resolves once `signal` has been called. Runtimes poll this between
    /// safe points (e.g. after each tool call) to decide whether to unwind
    /// to an `aborted` terminal event.
    pub async fn cancelled(&self) {
        self.0.notified().await;
    }
}

impl Default for InterruptHandle {
    fn default() -> Self {
        Self::new()
    }
}

pub type EventStream = Pin<Box<dyn Stream<Item = AgentEvent> + Send>>;

pub struct RunningTurn {
    pub events: EventStream,
    pub interrupt: InterruptHandle,
}

/// Outcome of a gated tool call (§4.4: "every tool-use event passes through
/// C3 before being executed by C5").
#[derive(Debug, Clone)]
pub enum ToolGateDecision {
    Allow(serde_json::Value),
    Deny(String),
}

/// Installed on `TurnOptions` by the Orchestrator so a concrete runtime can
/// call back into the Permission Handler before actually executing a tool,
/// without this crate depending on `parachute-permission` directly.
#[async_trait]
pub trait ToolGate: Send + Sync {
    async fn check(&self, tool_name: &str, input: serde_json::Value, tool_use_id: &str) -> ToolGateDecision;

    async fn ask_user(
        &self,
        tool_use_id: &str,
        questions: serde_json::Value,
    ) -> std::collections::HashMap<String, serde_json::Value>;
}

/// Implemented by whatever concrete agent backend is wired in at the
/// binary boundary. The Orchestrator depends only on this trait.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn start_turn(&self, options: TurnOptions) -> Result<RunningTurn>;
}

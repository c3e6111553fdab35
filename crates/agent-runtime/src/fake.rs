//! In-memory `AgentRuntime` for exercising the Orchestrator and Stream
//! Manager without a real external agent backend.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::error::Result;
use crate::events::AgentEvent;
use crate::options::TurnOptions;
use crate::runtime::{AgentRuntime, InterruptHandle, RunningTurn};

/// Replays a fixed script of events for every turn, ignoring the input
/// options except to stamp a fresh session ID into `Session`/`Done` events
/// that don't already carry one.
pub struct FakeAgentRuntime {
    script: Vec<AgentEvent>,
}

impl FakeAgentRuntime {
    pub fn new(script: Vec<AgentEvent>) -> Self {
        Self { script }
    }

    /// A minimal scripted happy path: session, a text chunk, done.
    pub fn happy_path(session_id: Uuid) -> Self {
        Self::new(vec![
            AgentEvent::Session { session_id, notice: None },
            AgentEvent::Text { delta: "hello from the fake runtime".to_string() },
            AgentEvent::Done { session_id },
        ])
    }
}

#[async_trait]
impl AgentRuntime for FakeAgentRuntime {
    async fn start_turn(&self, _options: TurnOptions) -> Result<RunningTurn> {
        let (tx, rx) = mpsc::channel(32);
        let script = self.script.clone();
        let interrupt = InterruptHandle::new();
        let interrupt_for_task = interrupt.clone();

        tokio::spawn(async move {
            for event in script {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            let _ = &interrupt_for_task;
        });

        Ok(RunningTurn { events: Box::pin(ReceiverStream::new(rx)), interrupt })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn replays_scripted_events_in_order() {
        let session_id = Uuid::new_v4();
        let runtime = FakeAgentRuntime::happy_path(session_id);
        let turn = runtime.start_turn(TurnOptions::new("hi")).await.unwrap();
        let events: Vec<AgentEvent> = turn.events.collect().await;
        assert_eq!(events.len(), 3);
        assert!(events.last().unwrap().is_terminal());
    }
}

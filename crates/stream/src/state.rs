//! Per-session stream bookkeeping: the ring buffer, subscriber fan-out list,
//! and completion bookkeeping described in §4.1 "Stream State".

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use parachute_agent_runtime::AgentEvent;

/// A read-only snapshot of a stream's bookkeeping, for status endpoints.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub started_at: DateTime<Utc>,
    pub last_event_at: DateTime<Utc>,
    pub completed: bool,
    pub subscriber_count: usize,
    pub final_event: Option<AgentEvent>,
}

pub(crate) struct Inner {
    pub(crate) ring_capacity: usize,
    pub(crate) buffer: VecDeque<AgentEvent>,
    pub(crate) subscribers: Vec<mpsc::Sender<AgentEvent>>,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) last_event_at: DateTime<Utc>,
    pub(crate) completed: bool,
    pub(crate) final_event: Option<AgentEvent>,
}

impl Inner {
    pub(crate) fn new(ring_capacity: usize) -> Self {
        let now = Utc::now();
        Self {
            ring_capacity,
            buffer: VecDeque::with_capacity(ring_capacity),
            subscribers: Vec::new(),
            started_at: now,
            last_event_at: now,
            completed: false,
            final_event: None,
        }
    }

    pub(crate) fn info(&self) -> StreamInfo {
        StreamInfo {
            started_at: self.started_at,
            last_event_at: self.last_event_at,
            completed: self.completed,
            subscriber_count: self.subscribers.len(),
            final_event: self.final_event.clone(),
        }
    }

    /// Appends `event` to the ring, evicting the oldest entry once full, then
    /// fans it out to every live subscriber. Subscribers whose queue is full
    /// have the event dropped with a warning (§4.1 "must never block on any
    /// single subscriber"); subscribers whose receiver has gone away are
    /// pruned from the list outright.
    pub(crate) fn push(&mut self, event: AgentEvent) {
        self.last_event_at = Utc::now();
        if self.buffer.len() >= self.ring_capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(event.clone());

        self.subscribers.retain_mut(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("subscriber queue full, dropping event");
                true
            }
        });

        if event.is_terminal() {
            self.completed = true;
            self.final_event = Some(event);
        }
    }
}

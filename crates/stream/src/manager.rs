//! C7 Stream Manager: one background pump per session, bounded replay
//! buffer, many subscribers, and temp-ID → real-ID rekeying (§4.1).

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use parachute_agent_runtime::{AgentEvent, InterruptHandle};

use crate::error::{Result, StreamError};
use crate::state::{Inner, StreamInfo};

pub const DEFAULT_RING_CAPACITY: usize = 100;
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 200;
pub const DEFAULT_CLEANUP_DELAY: Duration = Duration::from_secs(300);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct Entry {
    inner: Arc<Mutex<Inner>>,
    interrupt: Option<InterruptHandle>,
    task: JoinHandle<()>,
}

/// One instance is shared (via `Arc`) across the HTTP layer, the bot
/// connector, and the orchestrator. All state lives behind an async mutex
/// keyed by session ID; callers never hold a lock across an `.await` that
/// isn't this manager's own.
pub struct StreamManager {
    entries: Mutex<HashMap<String, Entry>>,
    ring_capacity: usize,
    subscriber_capacity: usize,
    cleanup_delay: Duration,
}

impl Default for StreamManager {
    fn default() -> Self {
        Self::new(DEFAULT_RING_CAPACITY, DEFAULT_SUBSCRIBER_CAPACITY, DEFAULT_CLEANUP_DELAY)
    }
}

impl StreamManager {
    pub fn new(ring_capacity: usize, subscriber_capacity: usize, cleanup_delay: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ring_capacity,
            subscriber_capacity,
            cleanup_delay,
        }
    }

    /// Installs a new stream state under `key` and spawns the background
    /// pump. Returns `false` ("already active") if a non-complete stream
    /// already exists for this key.
    pub async fn start_stream(
        self: &Arc<Self>,
        key: impl AsRef<str>,
        source: impl Stream<Item = AgentEvent> + Send + 'static,
        interrupt: Option<InterruptHandle>,
    ) -> bool {
        let key = key.as_ref().to_string();
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.get(&key) {
            if !existing.inner.lock().await.completed {
                return false;
            }
        }

        let inner = Arc::new(Mutex::new(Inner::new(self.ring_capacity)));
        let pump_inner = inner.clone();
        let manager = self.clone();
        let pump_key = key.clone();

        let task = tokio::spawn(async move {
            tokio::pin!(source);
            let mut rekeyed = false;
            while let Some(event) = source.next().await {
                if !rekeyed {
                    if let AgentEvent::Session { session_id, .. } = &event {
                        if pump_key.starts_with("pending-") {
                            manager.rekey(&pump_key, &session_id.to_string()).await;
                            rekeyed = true;
                        }
                    }
                }
                let terminal = event.is_terminal();
                pump_inner.lock().await.push(event);
                if terminal {
                    break;
                }
            }
        });

        entries.insert(key, Entry { inner, interrupt, task });
        true
    }

    /// Atomically moves the entry at `old_key` to `new_key`, unless
    /// `new_key` is already occupied (another writer got there first).
    async fn rekey(&self, old_key: &str, new_key: &str) {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(new_key) {
            return;
        }
        if let Some(entry) = entries.remove(old_key) {
            info!(old_key, new_key, "rekeyed stream to its definitive session id");
            entries.insert(new_key.to_string(), entry);
        }
    }

    /// Attaches a bounded subscriber queue to the stream at `key`. With
    /// `include_buffer`, the returned stream first replays the ring buffer
    /// snapshot, then continues with live events until a terminal or until
    /// the caller stops polling.
    pub async fn subscribe(
        &self,
        key: impl AsRef<str>,
        include_buffer: bool,
    ) -> Result<Pin<Box<dyn Stream<Item = AgentEvent> + Send>>> {
        let key = key.as_ref();
        let entries = self.entries.lock().await;
        let entry = entries.get(key).ok_or_else(|| StreamError::NoStream(key.to_string()))?;

        let (tx, rx) = tokio::sync::mpsc::channel(self.subscriber_capacity);
        let mut inner = entry.inner.lock().await;
        if include_buffer {
            for event in inner.buffer.iter().cloned() {
                let _ = tx.try_send(event);
            }
        }
        if !inner.completed {
            inner.subscribers.push(tx);
        }
        drop(inner);

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    /// Invokes the stored interrupt callback (if any), cancels the
    /// background pump, and finalizes the state with an `aborted` terminal
    /// so that in-flight subscribers observe a clean close.
    pub async fn abort_stream(&self, key: impl AsRef<str>) -> bool {
        let key = key.as_ref();
        let entries = self.entries.lock().await;
        let Some(entry) = entries.get(key) else { return false };

        if let Some(interrupt) = &entry.interrupt {
            interrupt.signal();
        }
        entry.task.abort();

        let mut inner = entry.inner.lock().await;
        if !inner.completed {
            inner.push(AgentEvent::Aborted);
        }
        true
    }

    pub async fn has_active_stream(&self, key: impl AsRef<str>) -> bool {
        let entries = self.entries.lock().await;
        match entries.get(key.as_ref()) {
            Some(entry) => !entry.inner.lock().await.completed,
            None => false,
        }
    }

    pub async fn get_stream_info(&self, key: impl AsRef<str>) -> Option<StreamInfo> {
        let entries = self.entries.lock().await;
        match entries.get(key.as_ref()) {
            Some(entry) => Some(entry.inner.lock().await.info()),
            None => None,
        }
    }

    pub async fn get_all_active_streams(&self) -> Vec<String> {
        let entries = self.entries.lock().await;
        let mut active = Vec::new();
        for (key, entry) in entries.iter() {
            if !entry.inner.lock().await.completed {
                active.push(key.clone());
            }
        }
        active
    }

    /// Removes completed streams whose last event predates `cleanup_delay`
    /// and that have no subscribers left. Intended to run on a periodic
    /// sweep (`run_cleanup_loop`), but callable directly from tests.
    pub async fn sweep(&self) {
        let mut entries = self.entries.lock().await;
        let mut stale = Vec::new();
        for (key, entry) in entries.iter() {
            let inner = entry.inner.lock().await;
            let idle = chrono::Utc::now().signed_duration_since(inner.last_event_at);
            let past_grace = idle.to_std().map(|d| d >= self.cleanup_delay).unwrap_or(false);
            if inner.completed && inner.subscribers.is_empty() && past_grace {
                stale.push(key.clone());
            }
        }
        for key in stale {
            entries.remove(&key);
        }
    }

    /// Runs [`Self::sweep`] on a fixed interval until the process exits.
    /// Spawned once at process start; never returns.
    pub async fn run_cleanup_loop(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.sweep().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::time::Duration as StdDuration;
    use uuid::Uuid;

    fn scripted(events: Vec<AgentEvent>) -> impl Stream<Item = AgentEvent> + Send + 'static {
        stream::iter(events)
    }

    #[tokio::test]
    async fn second_start_stream_fails_while_first_is_active() {
        let manager = Arc::new(StreamManager::default());
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        let never_ending = ReceiverStream::new(rx);
        let _keep_open = tx;

        assert!(manager.start_stream("s1", never_ending, None).await);
        assert!(!manager.start_stream("s1", scripted(vec![AgentEvent::Aborted]), None).await);
    }

    #[tokio::test]
    async fn subscribe_replays_buffer_then_live_events_in_order() {
        let manager = Arc::new(StreamManager::default());
        let session_id = Uuid::new_v4();
        let events = vec![
            AgentEvent::Session { session_id, notice: None },
            AgentEvent::Text { delta: "a".into() },
            AgentEvent::Text { delta: "b".into() },
            AgentEvent::Done { session_id },
        ];
        assert!(manager.start_stream("s2", scripted(events), None).await);

        // give the pump a beat to finish before subscribing so the whole
        // script lands in the replay buffer.
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        let collected: Vec<AgentEvent> = manager.subscribe("s2", true).await.unwrap().collect().await;
        assert_eq!(collected.len(), 4);
        assert!(collected.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn subscribe_fails_when_no_stream_registered() {
        let manager = Arc::new(StreamManager::default());
        assert!(manager.subscribe("missing", true).await.is_err());
    }

    #[tokio::test]
    async fn rekey_moves_temp_id_subscribers_to_the_real_session_id() {
        let manager = Arc::new(StreamManager::default());
        let session_id = Uuid::new_v4();
        let events = vec![
            AgentEvent::Session { session_id, notice: None },
            AgentEvent::Done { session_id },
        ];
        let temp_key = "pending-abc123".to_string();
        assert!(manager.start_stream(&temp_key, scripted(events), None).await);

        tokio::time::sleep(StdDuration::from_millis(20)).await;

        assert!(!manager.has_active_stream(&temp_key).await);
        assert!(manager.get_stream_info(session_id.to_string()).await.is_some());
    }

    #[tokio::test]
    async fn abort_stream_finalizes_with_aborted_and_is_idempotent_on_missing_key() {
        let manager = Arc::new(StreamManager::default());
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        assert!(manager.start_stream("s3", ReceiverStream::new(rx), None).await);
        let _keep_open = tx;

        assert!(manager.abort_stream("s3").await);
        let info = manager.get_stream_info("s3").await.unwrap();
        assert!(info.completed);
        assert!(matches!(info.final_event, Some(AgentEvent::Aborted)));

        assert!(!manager.abort_stream("never-existed").await);
    }

    #[tokio::test]
    async fn sweep_removes_completed_streams_past_the_grace_period() {
        let manager = Arc::new(StreamManager::new(
            DEFAULT_RING_CAPACITY,
            DEFAULT_SUBSCRIBER_CAPACITY,
            Duration::from_millis(1),
        ));
        assert!(manager.start_stream("s4", scripted(vec![AgentEvent::Aborted]), None).await);
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        manager.sweep().await;
        assert!(manager.get_stream_info("s4").await.is_none());
    }
}

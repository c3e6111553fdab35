//! §4.4 "Title/summary curation (interface only)": the post-exchange
//! curator is an external collaborator the Orchestrator calls through a
//! narrow trait, treating failure or timeout as "no title change."

use async_trait::async_trait;

#[async_trait]
pub trait TitleCurator: Send + Sync {
    async fn suggest_title(&self, turn_text: &str) -> Option<String>;
}

/// Runnable without wiring a real curator.
pub struct NoOpCurator;

#[async_trait]
impl TitleCurator for NoOpCurator {
    async fn suggest_title(&self, _turn_text: &str) -> Option<String> {
        None
    }
}

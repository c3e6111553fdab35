//! C2: durable mapping of session ID to metadata, permissions, and links.
//!
//! Grounded on the teacher's `redb`-backed secondary index
//! (`aigent-memory`'s `MemoryIndex`): one `redb::Database` opened once,
//! JSON-serialized rows, and a warm `LruCache` in front of it. Here the
//! table holds full `Session` rows rather than compact metadata, since a
//! session — unlike a memory entry — is small and always needed whole.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use lru::LruCache;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use uuid::Uuid;

use crate::model::{PairingRequest, Session};

const SESSIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");
const PAIRING_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("pairing_requests");

#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("no session with id {0}")]
    NotFound(Uuid),
    #[error("no pairing request with id {0}")]
    PairingNotFound(Uuid),
    #[error("(de)serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Any `redb` open/transaction/table/commit error. Wrapped generically
    /// rather than mirrored variant-for-variant so this enum doesn't need to
    /// track every error type `redb` happens to expose.
    #[error("storage error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl SessionStoreError {
    fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        SessionStoreError::Backend(anyhow::Error::new(err))
    }
}

type Result<T> = std::result::Result<T, SessionStoreError>;

/// A single async handle shared by every caller (§5 "Shared-resource
/// policy": the session store "is the only mutable persistent resource and
/// is accessed through a single async handle"). Internally a
/// `std::sync::Mutex` guards the cache; `redb` itself serializes writers at
/// the database level, so the mutex only protects the LRU, not correctness
/// of the underlying table.
pub struct SessionStore {
    db: Database,
    cache: Mutex<LruCache<Uuid, Session>>,
    path: PathBuf,
}

impl SessionStore {
    pub fn open(path: impl AsRef<Path>, cache_capacity: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(SessionStoreError::backend)?;
        }
        let db = Database::create(&path).map_err(SessionStoreError::backend)?;
        {
            let tx = db.begin_write().map_err(SessionStoreError::backend)?;
            tx.open_table(SESSIONS_TABLE).map_err(SessionStoreError::backend)?;
            tx.open_table(PAIRING_TABLE).map_err(SessionStoreError::backend)?;
            tx.commit().map_err(SessionStoreError::backend)?;
        }
        let capacity = NonZeroUsize::new(cache_capacity.max(1)).unwrap();
        Ok(Self {
            db,
            cache: Mutex::new(LruCache::new(capacity)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn insert(&self, session: &Session) -> Result<()> {
        let bytes = serde_json::to_vec(session)?;
        let tx = self.db.begin_write().map_err(SessionStoreError::backend)?;
        {
            let mut table = tx.open_table(SESSIONS_TABLE).map_err(SessionStoreError::backend)?;
            table
                .insert(session.id.to_string().as_str(), bytes.as_slice())
                .map_err(SessionStoreError::backend)?;
        }
        tx.commit().map_err(SessionStoreError::backend)?;
        self.cache.lock().unwrap().put(session.id, session.clone());
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<Session> {
        if let Some(hit) = self.cache.lock().unwrap().get(&id) {
            return Ok(hit.clone());
        }
        let tx = self.db.begin_read().map_err(SessionStoreError::backend)?;
        let table = tx.open_table(SESSIONS_TABLE).map_err(SessionStoreError::backend)?;
        let row = table
            .get(id.to_string().as_str())
            .map_err(SessionStoreError::backend)?
            .ok_or(SessionStoreError::NotFound(id))?;
        let session: Session = serde_json::from_slice(row.value())?;
        self.cache.lock().unwrap().put(id, session.clone());
        Ok(session)
    }

    pub fn try_get(&self, id: Uuid) -> Result<Option<Session>> {
        match self.get(id) {
            Ok(s) => Ok(Some(s)),
            Err(SessionStoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Applies `mutate` to the stored session and persists the result.
    /// Errors with `NotFound` if `id` is unknown.
    pub fn update(&self, id: Uuid, mutate: impl FnOnce(&mut Session)) -> Result<Session> {
        let mut session = self.get(id)?;
        mutate(&mut session);
        self.insert(&session)?;
        Ok(session)
    }

    /// Idempotent: archiving an already-archived session is a no-op
    /// (round-trip property in §8).
    pub fn archive(&self, id: Uuid) -> Result<Session> {
        self.update(id, |s| s.archived = true)
    }

    pub fn unarchive(&self, id: Uuid) -> Result<Session> {
        self.update(id, |s| s.archived = false)
    }

    pub fn delete(&self, id: Uuid) -> Result<()> {
        let tx = self.db.begin_write().map_err(SessionStoreError::backend)?;
        {
            let mut table = tx.open_table(SESSIONS_TABLE).map_err(SessionStoreError::backend)?;
            table
                .remove(id.to_string().as_str())
                .map_err(SessionStoreError::backend)?;
        }
        tx.commit().map_err(SessionStoreError::backend)?;
        self.cache.lock().unwrap().pop(&id);
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<Session>> {
        let tx = self.db.begin_read().map_err(SessionStoreError::backend)?;
        let table = tx.open_table(SESSIONS_TABLE).map_err(SessionStoreError::backend)?;
        let mut out = Vec::with_capacity(table.len().map_err(SessionStoreError::backend)? as usize);
        for row in table.iter().map_err(SessionStoreError::backend)? {
            let (_, value) = row.map_err(SessionStoreError::backend)?;
            out.push(serde_json::from_slice(value.value())?);
        }
        Ok(out)
    }

    pub fn find_by_bot_chat(&self, platform: &str, chat_id: &str) -> Result<Option<Session>> {
        Ok(self.list()?.into_iter().find(|s| {
            s.linked_bot
                .as_ref()
                .is_some_and(|b| b.platform == platform && b.chat_id == chat_id)
        }))
    }

    pub fn insert_pairing_request(&self, request: &PairingRequest) -> Result<()> {
        let bytes = serde_json::to_vec(request)?;
        let tx = self.db.begin_write().map_err(SessionStoreError::backend)?;
        {
            let mut table = tx.open_table(PAIRING_TABLE).map_err(SessionStoreError::backend)?;
            table
                .insert(request.id.to_string().as_str(), bytes.as_slice())
                .map_err(SessionStoreError::backend)?;
        }
        tx.commit().map_err(SessionStoreError::backend)?;
        Ok(())
    }

    pub fn get_pairing_request(&self, id: Uuid) -> Result<PairingRequest> {
        let tx = self.db.begin_read().map_err(SessionStoreError::backend)?;
        let table = tx.open_table(PAIRING_TABLE).map_err(SessionStoreError::backend)?;
        let row = table
            .get(id.to_string().as_str())
            .map_err(SessionStoreError::backend)?
            .ok_or(SessionStoreError::PairingNotFound(id))?;
        Ok(serde_json::from_slice(row.value())?)
    }

    pub fn update_pairing_request(
        &self,
        id: Uuid,
        mutate: impl FnOnce(&mut PairingRequest),
    ) -> Result<PairingRequest> {
        let mut request = self.get_pairing_request(id)?;
        mutate(&mut request);
        self.insert_pairing_request(&request)?;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SessionSource;

    fn temp_store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path().join("sessions.db"), 8).unwrap();
        (dir, store)
    }

    #[test]
    fn insert_then_get_round_trips() {
        let (_dir, store) = temp_store();
        let session = Session::new(SessionSource::Web, "chat");
        store.insert(&session).unwrap();

        let loaded = store.get(session.id).unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.module, "chat");
    }

    #[test]
    fn get_missing_session_is_not_found() {
        let (_dir, store) = temp_store();
        let err = store.get(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, SessionStoreError::NotFound(_)));
    }

    #[test]
    fn archive_unarchive_round_trip_is_idempotent() {
        let (_dir, store) = temp_store();
        let session = Session::new(SessionSource::Cli, "chat");
        store.insert(&session).unwrap();

        assert!(!store.get(session.id).unwrap().archived);
        store.archive(session.id).unwrap();
        assert!(store.get(session.id).unwrap().archived);
        // second archive on an already-archived session is a no-op
        store.archive(session.id).unwrap();
        assert!(store.get(session.id).unwrap().archived);
        store.unarchive(session.id).unwrap();
        assert!(!store.get(session.id).unwrap().archived);
    }

    #[test]
    fn touch_increments_message_count_and_persists() {
        let (_dir, store) = temp_store();
        let session = Session::new(SessionSource::Web, "chat");
        store.insert(&session).unwrap();

        store.update(session.id, |s| s.touch()).unwrap();
        let loaded = store.get(session.id).unwrap();
        assert_eq!(loaded.message_count, 1);
    }

    #[test]
    fn find_by_bot_chat_matches_linked_sessions() {
        let (_dir, store) = temp_store();
        let mut session = Session::new(SessionSource::Telegram, "chat");
        session.linked_bot = Some(crate::model::LinkedBotChat {
            platform: "telegram".to_string(),
            chat_id: "42".to_string(),
            chat_type: crate::model::ChatType::Dm,
        });
        store.insert(&session).unwrap();

        let found = store.find_by_bot_chat("telegram", "42").unwrap();
        assert_eq!(found.unwrap().id, session.id);
        assert!(store.find_by_bot_chat("telegram", "99").unwrap().is_none());
    }

    #[test]
    fn survives_reopen_against_the_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("sessions.db");
        let session_id = {
            let store = SessionStore::open(&db_path, 8).unwrap();
            let session = Session::new(SessionSource::Web, "chat");
            store.insert(&session).unwrap();
            session.id
        };

        let reopened = SessionStore::open(&db_path, 8).unwrap();
        assert_eq!(reopened.get(session_id).unwrap().id, session_id);
    }
}

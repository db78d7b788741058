use crate::store::error::{Result, StoreError};
use crate::store::traits::{CallLogEntry, CallLogStore};
use crate::types::CallType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

/// In-memory [`CallLogStore`] for tests and demos. Entries live in insertion
/// order; lookups scan from the back so the newest open call wins.
#[derive(Default)]
pub struct MemoryCallLogStore {
    entries: Mutex<Vec<CallLogEntry>>,
}

impl MemoryCallLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all entries, newest last.
    pub async fn entries(&self) -> Vec<CallLogEntry> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl CallLogStore for MemoryCallLogStore {
    async fn insert_call_start(
        &self,
        caller_id: &str,
        receiver_id: &str,
        call_type: CallType,
    ) -> Result<CallLogEntry> {
        let entry = CallLogEntry {
            id: Uuid::new_v4(),
            caller_id: caller_id.to_string(),
            receiver_id: receiver_id.to_string(),
            call_type,
            started_at: Utc::now(),
            ended_at: None,
        };
        self.entries.lock().await.push(entry.clone());
        Ok(entry)
    }

    async fn find_open_call(
        &self,
        caller_id: &str,
        receiver_id: &str,
    ) -> Result<Option<CallLogEntry>> {
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .rev()
            .find(|e| e.caller_id == caller_id && e.receiver_id == receiver_id && e.is_open())
            .cloned())
    }

    async fn close_call(&self, id: Uuid, ended_at: DateTime<Utc>) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(StoreError::NotFound(id))?;
        entry.ended_at = Some(ended_at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_creates_open_entry() {
        let store = MemoryCallLogStore::new();
        let entry = store
            .insert_call_start("alice", "bob", CallType::Voice)
            .await
            .unwrap();
        assert!(entry.is_open());
        assert_eq!(entry.caller_id, "alice");
        assert_eq!(entry.receiver_id, "bob");
    }

    #[tokio::test]
    async fn find_open_call_skips_closed_entries() {
        let store = MemoryCallLogStore::new();
        let first = store
            .insert_call_start("alice", "bob", CallType::Voice)
            .await
            .unwrap();
        store.close_call(first.id, Utc::now()).await.unwrap();
        assert!(store.find_open_call("alice", "bob").await.unwrap().is_none());

        let second = store
            .insert_call_start("alice", "bob", CallType::Video)
            .await
            .unwrap();
        let found = store
            .find_open_call("alice", "bob")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, second.id);
    }

    #[tokio::test]
    async fn find_open_call_matches_direction() {
        let store = MemoryCallLogStore::new();
        store
            .insert_call_start("alice", "bob", CallType::Voice)
            .await
            .unwrap();
        assert!(store.find_open_call("bob", "alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn close_unknown_entry_is_an_error() {
        let store = MemoryCallLogStore::new();
        let err = store.close_call(Uuid::new_v4(), Utc::now()).await;
        assert!(matches!(err, Err(StoreError::NotFound(_))));
    }
}

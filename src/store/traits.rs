use crate::store::error::Result;
use crate::types::{CallType, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One row of call history. A call is open while `ended_at` is `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallLogEntry {
    pub id: Uuid,
    pub caller_id: UserId,
    pub receiver_id: UserId,
    pub call_type: CallType,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl CallLogEntry {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Persistence for call history.
///
/// The caller inserts a row when it starts dialing; whichever side hangs up
/// first closes the row. Implementations must be safe to share across tasks.
#[async_trait]
pub trait CallLogStore: Send + Sync {
    /// Inserts an open entry for a call the local user is placing.
    async fn insert_call_start(
        &self,
        caller_id: &str,
        receiver_id: &str,
        call_type: CallType,
    ) -> Result<CallLogEntry>;

    /// Finds the most recent open entry for this caller/receiver pair, if any.
    async fn find_open_call(
        &self,
        caller_id: &str,
        receiver_id: &str,
    ) -> Result<Option<CallLogEntry>>;

    /// Stamps `ended_at` on the given entry.
    async fn close_call(&self, id: Uuid, ended_at: DateTime<Utc>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_serializes_with_wire_field_names() {
        let entry = CallLogEntry {
            id: Uuid::new_v4(),
            caller_id: "alice".to_string(),
            receiver_id: "bob".to_string(),
            call_type: CallType::Video,
            started_at: Utc::now(),
            ended_at: None,
        };

        let encoded = serde_json::to_value(&entry).unwrap();
        assert_eq!(encoded["id"], entry.id.to_string());
        assert_eq!(encoded["caller_id"], "alice");
        assert_eq!(encoded["call_type"], "video");
        assert!(encoded["ended_at"].is_null());

        let decoded: CallLogEntry = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded.id, entry.id);
        assert!(decoded.is_open());
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    session::{DiagnosisResult, Turn},
};

/// One durable row: a finished consultation with its full dialogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub user_id: i64,
    pub session_id: String,
    pub result: DiagnosisResult,
    pub dialogue: Vec<Turn>,
    pub created_at: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn new(
        user_id: i64,
        session_id: impl Into<String>,
        result: DiagnosisResult,
        dialogue: Vec<Turn>,
    ) -> Self {
        Self {
            user_id,
            session_id: session_id.into(),
            result,
            dialogue,
            created_at: Utc::now(),
        }
    }
}

/// Durable persistence of completed diagnoses.
///
/// The pipeline calls `record` at most once per session and only for
/// non-degraded results; a failure here is logged and swallowed upstream so
/// the session-store view of the consultation is unaffected.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn record(&self, record: HistoryRecord) -> Result<()>;

    /// All records for a user, newest first.
    async fn list_for_user(&self, user_id: i64) -> Result<Vec<HistoryRecord>>;
}

/// In-memory implementation of [`HistoryStore`], used in tests and
/// single-process deployments without a database.
pub struct InMemoryHistoryStore {
    records: Arc<DashMap<i64, Vec<HistoryRecord>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
        }
    }
}

impl Default for InMemoryHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn record(&self, record: HistoryRecord) -> Result<()> {
        self.records
            .entry(record.user_id)
            .or_default()
            .push(record);
        Ok(())
    }

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<HistoryRecord>> {
        let mut rows = self
            .records
            .get(&user_id)
            .map(|entry| entry.clone())
            .unwrap_or_default();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }
}

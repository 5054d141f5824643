//! ResultStore — append-only audit log of processing outcomes.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::store::credentials::parse_datetime;
use crate::store::db::Database;

/// Outcome of one processing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStatus {
    Success,
    Error,
}

impl ResultStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultStatus::Success => "success",
            ResultStatus::Error => "error",
        }
    }
}

/// One row of the audit log.
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub message_id: String,
    pub chat_id: String,
    pub content: String,
    pub sender_id: String,
    pub real_id: String,
    pub ai_response: String,
    pub status: ResultStatus,
    pub error_message: String,
    /// Ids of sink records created from this message.
    pub created_ids: Vec<String>,
    pub processed_at: DateTime<Utc>,
}

/// Aggregate counters over the audit log.
#[derive(Debug, Clone, Copy)]
pub struct ProcessingStats {
    pub total: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub listings_created: i64,
}

/// Persistent result storage.
pub struct ResultStore {
    db: Arc<Database>,
}

impl ResultStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append one result. Never updated afterwards.
    pub async fn insert(&self, result: &ProcessingResult) -> Result<(), DatabaseError> {
        let created_ids = serde_json::to_string(&result.created_ids)
            .map_err(|e| DatabaseError::Query(format!("Failed to encode created ids: {e}")))?;

        self.db
            .conn()
            .execute(
                "INSERT INTO processing_results
                     (message_id, chat_id, content, sender_id, real_id, ai_response,
                      status, error_message, created_ids, processed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                libsql::params![
                    result.message_id.as_str(),
                    result.chat_id.as_str(),
                    result.content.as_str(),
                    result.sender_id.as_str(),
                    result.real_id.as_str(),
                    result.ai_response.as_str(),
                    result.status.as_str(),
                    result.error_message.as_str(),
                    created_ids,
                    result.processed_at.to_rfc3339()
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    /// Most recent results, newest first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<ProcessingResult>, DatabaseError> {
        self.query_results(
            "SELECT message_id, chat_id, content, sender_id, real_id, ai_response,
                    status, error_message, created_ids, processed_at
             FROM processing_results
             ORDER BY processed_at DESC, id DESC
             LIMIT ?1",
            limit,
        )
        .await
    }

    /// Most recent failures, newest first.
    pub async fn errors(&self, limit: usize) -> Result<Vec<ProcessingResult>, DatabaseError> {
        self.query_results(
            "SELECT message_id, chat_id, content, sender_id, real_id, ai_response,
                    status, error_message, created_ids, processed_at
             FROM processing_results
             WHERE status = 'error'
             ORDER BY processed_at DESC, id DESC
             LIMIT ?1",
            limit,
        )
        .await
    }

    /// Counters for the operator dashboard.
    pub async fn stats(&self) -> Result<ProcessingStats, DatabaseError> {
        let mut rows = self
            .db
            .conn()
            .query(
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN status = 'error' THEN 1 ELSE 0 END), 0)
                 FROM processing_results",
                (),
            )
            .await
            .map_err(query_err)?;

        let (total, succeeded, failed) = match rows.next().await.map_err(query_err)? {
            Some(row) => (
                row.get(0).map_err(query_err)?,
                row.get(1).map_err(query_err)?,
                row.get(2).map_err(query_err)?,
            ),
            None => (0, 0, 0),
        };

        // created_ids is a JSON array per row; count elements across successes
        let mut rows = self
            .db
            .conn()
            .query(
                "SELECT created_ids FROM processing_results WHERE status = 'success'",
                (),
            )
            .await
            .map_err(query_err)?;
        let mut listings_created = 0i64;
        while let Some(row) = rows.next().await.map_err(query_err)? {
            let raw: String = row.get(0).map_err(query_err)?;
            if let Ok(ids) = serde_json::from_str::<Vec<String>>(&raw) {
                listings_created += ids.len() as i64;
            }
        }

        Ok(ProcessingStats {
            total,
            succeeded,
            failed,
            listings_created,
        })
    }

    async fn query_results(
        &self,
        sql: &str,
        limit: usize,
    ) -> Result<Vec<ProcessingResult>, DatabaseError> {
        let mut rows = self
            .db
            .conn()
            .query(sql, libsql::params![limit as i64])
            .await
            .map_err(query_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            let status: String = row.get(6).map_err(query_err)?;
            let created_raw: String = row.get(8).map_err(query_err)?;
            let processed_at: String = row.get(9).map_err(query_err)?;
            results.push(ProcessingResult {
                message_id: row.get(0).map_err(query_err)?,
                chat_id: row.get(1).map_err(query_err)?,
                content: row.get(2).map_err(query_err)?,
                sender_id: row.get(3).map_err(query_err)?,
                real_id: row.get(4).map_err(query_err)?,
                ai_response: row.get(5).map_err(query_err)?,
                status: if status == "success" {
                    ResultStatus::Success
                } else {
                    ResultStatus::Error
                },
                error_message: row.get(7).map_err(query_err)?,
                created_ids: serde_json::from_str(&created_raw).unwrap_or_default(),
                processed_at: parse_datetime(&processed_at),
            });
        }
        Ok(results)
    }
}

fn query_err(e: impl std::fmt::Display) -> DatabaseError {
    DatabaseError::Query(e.to_string())
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn result(message_id: &str, status: ResultStatus, created: &[&str]) -> ProcessingResult {
        ProcessingResult {
            message_id: message_id.to_string(),
            chat_id: "group-1".to_string(),
            content: "Cargo soja 30tn".to_string(),
            sender_id: "s1".to_string(),
            real_id: "+549341000".to_string(),
            ai_response: "[]".to_string(),
            status,
            error_message: if status == ResultStatus::Error {
                "sink rejected".to_string()
            } else {
                String::new()
            },
            created_ids: created.iter().map(|s| s.to_string()).collect(),
            processed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn stats_count_outcomes_and_listings() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let store = ResultStore::new(db);

        store.insert(&result("m1", ResultStatus::Success, &["a", "b"])).await.unwrap();
        store.insert(&result("m2", ResultStatus::Success, &[])).await.unwrap();
        store.insert(&result("m3", ResultStatus::Error, &[])).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.listings_created, 2);
    }

    #[tokio::test]
    async fn errors_returns_only_failures() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let store = ResultStore::new(db);

        store.insert(&result("m1", ResultStatus::Success, &["a"])).await.unwrap();
        store.insert(&result("m2", ResultStatus::Error, &[])).await.unwrap();

        let errors = store.errors(10).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message_id, "m2");
        assert_eq!(errors[0].status, ResultStatus::Error);

        let recent = store.recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].created_ids.len(), if recent[0].message_id == "m1" { 1 } else { 0 });
    }
}

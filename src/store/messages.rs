//! MessageStore — inbound messages, sender profiles, and trust scoring.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::error::DatabaseError;
use crate::store::credentials::parse_datetime;
use crate::store::db::Database;

/// A raw inbound chat message.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub has_media: bool,
}

/// A message eligible for AI processing, joined with the sender's resolved
/// real identity.
#[derive(Debug, Clone)]
pub struct ProcessableMessage {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub has_media: bool,
    pub real_id: String,
    pub attempts: i64,
}

/// A sender's resolved identity and trust state.
#[derive(Debug, Clone)]
pub struct SenderProfile {
    pub sender_id: String,
    pub real_id: String,
    pub confidence: i64,
    pub category: String,
}

/// Persistent message storage.
pub struct MessageStore {
    db: Arc<Database>,
}

impl MessageStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    // ── Ingestion ───────────────────────────────────────────────────

    /// Store an inbound message. Returns `false` (without storing) when the
    /// same sender already has a byte-identical message within 24 hours of
    /// this one's timestamp, in either direction.
    pub async fn store(&self, msg: &InboundMessage) -> Result<bool, DatabaseError> {
        let window_start = msg.timestamp - Duration::hours(24);
        let window_end = msg.timestamp + Duration::hours(24);

        let mut rows = self
            .db
            .conn()
            .query(
                "SELECT COUNT(*) FROM messages
                 WHERE sender_id = ?1 AND content = ?2
                   AND timestamp >= ?3 AND timestamp <= ?4",
                libsql::params![
                    msg.sender_id.as_str(),
                    msg.content.as_str(),
                    window_start.to_rfc3339(),
                    window_end.to_rfc3339()
                ],
            )
            .await
            .map_err(query_err)?;
        let duplicates: i64 = match rows.next().await.map_err(query_err)? {
            Some(row) => row.get(0).map_err(query_err)?,
            None => 0,
        };
        if duplicates > 0 {
            debug!(
                message_id = %msg.id,
                sender_id = %msg.sender_id,
                "Duplicate message within 24h window, discarded"
            );
            return Ok(false);
        }

        self.db
            .conn()
            .execute(
                "INSERT OR IGNORE INTO messages
                     (id, chat_id, sender_id, sender_name, content, timestamp, has_media)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                libsql::params![
                    msg.id.as_str(),
                    msg.chat_id.as_str(),
                    msg.sender_id.as_str(),
                    msg.sender_name.as_str(),
                    msg.content.as_str(),
                    msg.timestamp.to_rfc3339(),
                    msg.has_media as i64
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(true)
    }

    // ── Processing queue ────────────────────────────────────────────

    /// Messages eligible for processing, oldest first: unprocessed, non-empty
    /// content, a resolved real identity, fewer than `max_attempts` failed
    /// attempts, and at least `min_text_len` characters unless they carry
    /// media.
    pub async fn get_processable(
        &self,
        limit: usize,
        max_attempts: u32,
        min_text_len: usize,
    ) -> Result<Vec<ProcessableMessage>, DatabaseError> {
        let mut rows = self
            .db
            .conn()
            .query(
                "SELECT m.id, m.chat_id, m.sender_id, m.sender_name, m.content,
                        m.timestamp, m.has_media, sp.real_id, m.processing_attempts
                 FROM messages m
                 JOIN sender_profiles sp ON m.sender_id = sp.sender_id
                 WHERE m.processed = 0
                   AND m.content != ''
                   AND sp.real_id != ''
                   AND m.processing_attempts < ?1
                   AND (m.has_media = 1 OR LENGTH(m.content) >= ?2)
                 ORDER BY m.timestamp ASC
                 LIMIT ?3",
                libsql::params![max_attempts as i64, min_text_len as i64, limit as i64],
            )
            .await
            .map_err(query_err)?;

        let mut messages = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            let ts: String = row.get(5).map_err(query_err)?;
            messages.push(ProcessableMessage {
                id: row.get(0).map_err(query_err)?,
                chat_id: row.get(1).map_err(query_err)?,
                sender_id: row.get(2).map_err(query_err)?,
                sender_name: row.get(3).map_err(query_err)?,
                content: row.get(4).map_err(query_err)?,
                timestamp: parse_datetime(&ts),
                has_media: row.get::<i64>(6).map_err(query_err)? != 0,
                real_id: row.get(7).map_err(query_err)?,
                attempts: row.get(8).map_err(query_err)?,
            });
        }
        Ok(messages)
    }

    /// Fetch one message by id regardless of queue eligibility, as long as
    /// its sender has a resolved identity.
    pub async fn get_by_id(
        &self,
        message_id: &str,
        chat_id: &str,
    ) -> Result<ProcessableMessage, DatabaseError> {
        let mut rows = self
            .db
            .conn()
            .query(
                "SELECT m.id, m.chat_id, m.sender_id, m.sender_name, m.content,
                        m.timestamp, m.has_media, sp.real_id, m.processing_attempts
                 FROM messages m
                 JOIN sender_profiles sp ON m.sender_id = sp.sender_id
                 WHERE m.id = ?1 AND m.chat_id = ?2 AND sp.real_id != ''",
                libsql::params![message_id, chat_id],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => {
                let ts: String = row.get(5).map_err(query_err)?;
                Ok(ProcessableMessage {
                    id: row.get(0).map_err(query_err)?,
                    chat_id: row.get(1).map_err(query_err)?,
                    sender_id: row.get(2).map_err(query_err)?,
                    sender_name: row.get(3).map_err(query_err)?,
                    content: row.get(4).map_err(query_err)?,
                    timestamp: parse_datetime(&ts),
                    has_media: row.get::<i64>(6).map_err(query_err)? != 0,
                    real_id: row.get(7).map_err(query_err)?,
                    attempts: row.get(8).map_err(query_err)?,
                })
            }
            None => Err(DatabaseError::NotFound {
                entity: "message".into(),
                id: format!("{message_id}@{chat_id}"),
            }),
        }
    }

    /// Mark a message as processed, removing it from the queue permanently.
    pub async fn mark_processed(&self, message_id: &str, chat_id: &str) -> Result<(), DatabaseError> {
        self.db
            .conn()
            .execute(
                "UPDATE messages SET processed = 1 WHERE id = ?1 AND chat_id = ?2",
                libsql::params![message_id, chat_id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    /// Record a failed attempt and keep the error text for diagnosis.
    pub async fn increment_attempt(
        &self,
        message_id: &str,
        chat_id: &str,
        error: &str,
    ) -> Result<(), DatabaseError> {
        self.db
            .conn()
            .execute(
                "UPDATE messages
                 SET processing_attempts = processing_attempts + 1,
                     last_processing_error = ?1
                 WHERE id = ?2 AND chat_id = ?3",
                libsql::params![error, message_id, chat_id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    /// Operator action: put messages that exhausted their attempts back in
    /// the queue. Returns how many rows were reset.
    pub async fn reset_exhausted_attempts(&self, max_attempts: u32) -> Result<u64, DatabaseError> {
        let changed = self
            .db
            .conn()
            .execute(
                "UPDATE messages
                 SET processing_attempts = 0, last_processing_error = NULL
                 WHERE processed = 0 AND processing_attempts >= ?1",
                libsql::params![max_attempts as i64],
            )
            .await
            .map_err(query_err)?;
        Ok(changed)
    }

    // ── Sender profiles & trust ─────────────────────────────────────

    /// Associate a chat-level sender id with its resolved real identity.
    pub async fn associate_sender(
        &self,
        sender_id: &str,
        real_id: &str,
    ) -> Result<(), DatabaseError> {
        self.db
            .conn()
            .execute(
                "INSERT INTO sender_profiles (sender_id, real_id, updated_at)
                 VALUES (?1, ?2, datetime('now'))
                 ON CONFLICT(sender_id) DO UPDATE SET
                     real_id = excluded.real_id,
                     updated_at = datetime('now')",
                libsql::params![sender_id, real_id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    pub async fn get_profile(&self, sender_id: &str) -> Result<SenderProfile, DatabaseError> {
        let mut rows = self
            .db
            .conn()
            .query(
                "SELECT sender_id, real_id, confidence, category
                 FROM sender_profiles WHERE sender_id = ?1",
                libsql::params![sender_id],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(SenderProfile {
                sender_id: row.get(0).map_err(query_err)?,
                real_id: row.get(1).map_err(query_err)?,
                confidence: row.get(2).map_err(query_err)?,
                category: row.get(3).map_err(query_err)?,
            }),
            None => Err(DatabaseError::NotFound {
                entity: "sender_profile".into(),
                id: sender_id.to_string(),
            }),
        }
    }

    /// Shift a sender's trust score: +1 when they posted a real listing, -1
    /// when their message produced nothing. The category always follows the
    /// sign of the running score. Keyed to the resolved real identity, so
    /// every chat-level sender id sharing it carries the same score.
    pub async fn update_trust(
        &self,
        real_id: &str,
        produced_listing: bool,
    ) -> Result<(), DatabaseError> {
        let delta: i64 = if produced_listing { 1 } else { -1 };
        self.db
            .conn()
            .execute(
                "UPDATE sender_profiles
                 SET confidence = confidence + ?1,
                     category = CASE
                         WHEN confidence + ?1 > 0 THEN 'loader'
                         WHEN confidence + ?1 < 0 THEN 'camionero'
                         ELSE 'desconocido'
                     END,
                     updated_at = datetime('now')
                 WHERE real_id = ?2",
                libsql::params![delta, real_id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    // ── Stats ───────────────────────────────────────────────────────

    /// (total, processed, unprocessed) message counts.
    pub async fn message_stats(&self) -> Result<(i64, i64, i64), DatabaseError> {
        let mut rows = self
            .db
            .conn()
            .query(
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN processed = 1 THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN processed = 0 THEN 1 ELSE 0 END), 0)
                 FROM messages",
                (),
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok((
                row.get(0).map_err(query_err)?,
                row.get(1).map_err(query_err)?,
                row.get(2).map_err(query_err)?,
            )),
            None => Ok((0, 0, 0)),
        }
    }
}

fn query_err(e: impl std::fmt::Display) -> DatabaseError {
    DatabaseError::Query(e.to_string())
}

// ── Tests ───────────────────────────────────────────────────────────

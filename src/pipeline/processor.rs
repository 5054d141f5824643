//! Per-message orchestration: extract, normalize, validate, persist, score.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::error::{DatabaseError, PipelineError};
use crate::pipeline::extract::Extractor;
use crate::pipeline::normalize::{GeofenceRules, normalize, validate};
use crate::sink::ListingSink;
use crate::store::{
    MessageStore, ProcessableMessage, ProcessingResult, ProcessingStats, ResultStatus,
    ResultStore,
};

/// What one message turned into.
enum Outcome {
    /// Listings created in the sink.
    Created { ai_response: String, ids: Vec<String> },
    /// Valid response with no listings in it.
    Empty { ai_response: String },
    /// Any failure; the attempt counter absorbs it.
    Failed { ai_response: String, error: PipelineError },
}

/// Aggregate view for the operator.
#[derive(Debug, Clone, Copy)]
pub struct PipelineStats {
    pub total_messages: i64,
    pub processed_messages: i64,
    pub unprocessed_messages: i64,
    pub results: ProcessingStats,
}

pub struct MessageProcessor {
    extractor: Extractor,
    messages: Arc<MessageStore>,
    results: Arc<ResultStore>,
    sink: Arc<dyn ListingSink>,
    geofence: GeofenceRules,
    config: PipelineConfig,
}

impl MessageProcessor {
    pub fn new(
        extractor: Extractor,
        messages: Arc<MessageStore>,
        results: Arc<ResultStore>,
        sink: Arc<dyn ListingSink>,
        geofence: GeofenceRules,
        config: PipelineConfig,
    ) -> Self {
        Self {
            extractor,
            messages,
            results,
            sink,
            geofence,
            config,
        }
    }

    /// Process one message end to end. The outcome is always recorded: the
    /// audit row is written, and the message is either marked processed or
    /// has its attempt counter bumped.
    pub async fn process(
        &self,
        msg: &ProcessableMessage,
    ) -> Result<ProcessingResult, DatabaseError> {
        info!(message_id = %msg.id, sender = %msg.sender_id, "Processing message");

        let result = match self.run(msg).await {
            Outcome::Created { ai_response, ids } => {
                info!(
                    message_id = %msg.id,
                    listings = ids.len(),
                    "Message produced listings"
                );
                self.messages.update_trust(&msg.real_id, true).await?;
                self.build_result(msg, ai_response, ResultStatus::Success, String::new(), ids)
            }
            Outcome::Empty { ai_response } => {
                info!(message_id = %msg.id, "Message carries no listing information");
                self.messages.update_trust(&msg.real_id, false).await?;
                self.build_result(
                    msg,
                    ai_response,
                    ResultStatus::Success,
                    "no listing information in message (empty array)".to_string(),
                    Vec::new(),
                )
            }
            Outcome::Failed { ai_response, error } => {
                error!(message_id = %msg.id, error = %error, "Message processing failed");
                self.build_result(
                    msg,
                    ai_response,
                    ResultStatus::Error,
                    error.to_string(),
                    Vec::new(),
                )
            }
        };

        self.results.insert(&result).await?;
        match result.status {
            ResultStatus::Success => {
                self.messages.mark_processed(&msg.id, &msg.chat_id).await?;
            }
            ResultStatus::Error => {
                self.messages
                    .increment_attempt(&msg.id, &msg.chat_id, &result.error_message)
                    .await?;
                warn!(
                    message_id = %msg.id,
                    attempt = msg.attempts + 1,
                    "Attempt recorded for later retry"
                );
            }
        }

        Ok(result)
    }

    /// Reprocess one specific message regardless of queue eligibility.
    pub async fn process_single(
        &self,
        message_id: &str,
        chat_id: &str,
    ) -> Result<ProcessingResult, DatabaseError> {
        let msg = self.messages.get_by_id(message_id, chat_id).await?;
        self.process(&msg).await
    }

    pub async fn stats(&self) -> Result<PipelineStats, DatabaseError> {
        let (total, processed, unprocessed) = self.messages.message_stats().await?;
        let results = self.results.stats().await?;
        Ok(PipelineStats {
            total_messages: total,
            processed_messages: processed,
            unprocessed_messages: unprocessed,
            results,
        })
    }

    async fn run(&self, msg: &ProcessableMessage) -> Outcome {
        let raw = match self
            .extractor
            .extract(&self.config.system_prompt, &msg.content, &msg.real_id)
            .await
        {
            Ok(raw) => raw,
            Err(error) => {
                return Outcome::Failed {
                    ai_response: String::new(),
                    error,
                };
            }
        };

        let listings = match normalize(&raw) {
            Ok(listings) => listings,
            Err(error) => {
                return Outcome::Failed {
                    ai_response: raw,
                    error: error.into(),
                };
            }
        };
        let ai_response = serde_json::to_string(&listings).unwrap_or_default();

        if listings.is_empty() {
            return Outcome::Empty { ai_response };
        }

        if let Err(error) = validate(&listings, &self.geofence) {
            return Outcome::Failed {
                ai_response,
                error: error.into(),
            };
        }

        match self.sink.create_listings(&listings, &msg.real_id).await {
            Ok(ids) => Outcome::Created { ai_response, ids },
            Err(error) => Outcome::Failed {
                ai_response,
                error: error.into(),
            },
        }
    }

    fn build_result(
        &self,
        msg: &ProcessableMessage,
        ai_response: String,
        status: ResultStatus,
        error_message: String,
        created_ids: Vec<String>,
    ) -> ProcessingResult {
        ProcessingResult {
            message_id: msg.id.clone(),
            chat_id: msg.chat_id.clone(),
            content: msg.content.clone(),
            sender_id: msg.sender_id.clone(),
            real_id: msg.real_id.clone(),
            ai_response,
            status,
            error_message,
            created_ids,
            processed_at: Utc::now(),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

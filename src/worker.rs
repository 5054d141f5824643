//! Batch worker — drains the processable queue on an interval.
//!
//! Each batch spawns one task per message on a `JoinSet`, staggered so the
//! vendor does not see a burst of simultaneous requests. Message tasks are
//! independent: a panic or failure in one never touches the others.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::DatabaseError;
use crate::pipeline::MessageProcessor;
use crate::store::{MessageStore, ResultStatus};

pub struct Worker {
    processor: Arc<MessageProcessor>,
    messages: Arc<MessageStore>,
    config: PipelineConfig,
}

/// What one batch did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub fetched: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl Worker {
    pub fn new(
        processor: Arc<MessageProcessor>,
        messages: Arc<MessageStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            processor,
            messages,
            config,
        }
    }

    /// Fetch one batch and process every message concurrently.
    pub async fn run_batch(&self) -> Result<BatchReport, DatabaseError> {
        let batch = self
            .messages
            .get_processable(
                self.config.batch_size,
                self.config.max_attempts,
                self.config.min_text_len,
            )
            .await?;

        if batch.is_empty() {
            debug!("No processable messages");
            return Ok(BatchReport::default());
        }

        let batch_id = Uuid::new_v4();
        info!(batch_id = %batch_id, count = batch.len(), "Processing batch");
        let mut report = BatchReport {
            fetched: batch.len(),
            ..BatchReport::default()
        };

        let mut tasks = JoinSet::new();
        for msg in batch {
            let processor = self.processor.clone();
            tasks.spawn(async move { processor.process(&msg).await });
            tokio::time::sleep(self.config.message_stagger).await;
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(result)) => match result.status {
                    ResultStatus::Success => report.succeeded += 1,
                    ResultStatus::Error => report.failed += 1,
                },
                Ok(Err(e)) => {
                    error!(error = %e, "Message task hit a database error");
                    report.failed += 1;
                }
                Err(e) => {
                    error!(error = %e, "Message task aborted");
                    report.failed += 1;
                }
            }
        }

        info!(
            batch_id = %batch_id,
            fetched = report.fetched,
            succeeded = report.succeeded,
            failed = report.failed,
            "Batch complete"
        );
        Ok(report)
    }

    /// Poll the queue forever. Database errors are logged and the loop keeps
    /// going; only cancellation stops it.
    pub async fn run(&self, poll_interval: Duration) {
        info!(interval_secs = poll_interval.as_secs(), "Worker started");
        loop {
            if let Err(e) = self.run_batch().await {
                error!(error = %e, "Batch failed");
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

use std::collections::VecDeque;

use anyhow::Context;
use async_trait::async_trait;
use aws_config::{defaults, BehaviorVersion};
use aws_sdk_sqs::{config::Region, Client};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::{
    db::DbPool,
    services::notifications::{parse_notification, process_notification, NotificationKind},
};

const MAX_BATCH: i32 = 10;
const WAIT_TIME_SECONDS: i32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub body: String,
    pub receipt_handle: String,
}

#[async_trait]
pub trait NotificationQueue: Send + Sync {
    async fn receive(&self, max: i32) -> anyhow::Result<Vec<QueueMessage>>;
    async fn delete(&self, receipt_handle: &str) -> anyhow::Result<()>;
}

pub struct SqsQueue {
    client: Client,
    queue_url: String,
}

impl SqsQueue {
    pub async fn new(region: &str, queue_url: &str) -> Self {
        let shared = defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        Self {
            client: Client::new(&shared),
            queue_url: queue_url.to_string(),
        }
    }
}

#[async_trait]
impl NotificationQueue for SqsQueue {
    async fn receive(&self, max: i32) -> anyhow::Result<Vec<QueueMessage>> {
        let response = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max)
            .wait_time_seconds(WAIT_TIME_SECONDS)
            .send()
            .await
            .context("sqs receive_message")?;
        Ok(response
            .messages()
            .iter()
            .map(|message| QueueMessage {
                body: message.body().unwrap_or_default().to_string(),
                receipt_handle: message.receipt_handle().unwrap_or_default().to_string(),
            })
            .collect())
    }

    async fn delete(&self, receipt_handle: &str) -> anyhow::Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .context("sqs delete_message")?;
        Ok(())
    }
}

/// Queue held in memory. Deleted handles are kept for inspection.
#[derive(Default)]
pub struct MemoryQueue {
    pending: Mutex<VecDeque<QueueMessage>>,
    deleted: Mutex<Vec<String>>,
}

impl MemoryQueue {
    pub fn with_bodies<I, S>(bodies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pending = bodies
            .into_iter()
            .enumerate()
            .map(|(index, body)| QueueMessage {
                body: body.into(),
                receipt_handle: format!("receipt-{index}"),
            })
            .collect();
        Self {
            pending: Mutex::new(pending),
            deleted: Mutex::new(Vec::new()),
        }
    }

    pub async fn deleted(&self) -> Vec<String> {
        self.deleted.lock().await.clone()
    }
}

#[async_trait]
impl NotificationQueue for MemoryQueue {
    async fn receive(&self, max: i32) -> anyhow::Result<Vec<QueueMessage>> {
        let mut pending = self.pending.lock().await;
        let take = usize::try_from(max).unwrap_or(0).min(pending.len());
        Ok(pending.drain(..take).collect())
    }

    async fn delete(&self, receipt_handle: &str) -> anyhow::Result<()> {
        self.deleted.lock().await.push(receipt_handle.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub processed: usize,
    pub errors: usize,
    pub lines: Vec<String>,
}

impl DrainReport {
    pub fn summary(&self) -> String {
        format!("Processed {} messages, {} errors", self.processed, self.errors)
    }
}

/// Polls `queue` until `max_messages` have been handled or it runs dry.
/// Failed messages stay on the queue and count toward the limit.
pub async fn drain_queue(
    db: &DbPool,
    queue: &dyn NotificationQueue,
    kind: NotificationKind,
    max_messages: usize,
    dry_run: bool,
) -> anyhow::Result<DrainReport> {
    let mut report = DrainReport::default();
    while report.processed + report.errors < max_messages {
        let remaining = max_messages - report.processed - report.errors;
        let batch = i32::try_from(remaining).unwrap_or(MAX_BATCH).min(MAX_BATCH);
        let messages = queue.receive(batch).await?;
        if messages.is_empty() {
            report.lines.push("No more messages to process.".into());
            break;
        }
        for message in messages {
            let outcome = match parse_notification(&message.body) {
                Ok(notification) => process_notification(db, kind, &notification, dry_run).await,
                Err(err) => Err(err),
            };
            match outcome {
                Ok(processed) => {
                    report.processed += 1;
                    report.lines.extend(processed.lines);
                    if !dry_run {
                        queue.delete(&message.receipt_handle).await?;
                    }
                }
                Err(err) => {
                    report.errors += 1;
                    error!(%kind, "error processing message: {err}");
                    report.lines.push(format!("Error processing message: {err}"));
                }
            }
        }
    }
    info!(%kind, processed = report.processed, errors = report.errors, "queue drained");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_queue_hands_out_batches() {
        let queue = MemoryQueue::with_bodies(["a", "b", "c"]);
        let first = queue.receive(2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].receipt_handle, "receipt-0");
        let second = queue.receive(10).await.unwrap();
        assert_eq!(second.len(), 1);
        assert!(queue.receive(10).await.unwrap().is_empty());
        queue.delete("receipt-0").await.unwrap();
        assert_eq!(queue.deleted().await, vec!["receipt-0"]);
    }

    #[test]
    fn summary_line() {
        let report = DrainReport {
            processed: 3,
            errors: 1,
            lines: Vec::new(),
        };
        assert_eq!(report.summary(), "Processed 3 messages, 1 errors");
    }
}

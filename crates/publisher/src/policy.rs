//! Publish policy: decides where an inbound request lands in the broker.
//!
//! Three partitioning strategies are supported:
//! - `AutoAssign`: no key, no partition; the broker picks
//! - `KeyHashed`: the message key is attached and the broker's hash partitioner decides
//! - `FixedPartition`: every message goes to the operator-configured partition
//!
//! Publishing waits for the delivery report and never retries; retrying is
//! the caller's decision.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use relay_common::config::AppConfig;
use relay_common::error::AppError;
use relay_common::types::{Message, PublishOutcome};

use crate::producer::{BrokerProducer, OutboundRecord, ProduceError};

/// Header carrying the caller's correlation id.
pub const REQUEST_ID_HEADER: &str = "request_id";

/// Partitioning strategy for published messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionMode {
    AutoAssign,
    KeyHashed,
    FixedPartition,
}

impl PartitionMode {
    /// Map the `KAFKA_PUB_MESSAGE_TYPE` selector: "0" auto-assign, "1"
    /// key-hashed, anything else fixed-partition.
    pub fn from_selector(selector: &str) -> Self {
        match selector.trim() {
            "0" => PartitionMode::AutoAssign,
            "1" => PartitionMode::KeyHashed,
            _ => PartitionMode::FixedPartition,
        }
    }
}

impl std::fmt::Display for PartitionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionMode::AutoAssign => write!(f, "auto_assign"),
            PartitionMode::KeyHashed => write!(f, "key_hashed"),
            PartitionMode::FixedPartition => write!(f, "fixed_partition"),
        }
    }
}

/// Routes messages into the broker according to the configured partition mode.
#[derive(Clone)]
pub struct PublishPolicy {
    producer: Arc<dyn BrokerProducer>,
    default_topic: String,
    mode: PartitionMode,
    fixed_partition: String,
}

impl PublishPolicy {
    pub fn new(
        producer: Arc<dyn BrokerProducer>,
        default_topic: String,
        mode: PartitionMode,
        fixed_partition: String,
    ) -> Self {
        Self {
            producer,
            default_topic,
            mode,
            fixed_partition,
        }
    }

    pub fn from_config(producer: Arc<dyn BrokerProducer>, config: &AppConfig) -> Self {
        let default_topic = config
            .topics()
            .into_iter()
            .next()
            .unwrap_or_else(|| config.kafka_topic.clone());

        Self::new(
            producer,
            default_topic,
            PartitionMode::from_selector(&config.kafka_pub_message_type),
            config.pub_partition.clone(),
        )
    }

    pub fn mode(&self) -> PartitionMode {
        self.mode
    }

    /// Publish with the configured mode and partition.
    pub async fn publish(&self, message: &Message) -> Result<PublishOutcome, AppError> {
        self.publish_with(message, self.mode, Some(&self.fixed_partition))
            .await
    }

    /// Publish one message and wait for the broker's acknowledgement.
    ///
    /// Configuration problems are reported before the broker is contacted.
    /// A failed delivery report is a `PublishOutcome::Failed`; a record the
    /// client refuses outright is an error.
    pub async fn publish_with(
        &self,
        message: &Message,
        mode: PartitionMode,
        fixed_partition: Option<&str>,
    ) -> Result<PublishOutcome, AppError> {
        let record = self.build_record(message, mode, fixed_partition)?;
        let topic = record.topic.clone();

        match self.producer.send(record).await {
            Ok(report) => {
                tracing::info!(
                    request_id = %message.request_id,
                    topic = %report.topic,
                    partition = report.partition,
                    offset = report.offset,
                    mode = %mode,
                    "Message published"
                );
                Ok(PublishOutcome::Delivered {
                    topic: report.topic,
                    partition: report.partition,
                    offset: report.offset,
                })
            }
            Err(ProduceError::Delivery(detail)) => {
                tracing::warn!(
                    request_id = %message.request_id,
                    topic = %topic,
                    error = %detail,
                    "Delivery report failed"
                );
                Ok(PublishOutcome::Failed {
                    error_detail: detail,
                })
            }
            Err(err @ ProduceError::Enqueue(_)) => {
                tracing::error!(
                    request_id = %message.request_id,
                    topic = %topic,
                    error = %err,
                    "Broker refused message"
                );
                Err(AppError::BrokerRuntime(err.to_string()))
            }
        }
    }

    /// Build the outbound record for `mode` without touching the broker.
    pub fn build_record(
        &self,
        message: &Message,
        mode: PartitionMode,
        fixed_partition: Option<&str>,
    ) -> Result<OutboundRecord, AppError> {
        let (key, partition) = match mode {
            PartitionMode::AutoAssign => (None, None),
            PartitionMode::KeyHashed => {
                if message.key.is_empty() {
                    return Err(AppError::Config(
                        "key-hashed partitioning requires a non-empty key".to_string(),
                    ));
                }
                (Some(message.key.as_bytes().to_vec()), None)
            }
            PartitionMode::FixedPartition => (None, Some(parse_partition(fixed_partition)?)),
        };

        let topic = if message.topic_name.is_empty() {
            self.default_topic.clone()
        } else {
            message.topic_name.clone()
        };

        Ok(OutboundRecord {
            topic,
            key,
            partition,
            payload: message.to_bytes()?,
            headers: vec![(
                REQUEST_ID_HEADER.to_string(),
                message.request_id.as_bytes().to_vec(),
            )],
        })
    }
}

/// Parse the configured partition index as a non-negative integer.
fn parse_partition(raw: Option<&str>) -> Result<i32, AppError> {
    let raw = raw.ok_or_else(|| {
        AppError::Config("fixed-partition mode requires a partition index".to_string())
    })?;

    raw.trim()
        .parse::<i32>()
        .ok()
        .filter(|p| *p >= 0)
        .ok_or_else(|| {
            AppError::Config(format!(
                "partition index '{}' is not a non-negative integer",
                raw
            ))
        })
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::{Message as _, Offset, TopicPartitionList};

use relay_common::error::{AppError, BrokerError};
use relay_common::kafka::create_client_config;
use relay_common::types::BrokerRecord;

/// How long startup waits for broker metadata before giving up.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Consume side of the broker, owned exclusively by one worker.
#[async_trait]
pub trait BrokerConsumer: Send + Sync {
    /// Join the consumer group for `topics`.
    fn subscribe(&self, topics: &[String]) -> Result<(), BrokerError>;

    /// Wait up to `timeout` for the next record. `Ok(None)` means nothing arrived.
    async fn poll(&self, timeout: Duration) -> Result<Option<BrokerRecord>, BrokerError>;

    /// Mark `record` as processed for its partition.
    async fn commit(&self, record: &BrokerRecord) -> Result<(), BrokerError>;

    /// Leave the consumer group and release the handle.
    fn close(self)
    where
        Self: Sized;
}

/// rdkafka-backed consumer with manual offset commits.
///
/// Configured with:
/// - `enable.auto.commit=false`: offsets are committed after each record resolves
/// - `auto.offset.reset=latest`: a new group starts at the end of the topic
/// - `session.timeout.ms=6000`
pub struct KafkaConsumer {
    consumer: Arc<StreamConsumer>,
}

impl KafkaConsumer {
    /// Create the consumer and verify that the cluster answers.
    ///
    /// Fails with `AppError::BrokerConnection` when no broker responds.
    pub async fn connect(brokers: &str, group_id: &str, client_id: &str) -> Result<Self, AppError> {
        let consumer: StreamConsumer = create_client_config(brokers)
            .set("group.id", group_id)
            .set("client.id", client_id)
            .set("session.timeout.ms", "6000")
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "latest")
            .create()
            .map_err(|e| AppError::BrokerConnection(format!("Failed to create consumer: {}", e)))?;
        let consumer = Arc::new(consumer);

        let probe = Arc::clone(&consumer);
        let metadata = tokio::task::spawn_blocking(move || {
            probe
                .fetch_metadata(None, CONNECT_TIMEOUT)
                .map(|m| m.brokers().len())
        })
        .await
        .map_err(|e| AppError::Internal(format!("Metadata probe panicked: {}", e)))?;

        let broker_count = metadata
            .map_err(|e| AppError::BrokerConnection(format!("Brokers unreachable: {}", e)))?;

        tracing::info!(brokers, group_id, client_id, broker_count, "Kafka consumer connected");

        Ok(Self { consumer })
    }
}

#[async_trait]
impl BrokerConsumer for KafkaConsumer {
    fn subscribe(&self, topics: &[String]) -> Result<(), BrokerError> {
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer.subscribe(&topics)?;
        tracing::info!(topics = ?topics, "Subscribed to topics");
        Ok(())
    }

    async fn poll(&self, timeout: Duration) -> Result<Option<BrokerRecord>, BrokerError> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(message)) => Ok(Some(BrokerRecord {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
                key: message.key().map(<[u8]>::to_vec),
                payload: message.payload().unwrap_or_default().to_vec(),
            })),
        }
    }

    async fn commit(&self, record: &BrokerRecord) -> Result<(), BrokerError> {
        // Kafka stores the offset of the next record to read.
        let mut offsets = TopicPartitionList::new();
        offsets.add_partition_offset(
            &record.topic,
            record.partition,
            Offset::Offset(record.offset + 1),
        )?;

        // A synchronous commit waits on the broker, so keep it off the runtime.
        let consumer = Arc::clone(&self.consumer);
        tokio::task::spawn_blocking(move || consumer.commit(&offsets, CommitMode::Sync))
            .await
            .map_err(|e| BrokerError::Commit(format!("commit task failed: {}", e)))??;
        Ok(())
    }

    fn close(self) {
        self.consumer.unsubscribe();
        tracing::info!("Kafka consumer closed");
    }
}

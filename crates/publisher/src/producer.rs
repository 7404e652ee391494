use std::time::Duration;

use async_trait::async_trait;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use thiserror::Error;

use relay_common::error::AppError;
use relay_common::kafka::create_client_config;

/// A record ready to be handed to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    pub topic: String,
    /// Attached only in key-hashed mode.
    pub key: Option<Vec<u8>>,
    /// `None` lets the broker choose.
    pub partition: Option<i32>,
    pub payload: Vec<u8>,
    pub headers: Vec<(String, Vec<u8>)>,
}

/// The broker's delivery acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProduceError {
    /// The client refused the record before it reached the broker.
    #[error("error while push message into kafka: {0}")]
    Enqueue(String),

    /// The delivery report came back with an error.
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Publish side of the broker.
#[async_trait]
pub trait BrokerProducer: Send + Sync {
    /// Send one record and wait for its delivery report.
    async fn send(&self, record: OutboundRecord) -> Result<DeliveryReport, ProduceError>;

    /// Wait for in-flight records before shutdown.
    async fn flush(&self, _timeout: Duration) -> Result<(), AppError> {
        Ok(())
    }
}

/// rdkafka-backed producer.
pub struct KafkaProducer {
    producer: FutureProducer,
    delivery_timeout: Duration,
}

impl KafkaProducer {
    /// Create a producer that waits up to `delivery_timeout` for each report.
    pub fn new(brokers: &str, delivery_timeout: Duration) -> Result<Self, AppError> {
        let producer: FutureProducer = create_client_config(brokers)
            .set("acks", "all")
            .set("message.timeout.ms", delivery_timeout.as_millis().to_string())
            .create()
            .map_err(|e| AppError::BrokerConnection(format!("Failed to create producer: {}", e)))?;

        tracing::info!(brokers, "Kafka producer created");

        Ok(Self {
            producer,
            delivery_timeout,
        })
    }
}

#[async_trait]
impl BrokerProducer for KafkaProducer {
    async fn send(&self, record: OutboundRecord) -> Result<DeliveryReport, ProduceError> {
        let mut headers = OwnedHeaders::new();
        for (key, value) in &record.headers {
            headers = headers.insert(Header {
                key: key.as_str(),
                value: Some(value.as_slice()),
            });
        }

        let mut future_record: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(&record.topic)
            .payload(record.payload.as_slice())
            .headers(headers);
        if let Some(key) = &record.key {
            future_record = future_record.key(key.as_slice());
        }
        if let Some(partition) = record.partition {
            future_record = future_record.partition(partition);
        }

        let delivery = self
            .producer
            .send_result(future_record)
            .map_err(|(e, _)| ProduceError::Enqueue(e.to_string()))?;

        match tokio::time::timeout(self.delivery_timeout, delivery).await {
            Ok(Ok(Ok((partition, offset)))) => Ok(DeliveryReport {
                topic: record.topic.clone(),
                partition,
                offset,
            }),
            Ok(Ok(Err((e, _)))) => Err(ProduceError::Delivery(e.to_string())),
            Ok(Err(_)) => Err(ProduceError::Delivery(
                "delivery report channel closed".to_string(),
            )),
            Err(_) => Err(ProduceError::Delivery(format!(
                "no delivery report within {}ms",
                self.delivery_timeout.as_millis()
            ))),
        }
    }

    async fn flush(&self, timeout: Duration) -> Result<(), AppError> {
        self.producer
            .flush(Timeout::After(timeout))
            .map_err(|e| AppError::BrokerRuntime(format!("Failed to flush producer: {}", e)))?;
        tracing::info!("Kafka producer flushed");
        Ok(())
    }
}

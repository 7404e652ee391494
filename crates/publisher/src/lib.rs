//! Producer side of the pipeline: partition selection and acknowledged publish.

pub mod policy;
pub mod producer;

pub use policy::{PartitionMode, PublishPolicy};
pub use producer::{BrokerProducer, DeliveryReport, KafkaProducer, OutboundRecord, ProduceError};

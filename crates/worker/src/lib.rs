//! Consume side of the relay: poll the broker, deliver downstream, commit.

pub mod consumer;
pub mod dispatcher;
pub mod worker;

pub use consumer::{BrokerConsumer, KafkaConsumer};
pub use worker::{ConsumerWorker, StopReason, WorkerReport, WorkerState};

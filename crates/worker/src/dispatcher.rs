//! Background delivery task fed by the poll loop.
//!
//! Records are taken off a bounded queue one at a time, so dispatch within a
//! worker stays sequential and resolutions come back in the order the records
//! were polled. The poll loop commits an offset only once its resolution has
//! been reported here.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use relay_common::types::{BrokerRecord, Message, Resolution};
use relay_notifier::client::DeliveryClient;

/// A record together with how its delivery ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub record: BrokerRecord,
    pub resolution: Resolution,
}

pub struct Dispatcher {
    client: Arc<dyn DeliveryClient>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(client: Arc<dyn DeliveryClient>, shutdown: CancellationToken) -> Self {
        Self { client, shutdown }
    }

    /// Take records from `queue` until it closes or shutdown is requested,
    /// reporting each resolution on `resolved`.
    ///
    /// A record already being delivered is finished before stopping; records
    /// still queued at shutdown are left for the broker to redeliver.
    pub async fn run(
        self,
        mut queue: mpsc::Receiver<BrokerRecord>,
        resolved: mpsc::UnboundedSender<Dispatched>,
    ) {
        loop {
            let record = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                next = queue.recv() => match next {
                    Some(record) => record,
                    None => break,
                },
            };

            let span = tracing::info_span!(
                "dispatch",
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                request_id = tracing::field::Empty,
            );
            let resolution = self.resolve(&record).instrument(span).await;

            if resolved.send(Dispatched { record, resolution }).is_err() {
                break;
            }
        }

        tracing::debug!("Dispatcher stopped");
    }

    /// Drive one record to a resolution: deliver, then retry, then dead-letter.
    pub async fn resolve(&self, record: &BrokerRecord) -> Resolution {
        let message = match Message::from_bytes(&record.payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Undecodable message, dead-lettering without delivery");
                return self.dead_letter_raw(record).await;
            }
        };
        tracing::Span::current().record("request_id", message.request_id.as_str());

        if self.client.deliver(&message).await {
            return Resolution::Delivered;
        }

        if self.client.retry_delivery(&message, &self.shutdown).await {
            return Resolution::Delivered;
        }

        match self.client.persist_failed(&message, &record.payload).await {
            Ok(()) => Resolution::DeadLettered,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    payload = %record.payload_lossy(),
                    "Failed to persist undeliverable message"
                );
                Resolution::Lost
            }
        }
    }

    async fn dead_letter_raw(&self, record: &BrokerRecord) -> Resolution {
        match self.client.dead_letters().append(&record.payload).await {
            Ok(()) => Resolution::DeadLettered,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    payload = %record.payload_lossy(),
                    "Failed to persist undecodable message"
                );
                Resolution::Lost
            }
        }
    }
}

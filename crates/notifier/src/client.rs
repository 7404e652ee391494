//! Delivery capability shared by every downstream client.
//!
//! A client only has to say how a single attempt is made. Retrying with a
//! fixed delay and dead-lettering are provided on top of that.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use relay_common::error::AppError;
use relay_common::types::Message;

use crate::dead_letter::DeadLetterStore;

/// How many attempts `retry_delivery` makes and how long it waits between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
        }
    }
}

/// A downstream notification client.
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    /// Make one delivery attempt. `true` means the downstream accepted it.
    async fn deliver(&self, message: &Message) -> bool;

    fn retry_policy(&self) -> RetryPolicy;

    fn dead_letters(&self) -> &DeadLetterStore;

    /// Call `deliver` up to `max_retries` times, sleeping `retry_delay`
    /// between attempts and stopping at the first success.
    ///
    /// Cancelling `shutdown` during a sleep abandons the remaining attempts
    /// and reports failure.
    async fn retry_delivery(&self, message: &Message, shutdown: &CancellationToken) -> bool {
        let policy = self.retry_policy();

        for attempt in 1..=policy.max_retries {
            if self.deliver(message).await {
                tracing::info!(
                    request_id = %message.request_id,
                    attempt,
                    "Delivery succeeded on retry"
                );
                return true;
            }

            tracing::warn!(
                request_id = %message.request_id,
                attempt,
                max_retries = policy.max_retries,
                "Retry attempt failed"
            );

            if attempt < policy.max_retries {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::warn!(
                            request_id = %message.request_id,
                            attempt,
                            "Retries interrupted by shutdown"
                        );
                        return false;
                    }
                    _ = tokio::time::sleep(policy.retry_delay) => {}
                }
            }
        }

        false
    }

    /// Append the message's raw body to the dead-letter log.
    async fn persist_failed(&self, message: &Message, raw: &[u8]) -> Result<(), AppError> {
        self.dead_letters().append(raw).await?;

        tracing::warn!(
            request_id = %message.request_id,
            path = %self.dead_letters().path().display(),
            "Delivery failed, message stored in dead-letter log"
        );
        Ok(())
    }
}

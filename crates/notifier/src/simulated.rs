use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use relay_common::types::Message;

use crate::availability::HealthSignal;
use crate::client::{DeliveryClient, RetryPolicy};
use crate::dead_letter::DeadLetterStore;

/// Delivery client whose outcome is decided entirely by a health signal.
///
/// No network call is made; an "up" signal counts as accepted.
pub struct SimulatedClient {
    signal: Arc<dyn HealthSignal>,
    policy: RetryPolicy,
    dead_letters: DeadLetterStore,
}

impl SimulatedClient {
    pub fn new(
        signal: Arc<dyn HealthSignal>,
        policy: RetryPolicy,
        dead_letters: DeadLetterStore,
    ) -> Self {
        Self {
            signal,
            policy,
            dead_letters,
        }
    }
}

#[async_trait]
impl DeliveryClient for SimulatedClient {
    async fn deliver(&self, message: &Message) -> bool {
        if self.signal.is_up(Utc::now()) {
            tracing::info!(
                request_id = %message.request_id,
                email = %message.email,
                body = %message.message_body,
                "Message sent successfully"
            );
            true
        } else {
            tracing::warn!(
                request_id = %message.request_id,
                email = %message.email,
                "Message delivery failed, downstream is down"
            );
            false
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    fn dead_letters(&self) -> &DeadLetterStore {
        &self.dead_letters
    }
}

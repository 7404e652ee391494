use std::time::Duration;

use async_trait::async_trait;

use relay_common::error::AppError;
use relay_common::types::Message;

use crate::client::{DeliveryClient, RetryPolicy};
use crate::dead_letter::DeadLetterStore;

/// Per-attempt HTTP timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Delivery client that POSTs the message as JSON to a real endpoint.
///
/// Any 2xx response is an accepted delivery; other statuses and transport
/// errors count as a failed attempt.
pub struct WebhookClient {
    http: reqwest::Client,
    url: String,
    policy: RetryPolicy,
    dead_letters: DeadLetterStore,
}

impl WebhookClient {
    pub fn new(
        url: String,
        policy: RetryPolicy,
        dead_letters: DeadLetterStore,
    ) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build webhook HTTP client: {}", e)))?;

        Ok(Self {
            http,
            url,
            policy,
            dead_letters,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DeliveryClient for WebhookClient {
    async fn deliver(&self, message: &Message) -> bool {
        match self.http.post(&self.url).json(message).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::info!(
                    request_id = %message.request_id,
                    status = response.status().as_u16(),
                    "Message delivered to webhook"
                );
                true
            }
            Ok(response) => {
                tracing::warn!(
                    request_id = %message.request_id,
                    status = response.status().as_u16(),
                    "Webhook rejected message"
                );
                false
            }
            Err(e) => {
                tracing::warn!(
                    request_id = %message.request_id,
                    error = %e,
                    "Webhook delivery failed"
                );
                false
            }
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    fn dead_letters(&self) -> &DeadLetterStore {
        &self.dead_letters
    }
}

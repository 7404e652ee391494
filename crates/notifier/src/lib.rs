//! Downstream delivery for messages consumed from the broker.
//!
//! - `availability`: duty-cycle simulation of the downstream's health
//! - `client`: the `DeliveryClient` capability with retry and dead-letter steps
//! - `simulated` / `webhook`: concrete clients
//! - `dead_letter`: append-only log of messages that could not be delivered

pub mod availability;
pub mod client;
pub mod dead_letter;
pub mod simulated;
pub mod webhook;

use std::sync::Arc;

use chrono::Utc;

use relay_common::config::AppConfig;
use relay_common::error::AppError;

use crate::availability::AvailabilityModel;
use crate::client::{DeliveryClient, RetryPolicy};
use crate::dead_letter::DeadLetterStore;
use crate::simulated::SimulatedClient;
use crate::webhook::WebhookClient;

/// Build the delivery client selected by configuration: a webhook client when
/// `DELIVERY_WEBHOOK_URL` is set, the availability simulation otherwise.
pub fn client_from_config(config: &AppConfig) -> Result<Arc<dyn DeliveryClient>, AppError> {
    let policy = RetryPolicy::new(config.number_of_retries, config.retry_delay());
    let dead_letters = DeadLetterStore::new(&config.dead_letter_path);

    match &config.delivery_webhook_url {
        Some(url) => {
            tracing::info!(url = %url, "Using webhook delivery client");
            Ok(Arc::new(WebhookClient::new(url.clone(), policy, dead_letters)?))
        }
        None => {
            tracing::info!(
                up_secs = config.server_run_time,
                down_secs = config.server_down_time,
                "Using simulated delivery client"
            );
            let model = AvailabilityModel::new(
                config.server_run_time,
                config.server_down_time,
                Utc::now(),
            );
            Ok(Arc::new(SimulatedClient::new(
                Arc::new(model),
                policy,
                dead_letters,
            )))
        }
    }
}

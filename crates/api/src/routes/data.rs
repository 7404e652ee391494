//! Ingestion endpoint: one notification request in, one acknowledged publish out.

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;

use relay_common::error::AppError;
use relay_common::types::{Message, PublishOutcome};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/v1/data", post(publish_data))
}

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliveryMetadata>,
}

/// Where the broker placed the record.
#[derive(Debug, Serialize)]
pub struct DeliveryMetadata {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// POST /api/v1/data — Publish a notification request to the broker.
///
/// The body is parsed here rather than through the `Json` extractor so that
/// malformed input gets the same 422 error shape as a refused publish.
async fn publish_data(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<PublishResponse>, AppError> {
    let message: Message = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("error while marshalling json: {}", e)))?;

    let outcome = state.policy.publish(&message).await?;

    let response = match outcome {
        PublishOutcome::Delivered {
            topic,
            partition,
            offset,
        } => PublishResponse {
            success: true,
            message: "success push data into kafka".to_string(),
            data: Some(message),
            delivery: Some(DeliveryMetadata {
                topic,
                partition,
                offset,
            }),
        },
        PublishOutcome::Failed { error_detail } => {
            tracing::warn!(error = %error_detail, "Message push failed");
            PublishResponse {
                success: false,
                message: "Message push failed".to_string(),
                data: None,
                delivery: None,
            }
        }
    };

    Ok(Json(response))
}

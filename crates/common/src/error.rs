use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use serde_json::json;
use thiserror::Error;

/// Common error types used across the application.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Broker connection error: {0}")]
    BrokerConnection(String),

    #[error("Broker error: {0}")]
    BrokerRuntime(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Config(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BrokerRuntime(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Serialization(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BrokerConnection(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = json!({ "error": { "message": self.to_string() } });
        (status, Json(body)).into_response()
    }
}

/// Broker-level failures observed while polling or committing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// Every bootstrap broker is unreachable; the worker cannot make progress.
    #[error("all brokers are down: {0}")]
    AllBrokersDown(String),

    #[error("broker transport error: {0}")]
    Transport(String),

    #[error("message consumption error: {0}")]
    Consumption(String),

    #[error("offset commit failed: {0}")]
    Commit(String),
}

impl BrokerError {
    /// Whether the poll loop must stop and drain.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BrokerError::AllBrokersDown(_))
    }
}

impl From<KafkaError> for BrokerError {
    fn from(err: KafkaError) -> Self {
        match err.rdkafka_error_code() {
            Some(RDKafkaErrorCode::AllBrokersDown) => BrokerError::AllBrokersDown(err.to_string()),
            Some(RDKafkaErrorCode::BrokerTransportFailure) => {
                BrokerError::Transport(err.to_string())
            }
            _ => match err {
                KafkaError::ConsumerCommit(_) => BrokerError::Commit(err.to_string()),
                other => BrokerError::Consumption(other.to_string()),
            },
        }
    }
}

impl From<BrokerError> for AppError {
    fn from(err: BrokerError) -> Self {
        AppError::BrokerRuntime(err.to_string())
    }
}

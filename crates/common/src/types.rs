use serde::{Deserialize, Serialize};

/// A notification request as it travels through the broker.
///
/// Callers supply `request_id`; it is used for log correlation and
/// dead-letter lookup but is not guaranteed unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Message {
    pub request_id: String,
    pub topic_name: String,
    pub message_body: String,
    pub transaction_id: String,
    pub email: String,
    pub phone: String,
    pub customer_id: String,
    /// Partitioning key, only used in key-hashed mode
    pub key: String,
}

impl Message {
    /// Serialize to the JSON envelope used on the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize the JSON envelope; missing fields default to empty.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Result of a single publish attempt, as reported by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Delivered {
        topic: String,
        partition: i32,
        offset: i64,
    },
    Failed {
        error_detail: String,
    },
}

impl PublishOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PublishOutcome::Delivered { .. })
    }
}

/// A record handed out by a broker poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

impl BrokerRecord {
    /// Payload as text, for logging and dead-lettering.
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// How the delivery path finished for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Accepted by the downstream client.
    Delivered,
    /// Appended to the dead-letter log.
    DeadLettered,
    /// Neither delivered nor persisted; the dead-letter write failed.
    Lost,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resolution::Delivered => write!(f, "delivered"),
            Resolution::DeadLettered => write!(f, "dead_lettered"),
            Resolution::Lost => write!(f, "lost"),
        }
    }
}

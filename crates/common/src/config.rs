use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Address the ingestion API binds to
    pub listen_addr_api: String,

    /// Comma-separated Kafka bootstrap servers
    pub kafka_broker_url: String,

    /// Default topic to publish to; the worker subscribes to every
    /// comma-separated entry
    pub kafka_topic: String,

    /// Consumer group shared by all worker instances
    pub kafka_consumer_group: String,

    /// Partition mode selector: "0" auto-assign, "1" key-hashed, anything
    /// else fixed-partition
    pub kafka_pub_message_type: String,

    /// Fixed partition index, kept raw and validated at publish time
    pub pub_partition: String,

    /// Seconds the simulated downstream stays up
    pub server_run_time: u64,

    /// Seconds the simulated downstream stays down
    pub server_down_time: u64,

    /// Delivery attempts made by `retry_delivery`
    pub number_of_retries: u32,

    /// Seconds to wait between retry attempts
    pub wait_time: u64,

    /// Append-only dead-letter file
    pub dead_letter_path: String,

    /// Upper bound of a single broker poll (default: 100ms)
    pub poll_timeout_ms: u64,

    /// Capacity of the queue between the poll loop and the delivery task
    pub dispatch_queue_depth: usize,

    /// Real downstream endpoint; the availability simulation is used when unset
    pub delivery_webhook_url: Option<String>,

    /// How long a publish waits for the broker's delivery report
    pub publish_timeout_ms: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            listen_addr_api: std::env::var("LISTEN_ADDR_API")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            kafka_broker_url: std::env::var("KAFKA_BROKER_URL")
                .unwrap_or_else(|_| "localhost:9092".to_string()),
            kafka_topic: std::env::var("KAFKA_TOPIC")
                .unwrap_or_else(|_| "notifications".to_string()),
            kafka_consumer_group: std::env::var("KAFKA_CONSUMER_GROUP")
                .unwrap_or_else(|_| "relay-workers".to_string()),
            kafka_pub_message_type: std::env::var("KAFKA_PUB_MESSAGE_TYPE")
                .unwrap_or_else(|_| "0".to_string()),
            pub_partition: std::env::var("PUB_PARTITION").unwrap_or_else(|_| "0".to_string()),
            server_run_time: parse_var("SERVER_RUN_TIME", "30")?,
            server_down_time: parse_var("SERVER_DOWN_TIME", "10")?,
            number_of_retries: parse_var("NUMBER_OF_RETRIES", "3")?,
            wait_time: parse_var("WAIT_TIME", "1")?,
            dead_letter_path: std::env::var("DEAD_LETTER_PATH")
                .unwrap_or_else(|_| "failed.log".to_string()),
            poll_timeout_ms: parse_var("POLL_TIMEOUT_MS", "100")?,
            dispatch_queue_depth: parse_var("DISPATCH_QUEUE_DEPTH", "64")?,
            delivery_webhook_url: std::env::var("DELIVERY_WEBHOOK_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            publish_timeout_ms: parse_var("PUBLISH_TIMEOUT_MS", "5000")?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server_run_time == 0 {
            anyhow::bail!("SERVER_RUN_TIME must be a positive integer");
        }
        if self.server_down_time == 0 {
            anyhow::bail!("SERVER_DOWN_TIME must be a positive integer");
        }
        if self.number_of_retries == 0 {
            anyhow::bail!("NUMBER_OF_RETRIES must be a positive integer");
        }
        if self.dispatch_queue_depth == 0 {
            anyhow::bail!("DISPATCH_QUEUE_DEPTH must be a positive integer");
        }
        if self.topics().is_empty() {
            anyhow::bail!("KAFKA_TOPIC must name at least one topic");
        }
        Ok(())
    }

    /// Topics the worker subscribes to.
    pub fn topics(&self) -> Vec<String> {
        self.kafka_topic
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.wait_time)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr_api: "0.0.0.0:8080".to_string(),
            kafka_broker_url: "localhost:9092".to_string(),
            kafka_topic: "notifications".to_string(),
            kafka_consumer_group: "relay-workers".to_string(),
            kafka_pub_message_type: "0".to_string(),
            pub_partition: "0".to_string(),
            server_run_time: 30,
            server_down_time: 10,
            number_of_retries: 3,
            wait_time: 1,
            dead_letter_path: "failed.log".to_string(),
            poll_timeout_ms: 100,
            dispatch_queue_depth: 64,
            delivery_webhook_url: None,
            publish_timeout_ms: 5000,
        }
    }
}

fn parse_var<T: FromStr>(key: &str, default: &str) -> anyhow::Result<T> {
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("{} must be a valid {}", key, std::any::type_name::<T>()))
}

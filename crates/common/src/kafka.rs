use rdkafka::config::ClientConfig;

/// Create the base client configuration shared by producers and consumers.
///
/// Role-specific settings (group id, commit policy, acks) are layered on top
/// by the caller.
pub fn create_client_config(brokers: &str) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", brokers)
        .set("broker.address.family", "v4");

    tracing::debug!(brokers, "Kafka client config created");
    client_config
}

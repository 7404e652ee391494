//! HTTP ingestion adapter: accepts notification requests and publishes them.

pub mod routes;
pub mod state;

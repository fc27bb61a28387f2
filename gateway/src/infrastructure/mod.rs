/// Audit logging for configuration and mesh membership events.
pub mod audit;
/// Configuration management for the gateway.
pub mod config;
/// HTTP server bootstrap.
pub mod server;
/// Logging setup.
pub mod telemetry;

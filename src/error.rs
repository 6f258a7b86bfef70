use thiserror::Error;

/// Result type for synchronization operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while talking to the broker or decoding messages
#[derive(Error, Debug)]
pub enum SyncError {
    /// MQTT client request could not be queued
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    /// Connection was closed and no longer accepts requests
    #[error("Connection closed")]
    ConnectionClosed,

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Payload decoded but does not have the expected shape
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Command is not supported by the targeted exhibit kind
    #[error("Unsupported command: {0}")]
    UnsupportedCommand(String),

    /// Topic string does not belong to the protocol grammar
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    /// A subscription handler reported a failure
    #[error("Handler error: {0}")]
    Handler(String),
}

//! Error types for the `kite-rs` crate.
//!
//! All fallible operations in this crate return [`Result<T>`], which is an
//! alias for `std::result::Result<T, KiteError>`.
//!
//! [`KiteError`] covers:
//! - **WebSocket errors**: Connection, handshake and transport failures
//! - **Decode errors**: Malformed binary packets (logged and skipped by the feed)
//! - **JSON errors**: Control message (de)serialization failures
//! - **Not connected**: Control command issued while the socket is not open
//! - **Retries exhausted**: Automatic reconnection gave up
//! - **Connect timeout**: A connection attempt did not complete in time
//! - **Write timeout**: A frame could not be written to the socket in time
//! - **URL errors**: Malformed gateway URL construction
//! - **Invalid arguments**: Client-side validation errors

use std::time::Duration;

/// All possible errors produced by the `kite-rs` ticker.
#[derive(Debug, thiserror::Error)]
pub enum KiteError {
    /// A WebSocket-level error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A binary packet could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Failed to (de)serialize a JSON message.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A control command was issued while the connection was not open.
    #[error("ticker is not connected")]
    NotConnected,

    /// Automatic reconnection stopped after the given number of attempts.
    #[error("reconnection attempts exhausted after {0} retries")]
    RetriesExhausted(u32),

    /// A connection attempt did not complete within the configured timeout.
    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// A frame could not be written to the socket within the given time.
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// An error building or parsing a URL.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// The caller provided an invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, KiteError>;

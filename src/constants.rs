//! Constants for the Kite Connect streaming ticker.
//!
//! Contains the WebSocket endpoint, request headers, exchange segment codes
//! and the default / limit values used by
//! [`KiteTicker`](crate::ws::ticker::KiteTicker). These are used internally but
//! are also exported for advanced usage.

use std::time::Duration;

// ---------------------------------------------------------------------------
// WebSocket endpoint
// ---------------------------------------------------------------------------

/// Default root URI of the streaming ticker.
pub const WS_TICKER_URL: &str = "wss://ws.kite.trade";

/// Name of the API version header sent with the opening handshake.
pub const KITE_VERSION_HEADER: &str = "x-kite-version";

/// API version requested by this client.
pub const KITE_VERSION: &str = "3";

/// User agent sent with the opening handshake.
pub const USER_AGENT: &str = concat!("kite-rs/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Exchange segment codes
// ---------------------------------------------------------------------------

/// Segment codes carried in the low byte of an instrument token.
pub mod segments {
    pub const NSE: u8 = 1;
    pub const NFO: u8 = 2;
    /// Currency derivatives. Prices are scaled by 10,000,000.
    pub const CDS: u8 = 3;
    pub const BSE: u8 = 4;
    pub const BFO: u8 = 5;
    /// BSE currency derivatives. Prices are scaled by 10,000.
    pub const BCD: u8 = 6;
    pub const MCX: u8 = 7;
    pub const MCXSX: u8 = 8;
    /// Indices. Not tradable.
    pub const INDICES: u8 = 9;
}

// ---------------------------------------------------------------------------
// Binary packet sizes
// ---------------------------------------------------------------------------

/// Payload lengths of the packets found in a binary tick frame.
pub mod packet_len {
    /// Last traded price only.
    pub const LTP: usize = 8;
    /// Index quote (LTP + OHLC + price change).
    pub const INDEX_QUOTE: usize = 28;
    /// Index full (index quote + exchange timestamp).
    pub const INDEX_FULL: usize = 32;
    /// Quote (LTP + volumes + OHLC).
    pub const QUOTE: usize = 44;
    /// Full (quote + OI + timestamps + 5-level depth).
    pub const FULL: usize = 184;
}

// ---------------------------------------------------------------------------
// Connection defaults and limits
// ---------------------------------------------------------------------------

/// Defaults and hard limits for the connection manager.
pub mod limits {
    use super::Duration;

    /// Default timeout for a single connection attempt.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
    /// Default upper bound for the delay between reconnection attempts.
    pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(60);
    /// Lowest value accepted for the reconnect delay cap.
    pub const MIN_RECONNECT_MAX_DELAY: Duration = Duration::from_secs(5);
    /// Default number of reconnection attempts.
    pub const RECONNECT_MAX_TRIES: u32 = 50;
    /// Highest value accepted for the number of reconnection attempts.
    pub const MAX_RECONNECT_MAX_TRIES: u32 = 300;
    /// Delay before the first reconnection attempt.
    pub const RECONNECT_INITIAL_DELAY: Duration = Duration::from_secs(1);
    /// Lowest value accepted for the first reconnection delay.
    pub const MIN_RECONNECT_INITIAL_DELAY: Duration = Duration::from_millis(100);
    /// Growth factor of the reconnect delay.
    pub const RECONNECT_BACKOFF_FACTOR: f64 = 1.6;
    /// Interval between keepalive pings (and pong checks).
    pub const PING_INTERVAL: Duration = Duration::from_millis(2_500);
    /// Time allowed for writing a close frame.
    pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);
    /// Broadcast channel capacity for ticker events.
    pub const EVENT_CHANNEL_CAPACITY: usize = 4_096;
}

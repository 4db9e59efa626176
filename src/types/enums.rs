//! Shared enum types used by the ticker.
//!
//! [`Mode`] maps directly to the mode strings of the control protocol
//! (`"ltp"`, `"quote"`, `"full"`). [`ExchangeSegment`] maps to the segment
//! code carried in the low byte of every instrument token.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::segments;

// ---------------------------------------------------------------------------
// Streaming mode
// ---------------------------------------------------------------------------

/// Verbosity of a subscription and of a decoded tick.
///
/// Ordered from least to most verbose.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Last traded price only.
    Ltp,
    /// LTP + volumes + OHLC.
    Quote,
    /// Quote + open interest + timestamps + market depth.
    Full,
}

impl Mode {
    /// The mode string used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ltp => "ltp",
            Self::Quote => "quote",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Exchange Segment
// ---------------------------------------------------------------------------

/// Exchange segment encoded in the low byte of an instrument token.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeSegment {
    /// NSE equity (segment code 1).
    NSE,
    /// NSE futures & options (segment code 2).
    NFO,
    /// NSE currency derivatives (segment code 3).
    CDS,
    /// BSE equity (segment code 4).
    BSE,
    /// BSE futures & options (segment code 5).
    BFO,
    /// BSE currency derivatives (segment code 6).
    BCD,
    /// MCX commodities (segment code 7).
    MCX,
    /// MCX-SX (segment code 8).
    MCXSX,
    /// Indices (segment code 9).
    INDICES,
}

impl ExchangeSegment {
    /// Returns the numeric segment code.
    pub fn segment_code(self) -> u8 {
        match self {
            Self::NSE => segments::NSE,
            Self::NFO => segments::NFO,
            Self::CDS => segments::CDS,
            Self::BSE => segments::BSE,
            Self::BFO => segments::BFO,
            Self::BCD => segments::BCD,
            Self::MCX => segments::MCX,
            Self::MCXSX => segments::MCXSX,
            Self::INDICES => segments::INDICES,
        }
    }

    /// Construct from a numeric segment code.
    pub fn from_segment_code(code: u8) -> Option<Self> {
        match code {
            segments::NSE => Some(Self::NSE),
            segments::NFO => Some(Self::NFO),
            segments::CDS => Some(Self::CDS),
            segments::BSE => Some(Self::BSE),
            segments::BFO => Some(Self::BFO),
            segments::BCD => Some(Self::BCD),
            segments::MCX => Some(Self::MCX),
            segments::MCXSX => Some(Self::MCXSX),
            segments::INDICES => Some(Self::INDICES),
            _ => None,
        }
    }

    /// Segment of an instrument token.
    pub fn from_instrument_token(token: u32) -> Option<Self> {
        Self::from_segment_code(segment_code_of(token))
    }
}

/// Segment code carried in the low byte of an instrument token.
#[inline]
pub fn segment_code_of(instrument_token: u32) -> u8 {
    (instrument_token & 0xFF) as u8
}

/// Divisor that converts the integer prices of a packet into rupees.
///
/// Unknown segment codes use the default divisor of 100.
#[inline]
pub fn price_divisor(segment_code: u8) -> f64 {
    match segment_code {
        segments::CDS => 10_000_000.0,
        segments::BCD => 10_000.0,
        _ => 100.0,
    }
}

/// Whether instruments of the segment can be traded (indices cannot).
#[inline]
pub fn is_tradable(segment_code: u8) -> bool {
    segment_code != segments::INDICES
}

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

/// Lifecycle state of the ticker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No socket and no pending attempt.
    #[default]
    Disconnected,
    /// A connection attempt (or the backoff before one) is in progress.
    Connecting,
    /// The socket is open and streaming.
    Open,
    /// A close was requested and the socket is shutting down.
    Closing,
}

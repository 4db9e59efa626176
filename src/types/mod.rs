//! Value types shared by the ticker modules.
//!
//! ## Organization
//!
//! - [`enums`]: Streaming modes, exchange segments and connection state
//! - [`tick`]: Decoded market data records ([`Tick`], [`Ohlc`], [`Depth`])
//!
//! Everything is re-exported at the module root.

pub mod enums;
pub mod tick;

pub use enums::*;
pub use tick::*;

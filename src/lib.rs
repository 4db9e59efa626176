//! # kite-rs
//!
//! A Rust client for the [Kite Connect](https://kite.trade/docs/connect/v3/websocket/)
//! streaming ticker.
//!
//! ## Quick Start
//!
//! ```no_run
//! use kite_rs::{KiteTicker, TickerEvent};
//!
//! #[tokio::main]
//! async fn main() -> kite_rs::Result<()> {
//!     let mut ticker = KiteTicker::new("your-api-key", "your-access-token");
//!     let mut events = ticker.events();
//!     ticker.connect()?;
//!
//!     while let Ok(event) = events.recv().await {
//!         if let TickerEvent::Connected = event {
//!             ticker.subscribe(&[256_265]).await?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod constants;
pub mod error;
pub mod types;
pub mod ws;

/// Re-export the ticker handle and its events at crate root for convenience.
pub use ws::ticker::{KiteTicker, KiteTickerBuilder, TickerEvent};
/// Re-export the error type and Result alias.
pub use error::{KiteError, Result};
/// Re-export of the URL type used by [`ws::ticker::Credentials`].
pub use url::Url;

//! WebSocket modules for real-time market data.
//!
//! Kite Connect streams ticks over a single WebSocket at
//! `wss://ws.kite.trade`. The socket carries:
//!
//! - **binary frames** with one or more tick packets, decoded by
//!   [`market_feed`]. Packet size depends on the subscription mode:
//!   - **LTP**: last traded price (8 bytes)
//!   - **Quote**: LTP + volumes + OHLC (44 bytes, 28 for indices)
//!   - **Full**: Quote + OI + timestamps + 5-level depth (184 bytes, 32 for
//!     indices)
//! - **text frames** with JSON order updates and server errors, decoded by
//!   [`order_update`].
//!
//! [`ticker`] ties these together with [`subscription`] bookkeeping,
//! [`keepalive`] pings and [`reconnect`] backoff into [`ticker::KiteTicker`].

pub mod keepalive;
pub mod market_feed;
pub mod order_update;
pub mod reconnect;
pub mod subscription;
pub mod ticker;

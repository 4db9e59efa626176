//! Decoded market data records.
//!
//! A [`Tick`] is produced for every packet of a binary frame. Fields that the
//! packet's [`Mode`] does not carry are `None`.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::enums::Mode;

/// One decoded market update for an instrument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tick {
    /// Mode of the packet the tick was decoded from.
    pub mode: Mode,
    /// Instrument token. The low byte is the exchange segment.
    pub instrument_token: u32,
    /// `false` for indices.
    pub tradable: bool,
    /// Last traded price.
    pub last_price: f64,
    /// Quantity of the last trade.
    pub last_traded_quantity: Option<u32>,
    /// Volume weighted average traded price.
    pub average_traded_price: Option<f64>,
    /// Volume traded for the day.
    pub volume_traded: Option<u32>,
    /// Total pending buy quantity.
    pub total_buy_quantity: Option<u32>,
    /// Total pending sell quantity.
    pub total_sell_quantity: Option<u32>,
    /// Day open / high / low and previous close.
    pub ohlc: Option<Ohlc>,
    /// Percentage change of `last_price` against `ohlc.close`.
    pub change: Option<f64>,
    /// Time of the last trade.
    pub last_trade_time: Option<DateTime<Utc>>,
    /// Exchange timestamp of the packet.
    pub exchange_timestamp: Option<DateTime<Utc>>,
    /// Open interest.
    pub oi: Option<u32>,
    /// Highest open interest of the day.
    pub oi_day_high: Option<u32>,
    /// Lowest open interest of the day.
    pub oi_day_low: Option<u32>,
    /// Five best bids and offers.
    pub depth: Option<Depth>,
}

impl Tick {
    /// A tick carrying only the fields common to every mode.
    pub(crate) fn new(mode: Mode, instrument_token: u32, tradable: bool, last_price: f64) -> Self {
        Self {
            mode,
            instrument_token,
            tradable,
            last_price,
            last_traded_quantity: None,
            average_traded_price: None,
            volume_traded: None,
            total_buy_quantity: None,
            total_sell_quantity: None,
            ohlc: None,
            change: None,
            last_trade_time: None,
            exchange_timestamp: None,
            oi: None,
            oi_day_high: None,
            oi_day_low: None,
            depth: None,
        }
    }
}

/// Day open, high, low and close prices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Ohlc {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Ohlc {
    /// Percentage change of `last_price` against the close, `0.0` when the
    /// close is zero.
    pub fn change(&self, last_price: f64) -> f64 {
        if self.close != 0.0 {
            (last_price - self.close) * 100.0 / self.close
        } else {
            0.0
        }
    }
}

/// Market depth: five buy levels followed by five sell levels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Depth {
    /// Bids, best first.
    pub buy: [DepthLevel; 5],
    /// Offers, best first.
    pub sell: [DepthLevel; 5],
}

/// A single level of market depth.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct DepthLevel {
    /// Quantity at this price.
    pub quantity: u32,
    /// Price of the level.
    pub price: f64,
    /// Number of orders at this price.
    pub orders: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_against_close() {
        let ohlc = Ohlc {
            open: 100.0,
            high: 110.0,
            low: 90.0,
            close: 100.0,
        };
        assert!((ohlc.change(105.0) - 5.0).abs() < 1e-9);
        assert!((ohlc.change(95.0) + 5.0).abs() < 1e-9);
    }

    #[test]
    fn change_is_zero_without_close() {
        let ohlc = Ohlc {
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 0.0,
        };
        assert_eq!(ohlc.change(42.0), 0.0);
    }
}

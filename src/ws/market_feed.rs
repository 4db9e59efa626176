//! Binary tick frame decoder.
//!
//! Every binary message received from the ticker is a batch of packets:
//!
//! ```text
//! ┌────────────┬────────────┬──────────────┬────────────┬──────────────┬───
//! │ count (u16)│ len₁ (u16) │ packet₁ (len₁)│ len₂ (u16) │ packet₂ (len₂)│ …
//! └────────────┴────────────┴──────────────┴────────────┴──────────────┴───
//! ```
//!
//! All integers are big-endian and unsigned. The packet length selects the
//! layout:
//!
//! | Length | Mode  | Contents                                              |
//! |--------|-------|-------------------------------------------------------|
//! | 8      | LTP   | token, last price                                     |
//! | 28     | Quote | index: + high, low, open, close, price change         |
//! | 32     | Full  | index: + exchange timestamp                           |
//! | 44     | Quote | + LTQ, ATP, volume, buy/sell quantity, OHLC           |
//! | 184    | Full  | + LTT, OI, OI high/low, exchange timestamp, depth     |
//!
//! Prices are integers scaled by a divisor that depends on the exchange
//! segment (the low byte of the instrument token).
//!
//! Decoding never fails as a whole: frames shorter than two bytes are
//! heartbeats, packets of unknown length are skipped, and a packet whose
//! declared length runs past the end of the frame ends the batch.
//!
//! # Example
//!
//! ```
//! use kite_rs::ws::market_feed::parse_binary;
//!
//! // A heartbeat frame carries no ticks.
//! assert!(parse_binary(&[0x00]).is_empty());
//! ```

use chrono::{DateTime, Utc};

use crate::constants::packet_len;
use crate::error::{KiteError, Result};
use crate::types::enums::{Mode, is_tradable, price_divisor, segment_code_of};
use crate::types::tick::{Depth, DepthLevel, Ohlc, Tick};

// ---------------------------------------------------------------------------
// Big-endian readers
// ---------------------------------------------------------------------------

// Callers check the packet length before reading, so indexing cannot go out
// of bounds.

#[inline(always)]
fn read_u16_be(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

#[inline(always)]
fn read_u32_be(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Read a scaled price at `offset`.
#[inline(always)]
fn read_price(data: &[u8], offset: usize, divisor: f64) -> f64 {
    f64::from(read_u32_be(data, offset)) / divisor
}

/// Read an epoch-seconds timestamp at `offset`. Zero means "not set".
#[inline]
fn read_timestamp(data: &[u8], offset: usize) -> Option<DateTime<Utc>> {
    match read_u32_be(data, offset) {
        0 => None,
        secs => DateTime::from_timestamp(i64::from(secs), 0),
    }
}

// ---------------------------------------------------------------------------
// Frame splitting
// ---------------------------------------------------------------------------

/// Split a binary frame into its packets.
///
/// Returns an empty list for heartbeat frames (fewer than two bytes). Stops at
/// the first packet whose length prefix or payload would read past the end of
/// the frame.
pub fn split_packets(frame: &[u8]) -> Vec<&[u8]> {
    if frame.len() < 2 {
        return Vec::new();
    }

    let count = usize::from(read_u16_be(frame, 0));
    let mut packets = Vec::with_capacity(count);
    let mut off = 2usize;

    for index in 0..count {
        if off + 2 > frame.len() {
            tracing::debug!(
                index,
                declared = count,
                "frame ended before packet length prefix"
            );
            break;
        }
        let len = usize::from(read_u16_be(frame, off));
        off += 2;

        if off + len > frame.len() {
            tracing::debug!(
                index,
                len,
                remaining = frame.len() - off,
                "dropping truncated packet"
            );
            break;
        }
        packets.push(&frame[off..off + len]);
        off += len;
    }

    packets
}

// ---------------------------------------------------------------------------
// Packet decoding
// ---------------------------------------------------------------------------

/// Decode every packet of a binary frame into [`Tick`]s, in order.
///
/// Packets that cannot be decoded are skipped.
pub fn parse_binary(frame: &[u8]) -> Vec<Tick> {
    split_packets(frame)
        .into_iter()
        .filter_map(|packet| match parse_packet(packet) {
            Ok(tick) => Some(tick),
            Err(e) => {
                tracing::trace!(error = %e, "skipping packet");
                None
            }
        })
        .collect()
}

/// Decode a single packet (without its length prefix).
///
/// Fails with [`KiteError::Decode`] for packet lengths this client does not
/// know about.
pub fn parse_packet(packet: &[u8]) -> Result<Tick> {
    match packet.len() {
        packet_len::LTP
        | packet_len::INDEX_QUOTE
        | packet_len::INDEX_FULL
        | packet_len::QUOTE
        | packet_len::FULL => {}
        len => {
            return Err(KiteError::Decode(format!(
                "unknown packet length: {len} bytes"
            )));
        }
    }

    let instrument_token = read_u32_be(packet, 0);
    let segment = segment_code_of(instrument_token);
    let divisor = price_divisor(segment);
    let tradable = is_tradable(segment);
    let last_price = read_price(packet, 4, divisor);

    let tick = match packet.len() {
        packet_len::LTP => Tick::new(Mode::Ltp, instrument_token, tradable, last_price),
        packet_len::INDEX_QUOTE | packet_len::INDEX_FULL => {
            parse_index(packet, instrument_token, tradable, last_price, divisor)
        }
        _ => parse_quote(packet, instrument_token, tradable, last_price, divisor),
    };
    Ok(tick)
}

/// Index packets: 28 bytes (quote) or 32 bytes (full).
fn parse_index(
    packet: &[u8],
    instrument_token: u32,
    tradable: bool,
    last_price: f64,
    divisor: f64,
) -> Tick {
    let mode = if packet.len() == packet_len::INDEX_FULL {
        Mode::Full
    } else {
        Mode::Quote
    };

    // Index packets order the prices high, low, open, close.
    let ohlc = Ohlc {
        high: read_price(packet, 8, divisor),
        low: read_price(packet, 12, divisor),
        open: read_price(packet, 16, divisor),
        close: read_price(packet, 20, divisor),
    };

    let mut tick = Tick::new(mode, instrument_token, tradable, last_price);
    tick.change = Some(ohlc.change(last_price));
    tick.ohlc = Some(ohlc);

    if mode == Mode::Full {
        tick.exchange_timestamp = read_timestamp(packet, 28);
    }
    tick
}

/// Tradable instrument packets: 44 bytes (quote) or 184 bytes (full).
fn parse_quote(
    packet: &[u8],
    instrument_token: u32,
    tradable: bool,
    last_price: f64,
    divisor: f64,
) -> Tick {
    let mode = if packet.len() == packet_len::FULL {
        Mode::Full
    } else {
        Mode::Quote
    };

    let ohlc = Ohlc {
        open: read_price(packet, 28, divisor),
        high: read_price(packet, 32, divisor),
        low: read_price(packet, 36, divisor),
        close: read_price(packet, 40, divisor),
    };

    let mut tick = Tick::new(mode, instrument_token, tradable, last_price);
    tick.last_traded_quantity = Some(read_u32_be(packet, 8));
    tick.average_traded_price = Some(read_price(packet, 12, divisor));
    tick.volume_traded = Some(read_u32_be(packet, 16));
    tick.total_buy_quantity = Some(read_u32_be(packet, 20));
    tick.total_sell_quantity = Some(read_u32_be(packet, 24));
    tick.change = Some(ohlc.change(last_price));
    tick.ohlc = Some(ohlc);

    if mode == Mode::Full {
        tick.last_trade_time = read_timestamp(packet, 44);
        tick.oi = Some(read_u32_be(packet, 48));
        tick.oi_day_high = Some(read_u32_be(packet, 52));
        tick.oi_day_low = Some(read_u32_be(packet, 56));
        tick.exchange_timestamp = read_timestamp(packet, 60);
        tick.depth = Some(parse_depth(packet, divisor));
    }
    tick
}

/// 10 depth entries of 12 bytes from offset 64: five bids, then five offers.
fn parse_depth(packet: &[u8], divisor: f64) -> Depth {
    let mut depth = Depth {
        buy: [DepthLevel::default(); 5],
        sell: [DepthLevel::default(); 5],
    };

    for i in 0..10 {
        let off = 64 + i * 12;
        let level = DepthLevel {
            quantity: read_u32_be(packet, off),
            price: read_price(packet, off + 4, divisor),
            orders: read_u16_be(packet, off + 8),
            // off + 10..off + 12 is padding
        };
        if i < 5 {
            depth.buy[i] = level;
        } else {
            depth.sell[i - 5] = level;
        }
    }
    depth
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::segments;

    /// Instrument token with the given segment in its low byte.
    fn token(id: u32, segment: u8) -> u32 {
        (id << 8) | u32::from(segment)
    }

    fn put_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_be_bytes());
    }

    fn frame(packets: &[Vec<u8>]) -> Vec<u8> {
        let mut out = (packets.len() as u16).to_be_bytes().to_vec();
        for p in packets {
            out.extend_from_slice(&(p.len() as u16).to_be_bytes());
            out.extend_from_slice(p);
        }
        out
    }

    fn ltp_packet(token: u32, price: u32) -> Vec<u8> {
        let mut p = Vec::new();
        put_u32(&mut p, token);
        put_u32(&mut p, price);
        p
    }

    /// 44-byte quote packet: token, ltp, ltq, atp, volume, tbq, tsq, o, h, l, c.
    fn quote_packet(fields: [u32; 11]) -> Vec<u8> {
        let mut p = Vec::new();
        for f in fields {
            put_u32(&mut p, f);
        }
        p
    }

    fn full_packet(quote: [u32; 11], extra: [u32; 5], depth: &[(u32, u32, u16); 10]) -> Vec<u8> {
        let mut p = quote_packet(quote);
        for f in extra {
            put_u32(&mut p, f);
        }
        for &(qty, price, orders) in depth {
            put_u32(&mut p, qty);
            put_u32(&mut p, price);
            p.extend_from_slice(&orders.to_be_bytes());
            p.extend_from_slice(&[0, 0]);
        }
        p
    }

    /// Scale a decoded price back to its wire integer.
    fn unscale(price: f64, segment: u8) -> u32 {
        (price * price_divisor(segment)).round() as u32
    }

    #[test]
    fn heartbeat_frames_are_empty() {
        assert!(parse_binary(&[]).is_empty());
        assert!(parse_binary(&[0x01]).is_empty());
    }

    #[test]
    fn ltp_packet_decodes() {
        let t = token(1_024, segments::NSE);
        let ticks = parse_binary(&frame(&[ltp_packet(t, 123_455)]));
        assert_eq!(ticks.len(), 1);
        let tick = &ticks[0];
        assert_eq!(tick.mode, Mode::Ltp);
        assert_eq!(tick.instrument_token, t);
        assert!(tick.tradable);
        assert_eq!(unscale(tick.last_price, segments::NSE), 123_455);
        assert!(tick.ohlc.is_none());
        assert!(tick.change.is_none());
    }

    #[test]
    fn divisor_depends_on_segment() {
        let cds = parse_binary(&frame(&[ltp_packet(token(7, segments::CDS), 825_000_000)]));
        assert!((cds[0].last_price - 82.5).abs() < 1e-9);

        let bcd = parse_binary(&frame(&[ltp_packet(token(7, segments::BCD), 825_000)]));
        assert!((bcd[0].last_price - 82.5).abs() < 1e-9);

        let mcx = parse_binary(&frame(&[ltp_packet(token(7, segments::MCX), 8_250)]));
        assert!((mcx[0].last_price - 82.5).abs() < 1e-9);
    }

    #[test]
    fn index_quote_and_full_decode() {
        let t = token(1_001, segments::INDICES);
        let mut quote = Vec::new();
        // ltp, high, low, open, close, price change
        for v in [t, 2_250_050, 2_260_000, 2_240_000, 2_245_000, 2_200_000, 50_050] {
            put_u32(&mut quote, v);
        }
        let mut full = quote.clone();
        put_u32(&mut full, 1_700_000_000);

        let ticks = parse_binary(&frame(&[quote, full]));
        assert_eq!(ticks.len(), 2);

        let q = &ticks[0];
        assert_eq!(q.mode, Mode::Quote);
        assert!(!q.tradable);
        let ohlc = q.ohlc.unwrap();
        assert_eq!(unscale(ohlc.high, segments::INDICES), 2_260_000);
        assert_eq!(unscale(ohlc.low, segments::INDICES), 2_240_000);
        assert_eq!(unscale(ohlc.open, segments::INDICES), 2_245_000);
        assert_eq!(unscale(ohlc.close, segments::INDICES), 2_200_000);
        let expected = (22_500.5 - 22_000.0) * 100.0 / 22_000.0;
        assert!((q.change.unwrap() - expected).abs() < 1e-9);
        assert!(q.exchange_timestamp.is_none());

        let f = &ticks[1];
        assert_eq!(f.mode, Mode::Full);
        assert_eq!(
            f.exchange_timestamp.unwrap().timestamp(),
            1_700_000_000
        );
        assert!(f.depth.is_none());
    }

    #[test]
    fn quote_packet_round_trips() {
        let t = token(2_885, segments::NSE);
        let fields = [t, 250_075, 10, 249_990, 1_000_000, 4_500, 5_500, 248_000, 251_000, 247_500, 245_000];
        let ticks = parse_binary(&frame(&[quote_packet(fields)]));
        let q = &ticks[0];

        assert_eq!(q.mode, Mode::Quote);
        assert_eq!(unscale(q.last_price, segments::NSE), 250_075);
        assert_eq!(q.last_traded_quantity, Some(10));
        assert_eq!(unscale(q.average_traded_price.unwrap(), segments::NSE), 249_990);
        assert_eq!(q.volume_traded, Some(1_000_000));
        assert_eq!(q.total_buy_quantity, Some(4_500));
        assert_eq!(q.total_sell_quantity, Some(5_500));
        let ohlc = q.ohlc.unwrap();
        assert_eq!(unscale(ohlc.open, segments::NSE), 248_000);
        assert_eq!(unscale(ohlc.high, segments::NSE), 251_000);
        assert_eq!(unscale(ohlc.low, segments::NSE), 247_500);
        assert_eq!(unscale(ohlc.close, segments::NSE), 245_000);
        let expected = (2_500.75 - 2_450.0) * 100.0 / 2_450.0;
        assert!((q.change.unwrap() - expected).abs() < 1e-9);
        assert!(q.depth.is_none());
        assert!(q.oi.is_none());
    }

    #[test]
    fn full_packet_round_trips() {
        let t = token(40_000, segments::NFO);
        let quote = [t, 150_000, 75, 149_950, 12_000, 300, 400, 148_000, 151_000, 147_000, 0];
        let extra = [1_700_000_100, 900_000, 950_000, 850_000, 1_700_000_101];
        let mut depth = [(0u32, 0u32, 0u16); 10];
        for (i, level) in depth.iter_mut().enumerate() {
            let i = i as u32;
            *level = (100 + i, 149_900 + i * 5, (i + 1) as u16);
        }

        let ticks = parse_binary(&frame(&[full_packet(quote, extra, &depth)]));
        assert_eq!(ticks.len(), 1);
        let f = &ticks[0];

        assert_eq!(f.mode, Mode::Full);
        // close of zero means no change
        assert_eq!(f.change, Some(0.0));
        assert_eq!(f.last_trade_time.unwrap().timestamp(), 1_700_000_100);
        assert_eq!(f.exchange_timestamp.unwrap().timestamp(), 1_700_000_101);
        assert_eq!(f.oi, Some(900_000));
        assert_eq!(f.oi_day_high, Some(950_000));
        assert_eq!(f.oi_day_low, Some(850_000));

        let d = f.depth.unwrap();
        for i in 0..5 {
            assert_eq!(d.buy[i].quantity, depth[i].0);
            assert_eq!(unscale(d.buy[i].price, segments::NFO), depth[i].1);
            assert_eq!(d.buy[i].orders, depth[i].2);
            assert_eq!(d.sell[i].quantity, depth[i + 5].0);
            assert_eq!(unscale(d.sell[i].price, segments::NFO), depth[i + 5].1);
            assert_eq!(d.sell[i].orders, depth[i + 5].2);
        }
    }

    #[test]
    fn zero_timestamps_are_absent() {
        let t = token(40_000, segments::NFO);
        let quote = [t, 100, 1, 100, 1, 1, 1, 100, 100, 100, 100];
        let ticks = parse_binary(&frame(&[full_packet(quote, [0, 1, 1, 1, 0], &[(0, 0, 0); 10])]));
        assert!(ticks[0].last_trade_time.is_none());
        assert!(ticks[0].exchange_timestamp.is_none());
        assert_eq!(ticks[0].oi, Some(1));
    }

    #[test]
    fn mixed_frame_keeps_order_and_modes() {
        let a = token(1, segments::NSE);
        let b = token(2, segments::BSE);
        let fields = [b, 1_000, 1, 1_000, 1, 1, 1, 1_000, 1_000, 1_000, 1_000];
        let ticks = parse_binary(&frame(&[ltp_packet(a, 500), quote_packet(fields)]));

        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0].instrument_token, a);
        assert_eq!(ticks[0].mode, Mode::Ltp);
        assert_eq!(ticks[1].instrument_token, b);
        assert_eq!(ticks[1].mode, Mode::Quote);
    }

    #[test]
    fn unknown_lengths_are_skipped() {
        let a = token(1, segments::NSE);
        let unknown = vec![0u8; 12];
        let ticks = parse_binary(&frame(&[unknown, ltp_packet(a, 500)]));
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].instrument_token, a);

        assert!(matches!(
            parse_packet(&[0u8; 13]),
            Err(KiteError::Decode(_))
        ));
    }

    #[test]
    fn truncated_packet_keeps_earlier_ticks() {
        let a = token(1, segments::NSE);
        let mut bytes = frame(&[ltp_packet(a, 500), ltp_packet(a, 600)]);
        bytes.truncate(bytes.len() - 3);

        let ticks = parse_binary(&bytes);
        assert_eq!(ticks.len(), 1);
        assert_eq!(unscale(ticks[0].last_price, segments::NSE), 500);
    }

    #[test]
    fn declared_count_larger_than_frame() {
        let a = token(1, segments::NSE);
        let mut bytes = frame(&[ltp_packet(a, 500)]);
        bytes[1] = 5;
        assert_eq!(parse_binary(&bytes).len(), 1);
    }
}

//! Text message dispatcher.
//!
//! Besides binary ticks the ticker pushes JSON messages on the same socket:
//!
//! ```json
//! {"type": "order", "data": { "order_id": "…", "status": "COMPLETE", … }}
//! {"type": "error", "data": "Invalid instrument token"}
//! ```
//!
//! [`parse_text_message`] turns them into [`TextEvent`]s. Anything that is not
//! a JSON object, or carries an unknown `type`, is dropped without an event.
//! Order messages with empty `data` are dropped too.

use serde::Deserialize;
use serde_json::Value;

/// Error code reported for errors that come from the server's text channel
/// rather than from the transport.
pub const TEXT_ERROR_CODE: u16 = 0;

/// A decoded text message.
#[derive(Debug, Clone, PartialEq)]
pub enum TextEvent {
    /// An order changed state. Carries the raw `data` payload.
    OrderUpdate(Value),
    /// The server reported an error.
    Error {
        /// Always [`TEXT_ERROR_CODE`].
        code: u16,
        /// The `data` field of the message.
        reason: String,
    },
}

/// Decode a text message.
///
/// Returns `None` for malformed JSON, for anything but an object and for
/// message types this client does not handle.
pub fn parse_text_message(text: &str) -> Option<TextEvent> {
    let mut fields = match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(fields)) => fields,
        Ok(_) => {
            tracing::debug!("discarding non-object text message");
            return None;
        }
        Err(e) => {
            tracing::debug!(error = %e, "discarding malformed text message");
            return None;
        }
    };
    let data = fields.remove("data").unwrap_or(Value::Null);

    match fields.get("type").and_then(Value::as_str) {
        Some("order") if has_content(&data) => Some(TextEvent::OrderUpdate(data)),
        Some("error") => {
            let reason = match data {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            };
            Some(TextEvent::Error {
                code: TEXT_ERROR_CODE,
                reason,
            })
        }
        other => {
            tracing::trace!(kind = ?other, "ignoring text message");
            None
        }
    }
}

/// False for null, `false`, zero and empty strings, arrays and objects.
fn has_content(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

// ---------------------------------------------------------------------------
// Order Update data
// ---------------------------------------------------------------------------

/// Typed view of an order update payload.
///
/// Every field is optional; fields this struct does not name are ignored.
///
/// ```
/// use kite_rs::ws::order_update::OrderUpdate;
///
/// let payload = serde_json::json!({
///     "order_id": "151220000000000",
///     "status": "COMPLETE",
///     "tradingsymbol": "INFY",
///     "filled_quantity": 1,
///     "average_price": 1500.5
/// });
/// let update = OrderUpdate::from_value(&payload).unwrap();
/// assert_eq!(update.status.as_deref(), Some("COMPLETE"));
/// assert_eq!(update.filled_quantity, Some(1));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OrderUpdate {
    /// Order identifier.
    #[serde(default)]
    pub order_id: Option<String>,
    /// Exchange-generated order identifier.
    #[serde(default)]
    pub exchange_order_id: Option<String>,
    /// Parent order for multi-leg orders.
    #[serde(default)]
    pub parent_order_id: Option<String>,
    /// User or app that placed the order.
    #[serde(default)]
    pub placed_by: Option<String>,
    /// Order status (`"OPEN"`, `"COMPLETE"`, `"CANCELLED"`, `"REJECTED"`, …).
    #[serde(default)]
    pub status: Option<String>,
    /// Reason for the current status.
    #[serde(default)]
    pub status_message: Option<String>,
    /// Order variety (`"regular"`, `"amo"`, `"co"`, `"iceberg"`).
    #[serde(default)]
    pub variety: Option<String>,
    /// Exchange (`"NSE"`, `"NFO"`, …).
    #[serde(default)]
    pub exchange: Option<String>,
    /// Trading symbol.
    #[serde(default)]
    pub tradingsymbol: Option<String>,
    /// Instrument token.
    #[serde(default)]
    pub instrument_token: Option<u32>,
    /// `"BUY"` or `"SELL"`.
    #[serde(default)]
    pub transaction_type: Option<String>,
    /// `"MARKET"`, `"LIMIT"`, `"SL"`, `"SL-M"`.
    #[serde(default)]
    pub order_type: Option<String>,
    /// `"CNC"`, `"MIS"`, `"NRML"`.
    #[serde(default)]
    pub product: Option<String>,
    /// `"DAY"`, `"IOC"`, `"TTL"`.
    #[serde(default)]
    pub validity: Option<String>,
    /// Ordered quantity.
    #[serde(default)]
    pub quantity: Option<i64>,
    /// Quantity filled so far.
    #[serde(default)]
    pub filled_quantity: Option<i64>,
    /// Quantity still pending.
    #[serde(default)]
    pub pending_quantity: Option<i64>,
    /// Quantity cancelled.
    #[serde(default)]
    pub cancelled_quantity: Option<i64>,
    /// Limit price.
    #[serde(default)]
    pub price: Option<f64>,
    /// Trigger price for stop orders.
    #[serde(default)]
    pub trigger_price: Option<f64>,
    /// Average fill price.
    #[serde(default)]
    pub average_price: Option<f64>,
    /// Time the order was placed (exchange local time).
    #[serde(default)]
    pub order_timestamp: Option<String>,
    /// Time of the last exchange update.
    #[serde(default)]
    pub exchange_timestamp: Option<String>,
    /// Tag set by the placing app.
    #[serde(default)]
    pub tag: Option<String>,
}

impl OrderUpdate {
    /// Deserialize from an [`TextEvent::OrderUpdate`] payload.
    pub fn from_value(value: &Value) -> crate::error::Result<Self> {
        Ok(Self::deserialize(value)?)
    }
}

//! Subscription tracking and control messages.
//!
//! The [`SubscriptionRegistry`] records which instruments are streamed in
//! which [`Mode`] so that the exact same server-side state can be rebuilt
//! after a reconnect. [`ControlMessage`] is the JSON command sent over the
//! socket:
//!
//! ```json
//! {"a": "subscribe",   "v": [408065, 884737]}
//! {"a": "unsubscribe", "v": [408065]}
//! {"a": "mode",        "v": ["full", [884737]]}
//! ```

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::Result;
use crate::types::enums::Mode;

// ---------------------------------------------------------------------------
// Control message
// ---------------------------------------------------------------------------

/// A command sent to the ticker over the text channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "a", content = "v", rename_all = "lowercase")]
pub enum ControlMessage {
    /// Start streaming the instruments (in quote mode unless set otherwise).
    Subscribe(Vec<u32>),
    /// Stop streaming the instruments.
    Unsubscribe(Vec<u32>),
    /// Change the streaming mode of the instruments.
    Mode(Mode, Vec<u32>),
}

impl ControlMessage {
    /// Serialize to the JSON wire format.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Short name of the action, used in log lines and close reasons.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Subscribe(_) => "subscribe",
            Self::Unsubscribe(_) => "unsubscribe",
            Self::Mode(..) => "setting mode",
        }
    }

    /// Instrument tokens the command applies to.
    pub fn tokens(&self) -> &[u32] {
        match self {
            Self::Subscribe(tokens) | Self::Unsubscribe(tokens) | Self::Mode(_, tokens) => tokens,
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Instrument token → streaming mode, unique on token.
///
/// Tokens are kept sorted so that replayed commands are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionRegistry {
    modes: BTreeMap<u32, Mode>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a subscription. New tokens start in [`Mode::Quote`]; tokens
    /// already present keep their mode.
    pub fn subscribe(&mut self, tokens: &[u32]) {
        for &token in tokens {
            self.modes.entry(token).or_insert(Mode::Quote);
        }
    }

    /// Forget the tokens. Tokens that are not present are ignored.
    pub fn unsubscribe(&mut self, tokens: &[u32]) {
        for token in tokens {
            self.modes.remove(token);
        }
    }

    /// Record the mode of the tokens, adding tokens not yet present.
    pub fn set_mode(&mut self, mode: Mode, tokens: &[u32]) {
        for &token in tokens {
            self.modes.insert(token, mode);
        }
    }

    /// Apply a control message that was successfully sent.
    pub fn apply(&mut self, message: &ControlMessage) {
        match message {
            ControlMessage::Subscribe(tokens) => self.subscribe(tokens),
            ControlMessage::Unsubscribe(tokens) => self.unsubscribe(tokens),
            ControlMessage::Mode(mode, tokens) => self.set_mode(*mode, tokens),
        }
    }

    /// Mode of a token, if subscribed.
    pub fn mode(&self, token: u32) -> Option<Mode> {
        self.modes.get(&token).copied()
    }

    /// Number of subscribed tokens.
    pub fn len(&self) -> usize {
        self.modes.len()
    }

    /// Whether nothing is subscribed.
    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    /// Snapshot of the token → mode mapping.
    pub fn snapshot(&self) -> BTreeMap<u32, Mode> {
        self.modes.clone()
    }

    /// Commands that rebuild the registry on a fresh connection.
    ///
    /// One `subscribe` carrying every token, followed by one `mode` command
    /// per distinct mode (least verbose first). Empty when nothing is
    /// subscribed.
    pub fn resubscribe(&self) -> Vec<ControlMessage> {
        if self.modes.is_empty() {
            return Vec::new();
        }

        let mut by_mode: BTreeMap<Mode, Vec<u32>> = BTreeMap::new();
        for (&token, &mode) in &self.modes {
            by_mode.entry(mode).or_default().push(token);
        }

        let mut messages = Vec::with_capacity(by_mode.len() + 1);
        messages.push(ControlMessage::Subscribe(self.modes.keys().copied().collect()));
        messages.extend(
            by_mode
                .into_iter()
                .map(|(mode, tokens)| ControlMessage::Mode(mode, tokens)),
        );
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_messages_match_wire_format() {
        let sub = ControlMessage::Subscribe(vec![408_065, 884_737]);
        assert_eq!(sub.to_json().unwrap(), r#"{"a":"subscribe","v":[408065,884737]}"#);

        let unsub = ControlMessage::Unsubscribe(vec![408_065]);
        assert_eq!(unsub.to_json().unwrap(), r#"{"a":"unsubscribe","v":[408065]}"#);

        let mode = ControlMessage::Mode(Mode::Full, vec![884_737]);
        assert_eq!(mode.to_json().unwrap(), r#"{"a":"mode","v":["full",[884737]]}"#);
    }

    #[test]
    fn subscribe_defaults_to_quote_and_keeps_existing_mode() {
        let mut reg = SubscriptionRegistry::new();
        reg.set_mode(Mode::Full, &[1]);
        reg.subscribe(&[1, 2]);

        assert_eq!(reg.mode(1), Some(Mode::Full));
        assert_eq!(reg.mode(2), Some(Mode::Quote));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn unsubscribe_ignores_unknown_tokens() {
        let mut reg = SubscriptionRegistry::new();
        reg.subscribe(&[1, 2]);
        reg.set_mode(Mode::Ltp, &[2]);
        reg.unsubscribe(&[2, 99]);

        assert_eq!(reg.mode(2), None);
        assert_eq!(reg.mode(1), Some(Mode::Quote));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn set_mode_records_unsubscribed_tokens() {
        let mut reg = SubscriptionRegistry::new();
        reg.apply(&ControlMessage::Mode(Mode::Ltp, vec![7]));
        assert_eq!(reg.mode(7), Some(Mode::Ltp));
    }

    #[test]
    fn resubscribe_groups_by_mode() {
        let mut reg = SubscriptionRegistry::new();
        reg.subscribe(&[30, 10, 20, 40]);
        reg.set_mode(Mode::Full, &[20]);
        reg.set_mode(Mode::Ltp, &[40, 30]);

        assert_eq!(
            reg.resubscribe(),
            vec![
                ControlMessage::Subscribe(vec![10, 20, 30, 40]),
                ControlMessage::Mode(Mode::Ltp, vec![30, 40]),
                ControlMessage::Mode(Mode::Quote, vec![10]),
                ControlMessage::Mode(Mode::Full, vec![20]),
            ]
        );
    }

    #[test]
    fn resubscribe_of_empty_registry_sends_nothing() {
        assert!(SubscriptionRegistry::new().resubscribe().is_empty());
    }

    #[test]
    fn replaying_resubscribe_rebuilds_the_registry() {
        let mut reg = SubscriptionRegistry::new();
        reg.subscribe(&[1, 2, 3]);
        reg.set_mode(Mode::Full, &[3]);
        reg.unsubscribe(&[1]);

        let mut rebuilt = SubscriptionRegistry::new();
        for msg in reg.resubscribe() {
            rebuilt.apply(&msg);
        }
        assert_eq!(rebuilt, reg);
    }
}

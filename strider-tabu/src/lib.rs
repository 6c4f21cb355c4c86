// Copyright (C) 2024 Strider Robotics.
// All rights reserved.
//
// This software may be modified and distributed under the terms
// of the included license.  See the LICENSE file for details.

//! The tabu protocol multiplexes asynchronous command and telemetry
//! traffic over a single line-oriented serial stream. Every line is one
//! message: a topic event or a correlated reply, carrying a JSON
//! payload. Payloads too large for the transport's line buffer travel
//! over the chunked "file-transfer" sub-protocol.

use rand::{distributions::Alphanumeric, Rng};

mod bus;
pub mod help;
pub mod stats;

pub use self::bus::{Bus, TransferPolicy};

#[macro_use]
extern crate log;

/// Length of the random message identifier.
const ID_LENGTH: usize = 8;

/// Reserved topic carrying chunks of the big-message sub-protocol.
pub const TOPIC_TRANSFER: &str = "file-transfer";

/// Reserved topic serving the help registry.
pub const TOPIC_HELP: &str = "help";

/// Message address kind, derived solely from the leading sigil.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    /// Topic broadcast, sigil `=`. The address is a topic name.
    Event,
    /// Correlated reply, sigil `@`. The address is the id of the
    /// message being replied to.
    Reply,
}

impl AddressKind {
    fn sigil(&self) -> char {
        match self {
            AddressKind::Event => '=',
            AddressKind::Reply => '@',
        }
    }
}

#[derive(Debug)]
pub enum ParseError {
    /// Line was empty.
    EmptyLine,
    /// Leading sigil maps to no address kind.
    UnknownSigil(char),
    /// Address or id segment was not terminated.
    MissingDelimiter,
    /// Address segment was not a valid escaped string.
    InvalidAddress,
    /// Payload segment was not valid JSON.
    InvalidPayload(serde_json::Error),
}

impl std::error::Error for ParseError {}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyLine => write!(f, "empty line"),
            Self::UnknownSigil(sigil) => write!(f, "no such address kind: {:?}", sigil),
            Self::MissingDelimiter => write!(f, "no delimiter"),
            Self::InvalidAddress => write!(f, "invalid address segment"),
            Self::InvalidPayload(e) => write!(f, "invalid payload: {}", e),
        }
    }
}

/// A single tabu message.
///
/// The wire representation is one line:
///
/// ```text
/// <sigil><address>/<id>/<json-payload>
/// ```
///
/// Messages are constructed fresh with a new random id for outbound
/// traffic, or parsed from a received line. Content is immutable once
/// built.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub kind: AddressKind,
    pub address: String,
    pub id: String,
    pub content: serde_json::Value,
}

impl Message {
    /// Construct an event message addressed to a topic.
    pub fn event(topic: impl Into<String>, content: serde_json::Value) -> Self {
        Self {
            kind: AddressKind::Event,
            address: topic.into(),
            id: random_id(),
            content,
        }
    }

    /// Construct a reply correlated to an earlier message.
    pub fn reply_to(original: &Message, content: serde_json::Value) -> Self {
        Self {
            kind: AddressKind::Reply,
            address: original.id.clone(),
            id: random_id(),
            content,
        }
    }

    /// Parse a message from a received line. Inverse of [`Message::text`].
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let mut chars = line.chars();
        let kind = match chars.next() {
            Some('=') => AddressKind::Event,
            Some('@') => AddressKind::Reply,
            Some(other) => return Err(ParseError::UnknownSigil(other)),
            None => return Err(ParseError::EmptyLine),
        };

        let body = &line[1..];
        let address_end = body.find('/').ok_or(ParseError::MissingDelimiter)?;
        // The address may carry \u escapes; run it through a string
        // decode rather than taking the raw bytes.
        let address = serde_json::from_str::<String>(&format!("\"{}\"", &body[..address_end]))
            .map_err(|_| ParseError::InvalidAddress)?;

        let rest = &body[address_end + 1..];
        let id_end = rest.find('/').ok_or(ParseError::MissingDelimiter)?;
        let id = rest[..id_end].to_owned();

        let content =
            serde_json::from_str(&rest[id_end + 1..]).map_err(ParseError::InvalidPayload)?;

        Ok(Self {
            kind,
            address,
            id,
            content,
        })
    }

    /// Form the wire line representing this message.
    pub fn text(&self) -> String {
        format!("{}{}/{}/{}", self.kind.sigil(), self.address, self.id, self.content)
    }

    /// Address prefixed with its sigil, as carried by transfer chunks.
    fn sigil_address(&self) -> String {
        format!("{}{}", self.kind.sigil(), self.address)
    }

    /// Numeric payload field, if present.
    pub fn number(&self, key: &str) -> Option<f64> {
        self.content.get(key).and_then(|v| v.as_f64())
    }

    /// Integer payload field, if present.
    pub fn integer(&self, key: &str) -> Option<i64> {
        self.content.get(key).and_then(|v| v.as_i64())
    }

    /// String payload field, if present.
    pub fn string(&self, key: &str) -> Option<&str> {
        self.content.get(key).and_then(|v| v.as_str())
    }

    /// Boolean payload field, if present.
    pub fn boolean(&self, key: &str) -> Option<bool> {
        self.content.get(key).and_then(|v| v.as_bool())
    }
}

/// Create a random alphanumeric message identifier.
fn random_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LENGTH)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_is_alphanumeric() {
        let id = random_id();

        assert_eq!(id.len(), ID_LENGTH);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn event_round_trip() {
        let msg = Message::event("ping", json!({"text": "hi"}));
        let parsed = Message::parse(&msg.text()).unwrap();

        assert_eq!(parsed, msg);
    }

    #[test]
    fn reply_round_trip() {
        let original = Message::event("enc", json!([104, 93]));
        let msg = Message::reply_to(&original, json!({"ok": true}));
        let parsed = Message::parse(&msg.text()).unwrap();

        assert_eq!(parsed.kind, AddressKind::Reply);
        assert_eq!(parsed.address, original.id);
        assert_eq!(parsed, msg);
    }

    #[test]
    fn escaped_address_survives() {
        let parsed = Message::parse("=\\u0070ing/A1b2C3d4/{}").unwrap();

        assert_eq!(parsed.address, "ping");
    }

    #[test]
    fn malformed_lines_are_rejected() {
        assert!(matches!(Message::parse(""), Err(ParseError::EmptyLine)));
        assert!(matches!(
            Message::parse("!topic/id/{}"),
            Err(ParseError::UnknownSigil('!'))
        ));
        assert!(matches!(
            Message::parse("=topic-without-delimiter"),
            Err(ParseError::MissingDelimiter)
        ));
        assert!(matches!(
            Message::parse("=topic/id/{not json"),
            Err(ParseError::InvalidPayload(_))
        ));
    }

    #[test]
    fn payload_accessors() {
        let msg = Message::event(
            "pid_test",
            json!({"kP": 1.5, "ms": 2000, "useVoltage": false, "note": "x"}),
        );

        assert_eq!(msg.number("kP"), Some(1.5));
        assert_eq!(msg.integer("ms"), Some(2000));
        assert_eq!(msg.boolean("useVoltage"), Some(false));
        assert_eq!(msg.string("note"), Some("x"));
        assert_eq!(msg.number("missing"), None);
    }
}

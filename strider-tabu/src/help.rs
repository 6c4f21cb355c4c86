// Copyright (C) 2024 Strider Robotics.
// All rights reserved.
//
// This software may be modified and distributed under the terms
// of the included license.  See the LICENSE file for details.

//! Descriptor builders for the help registry.
//!
//! A help entry is an array of UI-hint descriptors consumed by the
//! operator console: labels, input fields keyed into the request
//! payload, and a reply action describing what the console should do
//! with the reply. Metadata only; the core never interprets these.

use serde_json::{json, Value};

/// Static text shown above a topic's input fields.
pub fn label(text: &str) -> Value {
    json!({"kind": "label", "text": text})
}

/// Numeric input field stored under `key` in the request payload.
pub fn number(key: &str) -> Value {
    json!({"kind": "number", "key": key, "label": key})
}

/// String input field stored under `key` in the request payload.
pub fn string(key: &str) -> Value {
    json!({"kind": "string", "key": key, "label": key})
}

/// Boolean input field stored under `key` in the request payload.
pub fn boolean(key: &str) -> Value {
    json!({"kind": "bool", "key": key, "label": key})
}

/// Visual grouping separator.
pub fn group(text: &str) -> Value {
    json!({"kind": "group", "label": text})
}

/// Console-side action to run against the reply payload.
pub fn reply_action(script: &str) -> Value {
    json!({"kind": "reply_action", "do": script})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_descriptors_carry_key_and_label() {
        let descriptor = number("kP");

        assert_eq!(descriptor["kind"], "number");
        assert_eq!(descriptor["key"], "kP");
        assert_eq!(descriptor["label"], "kP");
    }
}

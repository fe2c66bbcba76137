//! Event decoding for Tally.
//!
//! An event payload is a JSON object carrying an action name and a timed
//! amount, e.g. `{"action": "jump", "time": 100}`. Keys are matched without
//! regard to ASCII case, so `{"AcTion": "jump", "tIMe": 100}` decodes to the
//! same event. Action values keep their case: `"Jump"` and `"jump"` are
//! different actions.

use std::fmt;

use serde::de::{self, Deserializer, IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TallyError};

/// Payload key holding the action name.
pub const ACTION_KEY: &str = "action";

/// Payload key holding the amount.
pub const AMOUNT_KEY: &str = "time";

/// A decoded event: one timed sample for an action.
///
/// Events are immutable once built. Serializing an event produces the
/// canonical lowercase payload that [`decode`] accepts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Event {
    action: String,
    #[serde(rename = "time")]
    amount: u64,
}

impl Event {
    /// Create a new event.
    pub fn new(action: impl Into<String>, amount: u64) -> Self {
        Self {
            action: action.into(),
            amount,
        }
    }

    /// The action name. May be empty.
    pub fn action(&self) -> &str {
        &self.action
    }

    /// The timed amount.
    pub fn amount(&self) -> u64 {
        self.amount
    }

    /// Split the event into its action name and amount.
    pub fn into_parts(self) -> (String, u64) {
        (self.action, self.amount)
    }
}

/// Decode a raw payload into an [`Event`].
///
/// Fails with [`TallyError::Decode`] when the payload is not a single JSON
/// object, when the amount is missing, or when it is not a non-negative
/// integer that fits in a u64. A missing or `null` action decodes to the
/// empty string.
pub fn decode(payload: impl AsRef<[u8]>) -> Result<Event> {
    serde_json::from_slice(payload.as_ref()).map_err(TallyError::decode)
}

/// Which event field a payload key refers to.
enum Field {
    Action,
    Amount,
    Other,
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct FieldVisitor;

        impl Visitor<'_> for FieldVisitor {
            type Value = Field;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an event field name")
            }

            fn visit_str<E: de::Error>(self, key: &str) -> std::result::Result<Field, E> {
                if key.eq_ignore_ascii_case(ACTION_KEY) {
                    Ok(Field::Action)
                } else if key.eq_ignore_ascii_case(AMOUNT_KEY) {
                    Ok(Field::Amount)
                } else {
                    Ok(Field::Other)
                }
            }
        }

        deserializer.deserialize_identifier(FieldVisitor)
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EventVisitor;

        impl<'de> Visitor<'de> for EventVisitor {
            type Value = Event;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an event object with an action and a time")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<Event, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut action: Option<String> = None;
                let mut amount: Option<u64> = None;

                // Later keys win; null leaves the field as it was.
                while let Some(field) = map.next_key::<Field>()? {
                    match field {
                        Field::Action => {
                            if let Some(value) = map.next_value::<Option<String>>()? {
                                action = Some(value);
                            }
                        }
                        Field::Amount => {
                            if let Some(value) = map.next_value::<Option<u64>>()? {
                                amount = Some(value);
                            }
                        }
                        Field::Other => {
                            map.next_value::<IgnoredAny>()?;
                        }
                    }
                }

                let amount =
                    amount.ok_or_else(|| <A::Error as de::Error>::missing_field(AMOUNT_KEY))?;
                Ok(Event {
                    action: action.unwrap_or_default(),
                    amount,
                })
            }
        }

        deserializer.deserialize_map(EventVisitor)
    }
}

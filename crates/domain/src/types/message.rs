//! Outbound message model
//!
//! A [`Message`] is what application code (or the diagnostics flow) hands to a
//! dispatcher. Its JSON form is the wire shape posted to the messages
//! endpoint:
//!
//! ```json
//! {
//!   "id": "0190c7a0-...",
//!   "type": "DATA",
//!   "source": "device-1",
//!   "priority": "HIGH",
//!   "reliability": "GUARANTEED_DELIVERY",
//!   "eventTime": "2026-01-01T00:00:00Z",
//!   "format": "urn:com:example:thermometer:attributes",
//!   "dataItems": { "temp": 21.5, "unit": "C" }
//! }
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{CloudLinkError, Result};

/// Kind of message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Data,
    Alert,
    Request,
    Response,
}

/// Dispatch priority; variants are declared lowest first so the derived
/// ordering matches drain order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Lowest,
    Low,
    #[default]
    Medium,
    High,
    Highest,
}

/// Delivery policy on failure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reliability {
    /// Dropped (and reported) on the first failed delivery
    #[default]
    BestEffort,
    /// Kept at its queue position and retried up to the attempt bound
    GuaranteedDelivery,
}

/// A single named value inside a message
#[derive(Debug, Clone, PartialEq)]
pub struct DataItem {
    pub name: String,
    pub value: Value,
}

/// Ordered mapping of item name to value; serialized as a JSON object that
/// preserves insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataItems(Vec<DataItem>);

impl DataItems {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Insert or replace an item, keeping the original position on replace.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|item| item.name == name) {
            Some(existing) => existing.value = value,
            None => self.0.push(DataItem { name, value }),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.iter().find(|item| item.name == name).map(|item| &item.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DataItem> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for DataItems {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut items = Self::new();
        for (name, value) in iter {
            items.insert(name, value);
        }
        items
    }
}

impl Serialize for DataItems {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for item in &self.0 {
            map.serialize_entry(&item.name, &item.value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for DataItems {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct ItemsVisitor;

        impl<'de> Visitor<'de> for ItemsVisitor {
            type Value = DataItems;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object of data items")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<DataItems, A::Error> {
                let mut items = DataItems::new();
                while let Some((name, value)) = access.next_entry::<String, Value>()? {
                    items.insert(name, value);
                }
                Ok(items)
            }
        }

        deserializer.deserialize_map(ItemsVisitor)
    }
}

/// Outbound message
///
/// Immutable once queued; the dispatcher tracks delivery attempts alongside
/// it rather than inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub reliability: Reliability,
    pub event_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default)]
    pub data_items: DataItems,
}

impl Message {
    /// Create an empty message of the given type stamped with a fresh id and
    /// the current time.
    pub fn new(message_type: MessageType) -> Self {
        Self {
            id: Uuid::now_v7(),
            message_type,
            source: String::new(),
            destination: None,
            sender: None,
            priority: Priority::default(),
            reliability: Reliability::default(),
            event_time: Utc::now(),
            format: None,
            data_items: DataItems::new(),
        }
    }

    /// DATA message carrying attribute values for `format`
    pub fn data(format: impl Into<String>) -> Self {
        Self::new(MessageType::Data).with_format(format)
    }

    /// ALERT message for `format`
    pub fn alert(format: impl Into<String>) -> Self {
        Self::new(MessageType::Alert).with_format(format)
    }

    /// REQUEST message addressed to `destination`
    pub fn request(destination: impl Into<String>) -> Self {
        Self::new(MessageType::Request).with_destination(destination)
    }

    /// RESPONSE message addressed to `destination`
    pub fn response(destination: impl Into<String>) -> Self {
        Self::new(MessageType::Response).with_destination(destination)
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_reliability(mut self, reliability: Reliability) -> Self {
        self.reliability = reliability;
        self
    }

    pub fn with_event_time(mut self, event_time: DateTime<Utc>) -> Self {
        self.event_time = event_time;
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_item(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data_items.insert(name, value);
        self
    }

    pub fn is_guaranteed(&self) -> bool {
        self.reliability == Reliability::GuaranteedDelivery
    }

    /// Check the shape rules every queued message must satisfy.
    ///
    /// # Errors
    /// Returns `CloudLinkError::Validation` describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.source.trim().is_empty() {
            return Err(invalid(self, "source is required"));
        }

        match self.message_type {
            MessageType::Data | MessageType::Alert => {
                if self.format.as_deref().map_or(true, |f| f.trim().is_empty()) {
                    return Err(invalid(self, "format is required"));
                }
                if self.message_type == MessageType::Data && self.data_items.is_empty() {
                    return Err(invalid(self, "at least one data item is required"));
                }
            }
            MessageType::Request | MessageType::Response => {
                if self.destination.as_deref().map_or(true, |d| d.trim().is_empty()) {
                    return Err(invalid(self, "destination is required"));
                }
            }
        }

        if self.data_items.iter().any(|item| item.name.trim().is_empty()) {
            return Err(invalid(self, "data item names must not be empty"));
        }

        Ok(())
    }
}

fn invalid(message: &Message, reason: &str) -> CloudLinkError {
    CloudLinkError::Validation(format!(
        "{:?} message {}: {reason}",
        message.message_type, message.id
    ))
}

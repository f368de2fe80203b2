//! Device-model field specs used for queue-time validation
//!
//! The model parser lives outside this crate. It registers the already
//! validated field list of each format here; the dispatchers only check
//! messages against what was registered.

use std::sync::Arc;

use chrono::DateTime;
use cloudlink_domain::{CloudLinkError, Message, Result};
use dashmap::DashMap;
use serde_json::Value;

/// Value type declared for a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Number,
    Boolean,
    String,
    /// Epoch milliseconds or an RFC 3339 string
    DateTime,
}

impl FieldKind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::String => value.is_string(),
            Self::DateTime => match value {
                Value::Number(n) => n.is_i64() || n.is_u64(),
                Value::String(s) => DateTime::parse_from_rfc3339(s).is_ok(),
                _ => false,
            },
        }
    }
}

/// One declared field of a device-model format
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    /// Inclusive numeric bounds
    pub range: Option<(f64, f64)>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self { name: name.into(), kind, range: None }
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.range = Some((min, max));
        self
    }

    fn check(&self, value: &Value) -> std::result::Result<(), String> {
        if !self.kind.accepts(value) {
            return Err(format!("'{}' expects {:?}, got {value}", self.name, self.kind));
        }
        if let (Some((min, max)), Some(number)) = (self.range, value.as_f64()) {
            if number < min || number > max {
                return Err(format!("'{}' = {number} outside [{min}, {max}]", self.name));
            }
        }
        Ok(())
    }
}

/// Per-client cache of field specs keyed by format URN
#[derive(Debug, Default)]
pub struct DeviceModelCache {
    formats: DashMap<String, Arc<[FieldSpec]>>,
}

impl DeviceModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the fields of `format`.
    pub fn register(&self, format: impl Into<String>, fields: Vec<FieldSpec>) {
        self.formats.insert(format.into(), fields.into());
    }

    pub fn fields(&self, format: &str) -> Option<Arc<[FieldSpec]>> {
        self.formats.get(format).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, format: &str) -> bool {
        self.formats.contains_key(format)
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    /// Check `message`'s data items against the specs of its format.
    /// Formats nobody registered pass unchecked.
    ///
    /// # Errors
    /// Returns `CloudLinkError::Validation` naming the first offending item.
    pub fn validate(&self, message: &Message) -> Result<()> {
        let Some(format) = message.format.as_deref() else {
            return Ok(());
        };
        let Some(fields) = self.fields(format) else {
            return Ok(());
        };

        for item in message.data_items.iter() {
            let spec = fields.iter().find(|spec| spec.name == item.name).ok_or_else(|| {
                CloudLinkError::Validation(format!(
                    "'{}' is not a field of {format}",
                    item.name
                ))
            })?;
            spec.check(&item.value)
                .map_err(|reason| CloudLinkError::Validation(format!("{format}: {reason}")))?;
        }
        Ok(())
    }
}

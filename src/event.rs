//! Event payloads and the fields we derive from them.
//!
//! Producers send loosely-structured JSON objects. We only insist on three
//! fields (`event_uuid`, `event_name`, `created_at`); anything else is carried
//! through to the stored object untouched.

use chrono::{DateTime, Datelike};
use serde_json::{Map, Value};

use crate::error::ProcessingError;

const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// A decoded, not yet validated, event object.
#[derive(Clone, Debug, PartialEq)]
pub struct RawEvent {
    fields: Map<String, Value>,
}

impl RawEvent {
    pub fn new(fields: Map<String, Value>) -> Self {
        RawEvent { fields }
    }

    /// The event uuid, if present and a string. Used to label errors even
    /// when the rest of the event is invalid.
    pub fn event_uuid(&self) -> Option<&str> {
        self.fields.get("event_uuid").and_then(Value::as_str)
    }

    /// Validate the required fields and compute the derived ones.
    pub fn enrich(self) -> Result<EnrichedEvent, ProcessingError> {
        let event_uuid = match self.fields.get("event_uuid") {
            Some(Value::String(u)) if !u.is_empty() && !u.contains('/') => u.clone(),
            Some(Value::String(u)) => {
                return Err(ProcessingError::schema(
                    Some(u.as_str()),
                    format!("`event_uuid` must be non-empty and free of `/`, got `{u}`"),
                ))
            }
            Some(_) => {
                return Err(ProcessingError::schema(None, "`event_uuid` must be a string"))
            }
            None => return Err(ProcessingError::schema(None, "missing `event_uuid`")),
        };
        let uuid = Some(event_uuid.as_str());

        let event_name = match self.fields.get("event_name") {
            Some(Value::String(n)) => n,
            Some(_) => return Err(ProcessingError::schema(uuid, "`event_name` must be a string")),
            None => return Err(ProcessingError::schema(uuid, "missing `event_name`")),
        };
        let (event_type, event_subtype) = split_event_name(event_name)
            .ok_or_else(|| {
                ProcessingError::schema(
                    uuid,
                    format!("`event_name` must look like `<type>:<subtype>`, got `{event_name}`"),
                )
            })?;
        let (event_type, event_subtype) = (event_type.to_owned(), event_subtype.to_owned());

        let created_at = match self.fields.get("created_at") {
            Some(v) => v.as_i64().ok_or_else(|| {
                ProcessingError::schema(uuid, format!("`created_at` must be an integer, got {v}"))
            })?,
            None => return Err(ProcessingError::schema(uuid, "missing `created_at`")),
        };
        let created_datetime = format_epoch_seconds(created_at).ok_or_else(|| {
            ProcessingError::schema(
                uuid,
                format!("`created_at` {created_at} is not a representable timestamp"),
            )
        })?;

        let mut fields = self.fields;
        fields.insert(
            "created_datetime".to_owned(),
            Value::String(created_datetime.clone()),
        );
        fields.insert("event_type".to_owned(), Value::String(event_type.clone()));
        fields.insert(
            "event_subtype".to_owned(),
            Value::String(event_subtype.clone()),
        );

        Ok(EnrichedEvent {
            event_uuid,
            event_type,
            event_subtype,
            created_datetime,
            fields,
        })
    }
}

/// Split `type:subtype`. Exactly one colon with text on both sides.
pub fn split_event_name(name: &str) -> Option<(&str, &str)> {
    let (ty, subty) = name.split_once(':')?;

    if ty.is_empty() || subty.is_empty() || subty.contains(':') {
        return None;
    }

    Some((ty, subty))
}

/// Render epoch seconds as a naive UTC ISO-8601 timestamp. Years outside
/// 1..=9999 are refused since they don't survive a round trip through the
/// four-digit format.
pub fn format_epoch_seconds(secs: i64) -> Option<String> {
    let dt = DateTime::from_timestamp(secs, 0)?;

    if !(1..=9999).contains(&dt.year()) {
        return None;
    }

    Some(dt.naive_utc().format(DATETIME_FORMAT).to_string())
}

/// An event that passed validation, with its derived fields filled in.
#[derive(Clone, Debug, PartialEq)]
pub struct EnrichedEvent {
    event_uuid: String,
    event_type: String,
    event_subtype: String,
    created_datetime: String,
    fields: Map<String, Value>,
}

impl EnrichedEvent {
    pub fn event_uuid(&self) -> &str {
        &self.event_uuid
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn event_subtype(&self) -> &str {
        &self.event_subtype
    }

    pub fn created_datetime(&self) -> &str {
        &self.created_datetime
    }

    #[cfg(test)]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.fields)
    }

    pub fn primary_key(&self, key_prefix: &str) -> StorageKey {
        StorageKey(format!(
            "{}/{}/{}/{}.json",
            key_prefix, self.event_type, self.event_subtype, self.event_uuid
        ))
    }

    /// The prefix that the `prefix-listing` policy enumerates.
    pub fn primary_listing_prefix(&self, key_prefix: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            key_prefix, self.event_type, self.event_subtype, self.event_uuid
        )
    }

    pub fn duplicate_key(&self, duplicate_folder: &str) -> StorageKey {
        StorageKey(format!("{}/{}.json", duplicate_folder, self.event_uuid))
    }
}

/// An object-store key.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

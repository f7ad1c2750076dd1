//! The Kinesis event envelope that Lambda hands us.
//!
//! We don't use a typed `data: Vec<u8>` field because a single bad record must
//! not make the whole batch fail to deserialize: the payload is kept as a raw
//! JSON value and decoded per record.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use serde_json::Value;

use crate::{config::PayloadEncoding, error::ProcessingError, event::RawEvent};

#[derive(Clone, Debug, Default, Deserialize)]
pub struct KinesisBatch {
    #[serde(rename = "Records", default)]
    pub records: Vec<KinesisRecord>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct KinesisRecord {
    #[serde(rename = "eventID", default)]
    pub event_id: Option<String>,

    #[serde(default)]
    pub kinesis: KinesisPayload,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KinesisPayload {
    #[serde(default)]
    pub data: Option<Value>,

    #[serde(default)]
    pub sequence_number: Option<String>,

    #[serde(default)]
    pub partition_key: Option<String>,
}

impl KinesisRecord {
    /// Something to identify the record by in logs when the payload is
    /// unreadable.
    pub fn record_id(&self) -> Option<&str> {
        self.event_id
            .as_deref()
            .or(self.kinesis.sequence_number.as_deref())
    }

    pub fn decode(&self, encoding: PayloadEncoding) -> Result<RawEvent, ProcessingError> {
        let data = self
            .kinesis
            .data
            .as_ref()
            .ok_or_else(|| ProcessingError::Decode("record has no `kinesis.data`".to_owned()))?;

        let value: Value = match (encoding, data) {
            (PayloadEncoding::Base64, Value::String(text)) => {
                let bytes = STANDARD
                    .decode(text.trim())
                    .map_err(|e| ProcessingError::Decode(format!("bad base64: {e}")))?;
                serde_json::from_slice(&bytes)
                    .map_err(|e| ProcessingError::Decode(format!("bad JSON: {e}")))?
            }

            (PayloadEncoding::Base64, other) => {
                return Err(ProcessingError::Decode(format!(
                    "expected base64 text in `kinesis.data`, got {}",
                    json_kind(other)
                )))
            }

            (PayloadEncoding::Json, Value::String(text)) => serde_json::from_str(text)
                .map_err(|e| ProcessingError::Decode(format!("bad JSON: {e}")))?,

            (PayloadEncoding::Json, other) => other.clone(),
        };

        match value {
            Value::Object(fields) => Ok(RawEvent::new(fields)),
            other => Err(ProcessingError::Decode(format!(
                "payload must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

//! Per-record failure taxonomy.
//!
//! Losing the dedup race is not represented here: the conditional insert
//! reports it as [`crate::dedup::InsertOutcome::AlreadyExists`] and the record
//! is routed to the duplicate folder.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessingError {
    /// The transport payload could not be turned into a JSON object.
    #[error("cannot decode record payload: {0}")]
    Decode(String),

    /// The decoded object is missing a required field or has a bad value.
    #[error("invalid event{}: {message}", uuid_suffix(.event_uuid))]
    Schema {
        event_uuid: Option<String>,
        message: String,
    },

    /// The object store or the dedup table failed.
    #[error("storage failure for event `{event_uuid}`: {source:#}")]
    Storage {
        event_uuid: String,
        #[source]
        source: anyhow::Error,
    },
}

fn uuid_suffix(event_uuid: &Option<String>) -> String {
    match event_uuid {
        Some(u) => format!(" `{u}`"),
        None => String::new(),
    }
}

impl ProcessingError {
    pub(crate) fn schema<S: Into<String>>(event_uuid: Option<&str>, message: S) -> Self {
        ProcessingError::Schema {
            event_uuid: event_uuid.map(str::to_owned),
            message: message.into(),
        }
    }

    pub(crate) fn storage(event_uuid: &str, source: anyhow::Error) -> Self {
        ProcessingError::Storage {
            event_uuid: event_uuid.to_owned(),
            source,
        }
    }

    /// Short label used in logs and batch reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessingError::Decode(_) => "decode",
            ProcessingError::Schema { .. } => "schema",
            ProcessingError::Storage { .. } => "storage",
        }
    }

    pub fn event_uuid(&self) -> Option<&str> {
        match self {
            ProcessingError::Decode(_) => None,
            ProcessingError::Schema { event_uuid, .. } => event_uuid.as_deref(),
            ProcessingError::Storage { event_uuid, .. } => Some(event_uuid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_uuid() {
        let e = ProcessingError::schema(Some("abc"), "missing `event_name`");
        assert_eq!(e.to_string(), "invalid event `abc`: missing `event_name`");
        assert_eq!(e.kind(), "schema");

        let e = ProcessingError::schema(None, "missing `event_uuid`");
        assert_eq!(e.to_string(), "invalid event: missing `event_uuid`");
        assert_eq!(e.event_uuid(), None);

        let e = ProcessingError::storage("abc", anyhow::anyhow!("throttled"));
        assert_eq!(e.event_uuid(), Some("abc"));
        assert_eq!(e.kind(), "storage");
    }
}

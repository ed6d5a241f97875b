//! Unified error handling for the activity-map library.
//!
//! Every fallible operation in the store, the reducer pipeline and the remote
//! adapter returns [`Result<T>`]. Conditions that are not failures (an activity
//! without GPS data, a candidate batch truncated by the cap) are not modelled
//! here; they surface as `has_track = false` and `SyncReport::partial_batch`.

use std::path::PathBuf;

use thiserror::Error;

use crate::ActivityId;

/// Unified error type for activity-map operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Network, auth or protocol failure talking to the remote source.
    #[error("remote source unavailable: {message}")]
    RemoteUnavailable {
        message: String,
        status_code: Option<u16>,
    },

    /// Operator asked to replace or delete an id absent from the store.
    #[error("activity {0} not found in the record store")]
    RecordNotFound(ActivityId),

    /// Expected side-file (detail, raw track, reduced trace) is absent.
    #[error("missing side-file for activity {activity_id}: {}", path.display())]
    MissingSideFile {
        activity_id: ActivityId,
        path: PathBuf,
    },

    /// Remote payload could not be normalized into an activity.
    #[error("invalid activity payload: {0}")]
    InvalidPayload(String),

    /// Record-store row could not be interpreted.
    #[error("invalid record at row {row}: {message}")]
    InvalidRecord { row: usize, message: String },

    /// GPX document could not be parsed.
    #[error("gpx error: {0}")]
    Gpx(#[from] quick_xml::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration is unusable (e.g. no type mappings).
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for activity-map operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn remote(message: impl Into<String>) -> Self {
        Error::RemoteUnavailable {
            message: message.into(),
            status_code: None,
        }
    }
}

/// Extension trait for converting Option to [`Error`].
pub trait OptionExt<T> {
    /// Convert Option to Result with a record-not-found error.
    fn ok_or_not_found(self, id: &ActivityId) -> Result<T>;

    /// Convert Option to Result with an invalid-payload error naming the field.
    fn ok_or_missing_field(self, field: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, id: &ActivityId) -> Result<T> {
        self.ok_or_else(|| Error::RecordNotFound(id.clone()))
    }

    fn ok_or_missing_field(self, field: &str) -> Result<T> {
        self.ok_or_else(|| Error::InvalidPayload(format!("missing field '{}'", field)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::RecordNotFound(ActivityId::from(7));
        assert_eq!(err.to_string(), "activity 7 not found in the record store");

        let err = Error::MissingSideFile {
            activity_id: ActivityId::from(42),
            path: PathBuf::from("data/json/x.json"),
        };
        assert!(err.to_string().contains("42"));
        assert!(err.to_string().contains("data/json/x.json"));
    }

    #[test]
    fn test_option_ext() {
        let none: Option<i32> = None;
        let result = none.ok_or_not_found(&ActivityId::from(3));
        assert!(matches!(result, Err(Error::RecordNotFound(id)) if id.as_str() == "3"));

        let none: Option<i32> = None;
        let result = none.ok_or_missing_field("activityId");
        assert!(matches!(result, Err(Error::InvalidPayload(msg)) if msg.contains("activityId")));
    }
}

//! Remote activity source boundary.
//!
//! The sync orchestrator only sees the [`RemoteSource`] trait and the two
//! normalized shapes below. Whatever the service returns is funnelled through
//! [`normalize_payload`] / [`summarize_payload`], the only place that knows
//! about field-location differences between the list and detail endpoints:
//!
//! | field      | list payload              | detail payload                     |
//! |------------|---------------------------|------------------------------------|
//! | type       | `activityType.typeKey`    | `activityTypeDTO.typeKey`          |
//! | start      | `startTimeLocal`          | `summaryDTO.startTimeLocal`        |
//! | distance   | `distance` (m)            | `summaryDTO.distance` (m)          |
//! | duration   | `duration` (s)            | `summaryDTO.duration` (s)          |

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;

use crate::{ActivityId, Error, OptionExt, Result};

/// One entry of a date-ranged activity listing.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteActivitySummary {
    pub id: ActivityId,
    /// Local wall-clock start of the activity.
    pub start_local: NaiveDateTime,
}

/// Full activity as returned by the detail endpoint, normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteActivityDetail {
    pub id: ActivityId,
    pub name: String,
    pub activity_type: String,
    pub start_local: NaiveDateTime,
    /// Meters; `None` for activities without a distance (e.g. strength).
    pub distance_m: Option<f64>,
    /// Seconds.
    pub duration_s: Option<f64>,
    /// Untouched payload, persisted as the detail side-file.
    pub raw: Value,
}

/// Data source for activities.
///
/// Implementations block until the request completes. `list_activities`
/// returns activities starting on or after `from` (and on or before `to`,
/// when given) sorted ascending by start, at most `limit` of them.
pub trait RemoteSource {
    fn list_activities(
        &self,
        from: NaiveDate,
        to: Option<NaiveDate>,
        limit: usize,
    ) -> Result<Vec<RemoteActivitySummary>>;

    /// `Ok(None)` when the service reports the activity does not exist.
    fn fetch_detail(&self, id: &ActivityId) -> Result<Option<RemoteActivityDetail>>;

    /// Raw GPX bytes; empty when the activity has no GPS data.
    fn fetch_track(&self, id: &ActivityId) -> Result<Vec<u8>>;
}

impl<T: RemoteSource + ?Sized> RemoteSource for &T {
    fn list_activities(
        &self,
        from: NaiveDate,
        to: Option<NaiveDate>,
        limit: usize,
    ) -> Result<Vec<RemoteActivitySummary>> {
        (**self).list_activities(from, to, limit)
    }

    fn fetch_detail(&self, id: &ActivityId) -> Result<Option<RemoteActivityDetail>> {
        (**self).fetch_detail(id)
    }

    fn fetch_track(&self, id: &ActivityId) -> Result<Vec<u8>> {
        (**self).fetch_track(id)
    }
}

// ============================================================================
// Payload normalization
// ============================================================================

/// Normalize an activity payload from either the list or the detail endpoint.
pub fn normalize_payload(raw: Value) -> Result<RemoteActivityDetail> {
    let summary = raw.get("summaryDTO");

    let id = read_id(&raw)?;
    let start_local = read_start(&raw)?;

    let name = raw
        .get("activityName")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let activity_type = ["activityType", "activityTypeDTO"]
        .iter()
        .find_map(|key| raw.get(key)?.get("typeKey")?.as_str())
        .unwrap_or("uncategorized")
        .to_string();

    let distance_m = number_field(&raw, summary, "distance");
    let duration_s = number_field(&raw, summary, "duration");

    Ok(RemoteActivityDetail {
        id,
        name,
        activity_type,
        start_local,
        distance_m,
        duration_s,
        raw,
    })
}

/// Extract the listing fields (id, start) from an activity payload.
pub fn summarize_payload(raw: &Value) -> Result<RemoteActivitySummary> {
    Ok(RemoteActivitySummary {
        id: read_id(raw)?,
        start_local: read_start(raw)?,
    })
}

fn read_id(raw: &Value) -> Result<ActivityId> {
    match raw.get("activityId") {
        Some(Value::Number(n)) => Ok(ActivityId::new(n.to_string())),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(ActivityId::new(s.as_str())),
        _ => Err(Error::InvalidPayload("missing field 'activityId'".to_string())),
    }
}

fn read_start(raw: &Value) -> Result<NaiveDateTime> {
    let text = raw
        .get("startTimeLocal")
        .or_else(|| raw.get("summaryDTO")?.get("startTimeLocal"))
        .and_then(Value::as_str)
        .ok_or_missing_field("startTimeLocal")?;
    parse_local_time(text)
}

/// Numeric field at the top level, falling back to the same key in `summaryDTO`.
fn number_field(raw: &Value, summary: Option<&Value>, key: &str) -> Option<f64> {
    raw.get(key)
        .and_then(Value::as_f64)
        .or_else(|| summary?.get(key)?.as_f64())
}

/// Parse a local start time: `2024-06-01 07:12:33`, `2024-06-01T07:12:33`
/// or either with fractional seconds.
pub fn parse_local_time(text: &str) -> Result<NaiveDateTime> {
    let text = text.trim();
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .ok_or_else(|| Error::InvalidPayload(format!("unparsable start time '{}'", text)))
}

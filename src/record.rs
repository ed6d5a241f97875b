//! Activity record and its row form in the record store.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::algorithms::round_to;
use crate::remote::RemoteActivityDetail;
use crate::{ActivityId, Error, GpsPoint, Result};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

/// One ingested activity.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRecord {
    pub id: ActivityId,
    /// Local start date; sort key and sync frontier.
    pub date: NaiveDate,
    /// Local start time; display and tie-break only.
    pub time: NaiveTime,
    /// Remote type key, kept verbatim (e.g. "running", "resort_skiing").
    pub activity_type: String,
    /// Kilometers, 2 decimals.
    pub distance_km: f64,
    /// Minutes, 1 decimal.
    pub duration_min: f64,
    pub name: String,
    /// Base name shared by this activity's side-files.
    pub filename: String,
    /// True iff a non-empty reduced trace was stored.
    pub has_track: bool,
    /// Reduced trace; only populated by `load_all(true)`.
    pub trace: Vec<GpsPoint>,
}

impl ActivityRecord {
    /// Build a record from a normalized remote activity and its reduced trace.
    ///
    /// Distance and duration are rounded here, once.
    pub fn from_detail(detail: &RemoteActivityDetail, trace: Vec<GpsPoint>) -> Self {
        let date = detail.start_local.date();
        Self {
            id: detail.id.clone(),
            date,
            time: detail.start_local.time(),
            activity_type: detail.activity_type.clone(),
            distance_km: round_to(detail.distance_m.unwrap_or(0.0) / 1000.0, 2),
            duration_min: round_to(detail.duration_s.unwrap_or(0.0) / 60.0, 1),
            name: detail.name.clone(),
            filename: base_filename(date, &detail.id, &detail.activity_type),
            has_track: !trace.is_empty(),
            trace,
        }
    }

    /// Sort key of the record store.
    pub fn sort_key(&self) -> (NaiveDate, &ActivityId) {
        (self.date, &self.id)
    }
}

impl std::fmt::Display for ActivityRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Activity({}, {}, {})", self.id, self.date, self.name)
    }
}

/// Side-file base name `{date}_{id}_{type}`.
///
/// Characters outside `[A-Za-z0-9_-]` are replaced with `_` so a type key can
/// never escape the side-file directories.
pub fn base_filename(date: NaiveDate, id: &ActivityId, activity_type: &str) -> String {
    let sanitize = |s: &str| -> String {
        s.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    };
    format!(
        "{}_{}_{}",
        date.format(DATE_FORMAT),
        sanitize(id.as_str()),
        sanitize(activity_type)
    )
}

// ============================================================================
// Row form
// ============================================================================

/// One row of the record store. Field order is the column order.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct RecordRow {
    date: String,
    #[serde(default)]
    time: String,
    #[serde(rename = "type")]
    activity_type: String,
    duration: f64,
    distance: f64,
    activity_id: String,
    name: String,
    filename: String,
    has_gps_data: String,
}

impl From<&ActivityRecord> for RecordRow {
    fn from(record: &ActivityRecord) -> Self {
        Self {
            date: record.date.format(DATE_FORMAT).to_string(),
            time: record.time.format(TIME_FORMAT).to_string(),
            activity_type: record.activity_type.clone(),
            duration: record.duration_min,
            distance: record.distance_km,
            activity_id: record.id.to_string(),
            name: record.name.clone(),
            filename: record.filename.clone(),
            has_gps_data: if record.has_track { "True" } else { "False" }.to_string(),
        }
    }
}

impl RecordRow {
    /// Convert a row read from the store. `row` is 1-based, header excluded.
    pub(crate) fn into_record(self, row: usize) -> Result<ActivityRecord> {
        let invalid = |message: String| Error::InvalidRecord { row, message };

        let date = NaiveDate::parse_from_str(self.date.trim(), DATE_FORMAT)
            .map_err(|e| invalid(format!("date '{}': {}", self.date, e)))?;

        // Rows written before the time column existed leave it empty
        let time = if self.time.trim().is_empty() {
            NaiveTime::MIN
        } else {
            NaiveTime::parse_from_str(self.time.trim(), TIME_FORMAT)
                .map_err(|e| invalid(format!("time '{}': {}", self.time, e)))?
        };

        let has_track = match self.has_gps_data.trim().to_ascii_lowercase().as_str() {
            "true" | "y" | "yes" | "1" => true,
            "false" | "n" | "no" | "0" | "" => false,
            other => return Err(invalid(format!("has_gps_data '{}'", other))),
        };

        if self.activity_id.trim().is_empty() {
            return Err(invalid("empty activity_id".to_string()));
        }

        Ok(ActivityRecord {
            id: ActivityId::new(self.activity_id),
            date,
            time,
            activity_type: self.activity_type,
            distance_km: self.distance,
            duration_min: self.duration,
            name: self.name,
            filename: self.filename,
            has_track,
            trace: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::parse_local_time;

    fn detail(distance_m: Option<f64>, duration_s: Option<f64>) -> RemoteActivityDetail {
        RemoteActivityDetail {
            id: ActivityId::from(42),
            name: "Evening Ride".to_string(),
            activity_type: "gravel_cycling".to_string(),
            start_local: parse_local_time("2024-06-03 18:30:05").unwrap(),
            distance_m,
            duration_s,
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_from_detail_rounds_once() {
        let trace = vec![GpsPoint::new(50.0, 14.0), GpsPoint::new(50.1, 14.1)];
        let record = ActivityRecord::from_detail(&detail(Some(42_195.4), Some(12_345.0)), trace);

        assert_eq!(record.distance_km, 42.2);
        assert_eq!(record.duration_min, 205.8);
        assert_eq!(record.date.to_string(), "2024-06-03");
        assert_eq!(record.time.to_string(), "18:30:05");
        assert_eq!(record.filename, "2024-06-03_42_gravel_cycling");
        assert!(record.has_track);
    }

    #[test]
    fn test_from_detail_without_distance_or_track() {
        let record = ActivityRecord::from_detail(&detail(None, None), Vec::new());
        assert_eq!(record.distance_km, 0.0);
        assert_eq!(record.duration_min, 0.0);
        assert!(!record.has_track);
        assert!(record.trace.is_empty());
    }

    #[test]
    fn test_base_filename_sanitizes_type() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(
            base_filename(date, &ActivityId::from(5), "../odd type"),
            "2024-01-02_5____odd_type"
        );
    }

    #[test]
    fn test_row_accepts_legacy_flags_and_missing_time() {
        let row = RecordRow {
            date: "2024-06-01".to_string(),
            time: String::new(),
            activity_type: "running".to_string(),
            duration: 50.2,
            distance: 10.23,
            activity_id: "7".to_string(),
            name: "Run".to_string(),
            filename: "2024-06-01_7_running".to_string(),
            has_gps_data: "Y".to_string(),
        };
        let record = row.into_record(1).unwrap();
        assert!(record.has_track);
        assert_eq!(record.time, NaiveTime::MIN);
    }

    #[test]
    fn test_row_rejects_bad_date() {
        let row = RecordRow {
            date: "June 1st".to_string(),
            time: String::new(),
            activity_type: "running".to_string(),
            duration: 0.0,
            distance: 0.0,
            activity_id: "7".to_string(),
            name: String::new(),
            filename: String::new(),
            has_gps_data: "False".to_string(),
        };
        assert!(matches!(
            row.into_record(3),
            Err(Error::InvalidRecord { row: 3, .. })
        ));
    }
}

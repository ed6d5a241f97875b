//! Map layers: stored activities grouped into colored type buckets.
//!
//! This is the consumer side of the store. It reads records loaded with
//! traces, assigns each to the first [`TypeMapping`] listing its type key
//! (unmapped types fall into the first mapping), and exports a JSON document
//! that a map front-end renders as one toggleable layer per bucket.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use geo::Coord;
use log::{debug, info, warn};
use serde::Serialize;

use crate::config::MapConfig;
use crate::geo_utils::{compute_bounds, endpoints_center, Bounds};
use crate::{ActivityRecord, Error, GpsPoint, Result, TypeMapping};

const POLYLINE_PRECISION: u32 = 5;

/// Records of one type bucket.
#[derive(Debug, Clone)]
pub struct ActivityLayer<'a> {
    pub name: String,
    pub color: String,
    pub activities: Vec<&'a ActivityRecord>,
}

/// Group track-bearing records by type bucket.
///
/// Layers come out in mapping order; buckets without activities are omitted.
/// Records without a track are skipped. An empty mapping list is a
/// configuration error.
pub fn group_by_type<'a>(
    records: &'a [ActivityRecord],
    mappings: &[TypeMapping],
) -> Result<Vec<ActivityLayer<'a>>> {
    if mappings.is_empty() {
        return Err(Error::Config(
            "No type mappings found. Cannot group activities".to_string(),
        ));
    }

    let mut layers: Vec<ActivityLayer<'a>> = mappings
        .iter()
        .map(|m| ActivityLayer {
            name: m.name.clone(),
            color: m.color.clone(),
            activities: Vec::new(),
        })
        .collect();
    let mut unmapped = HashSet::new();

    for record in records {
        if !record.has_track || record.trace.is_empty() {
            debug!("[Layers] Skipping due to missing coordinates - {}", record);
            continue;
        }

        let index = match mappings
            .iter()
            .position(|m| m.contains_key(&record.activity_type))
        {
            Some(index) => index,
            None => {
                if unmapped.insert(record.activity_type.as_str()) {
                    debug!(
                        "[Layers] Unmapped activity type: {}. Putting it into '{}'",
                        record.activity_type, mappings[0].name
                    );
                }
                0
            }
        };
        layers[index].activities.push(record);
    }

    layers.retain(|layer| !layer.activities.is_empty());
    Ok(layers)
}

/// Map center: the configured one, else the average of trace endpoints.
pub fn map_center(records: &[ActivityRecord], configured: Option<[f64; 2]>) -> Option<GpsPoint> {
    if let Some([lat, lng]) = configured {
        return Some(GpsPoint::new(lat, lng));
    }
    endpoints_center(records.iter().map(|r| r.trace.as_slice()))
}

/// Popup text shown for an activity on the map.
pub fn popup_label(record: &ActivityRecord, group: &str) -> String {
    let total_minutes = record.duration_min.max(0.0) as u64;
    format!(
        "{} {}<br>{}<br>{}<br>{} km, {}h {}m",
        record.date,
        record.time.format("%H:%M"),
        group,
        record.name,
        record.distance_km,
        total_minutes / 60,
        total_minutes % 60
    )
}

// ============================================================================
// Export
// ============================================================================

#[derive(Debug, Serialize)]
struct MapDocument {
    center: Option<[f64; 2]>,
    layers: Vec<LayerDocument>,
}

#[derive(Debug, Serialize)]
struct LayerDocument {
    name: String,
    color: String,
    activities: Vec<ActivityDocument>,
}

#[derive(Debug, Serialize)]
struct ActivityDocument {
    id: String,
    date: String,
    time: String,
    name: String,
    #[serde(rename = "type")]
    activity_type: String,
    distance_km: f64,
    duration_min: f64,
    url: String,
    popup: String,
    polyline: String,
    bounds: Option<Bounds>,
}

/// Write the layer document for `records` (loaded with traces) to `path`.
///
/// Returns the number of exported activities.
pub fn export_layers(records: &[ActivityRecord], config: &MapConfig, path: &Path) -> Result<usize> {
    let layers = group_by_type(records, &config.mappings)?;
    let center = map_center(records, config.center);

    let mut exported = 0;
    let mut documents = Vec::with_capacity(layers.len());
    for layer in layers {
        let mut activities = Vec::with_capacity(layer.activities.len());
        for record in layer.activities {
            let coords = record.trace.iter().map(|p| Coord {
                x: p.longitude,
                y: p.latitude,
            });
            let polyline = match polyline::encode_coordinates(coords, POLYLINE_PRECISION) {
                Ok(encoded) => encoded,
                Err(e) => {
                    warn!("[Layers] Cannot encode trace of {}: {:?}", record.id, e);
                    continue;
                }
            };

            activities.push(ActivityDocument {
                id: record.id.to_string(),
                date: record.date.to_string(),
                time: record.time.format("%H:%M:%S").to_string(),
                name: record.name.clone(),
                activity_type: record.activity_type.clone(),
                distance_km: record.distance_km,
                duration_min: record.duration_min,
                url: format!("{}{}", config.activity_url, record.id),
                popup: popup_label(record, &layer.name),
                polyline,
                bounds: compute_bounds(&record.trace),
            });
        }
        exported += activities.len();
        documents.push(LayerDocument {
            name: layer.name,
            color: layer.color,
            activities,
        });
    }

    let document = MapDocument {
        center: center.map(|c| [c.latitude, c.longitude]),
        layers: documents,
    };

    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, &document)?;
    writer.flush()?;

    info!(
        "[Layers] Exported {} activities with GPS data divided into {} layers to {}",
        exported,
        document.layers.len(),
        path.display()
    );
    Ok(exported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ActivityId;
    use chrono::{NaiveDate, NaiveTime};

    fn record(id: u64, activity_type: &str, trace: Vec<GpsPoint>) -> ActivityRecord {
        ActivityRecord {
            id: ActivityId::from(id),
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            time: NaiveTime::from_hms_opt(7, 5, 0).unwrap(),
            activity_type: activity_type.to_string(),
            distance_km: 12.34,
            duration_min: 125.5,
            name: format!("Activity {}", id),
            filename: String::new(),
            has_track: !trace.is_empty(),
            trace,
        }
    }

    fn trace() -> Vec<GpsPoint> {
        vec![GpsPoint::new(50.0, 14.0), GpsPoint::new(50.01, 14.02)]
    }

    fn mappings() -> Vec<TypeMapping> {
        vec![
            TypeMapping::new("Other", "red", &[]),
            TypeMapping::new("Running", "deepskyblue", &["running", "trail_running"]),
            TypeMapping::new("Cycling", "darkorange", &["cycling"]),
        ]
    }

    #[test]
    fn test_group_by_type() {
        let records = vec![
            record(1, "running", trace()),
            record(2, "trail_running", trace()),
            record(3, "kayaking", trace()),
            record(4, "cycling", Vec::new()),
        ];

        let layers = group_by_type(&records, &mappings()).unwrap();
        let names: Vec<&str> = layers.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["Other", "Running"]);
        assert_eq!(layers[0].activities[0].id, ActivityId::from(3));
        assert_eq!(layers[1].activities.len(), 2);
    }

    #[test]
    fn test_group_requires_mappings() {
        let records = vec![record(1, "running", trace())];
        assert!(matches!(group_by_type(&records, &[]), Err(Error::Config(_))));
    }

    #[test]
    fn test_map_center() {
        let records = vec![record(1, "running", trace())];
        assert_eq!(
            map_center(&records, Some([49.0, 13.0])),
            Some(GpsPoint::new(49.0, 13.0))
        );
        let center = map_center(&records, None).unwrap();
        assert!((center.latitude - 50.005).abs() < 1e-9);
        assert!((center.longitude - 14.01).abs() < 1e-9);
        assert_eq!(map_center(&[], None), None);
    }

    #[test]
    fn test_popup_label() {
        let label = popup_label(&record(1, "running", trace()), "Running");
        assert_eq!(label, "2024-06-01 07:05<br>Running<br>Activity 1<br>12.34 km, 2h 5m");
    }

    #[test]
    fn test_export_layers_writes_document() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("layers.json");
        let records = vec![record(1, "running", trace()), record(2, "cycling", trace())];
        let config = MapConfig {
            mappings: mappings(),
            ..MapConfig::default()
        };

        let exported = export_layers(&records, &config, &path).unwrap();
        assert_eq!(exported, 2);

        let document: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        let layers = document["layers"].as_array().unwrap();
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0]["name"], "Running");
        let activity = &layers[0]["activities"][0];
        assert_eq!(activity["id"], "1");
        assert_eq!(activity["url"], "https://connect.garmin.com/modern/activity/1");
        assert!(!activity["polyline"].as_str().unwrap().is_empty());
        assert_eq!(activity["bounds"]["max_lat"], 50.01);
    }
}

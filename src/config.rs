//! Runtime configuration.
//!
//! A single [`Config`] is built once at process start (the binary loads it from
//! TOML plus environment overrides) and handed to the store, the sync
//! orchestrator and the layer export. Nothing in the library reads global
//! state.

use std::path::PathBuf;

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory holding the record store and side-file directories.
    pub data_dir: PathBuf,

    /// Maximum number of remote candidates processed per sync run.
    /// Default: 500
    pub max_batch: usize,

    /// Douglas-Peucker tolerance in coordinate units (degrees).
    /// 0.0001 keeps the visual shape of activity-length tracks, 0.001 is visibly lossy.
    pub simplification_tolerance: f64,

    /// Decimal places kept when traces are read back from storage.
    /// Default: 5 (~1 meter)
    pub coordinate_precision: u32,

    /// Remote service connection settings.
    pub remote: RemoteConfig,

    /// Map presentation settings.
    pub map: MapConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            max_batch: 500,
            simplification_tolerance: 0.0001,
            coordinate_precision: 5,
            remote: RemoteConfig::default(),
            map: MapConfig::default(),
        }
    }
}

impl Config {
    /// Reject settings no component can run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_batch == 0 {
            return Err(Error::Config(
                "max_batch must be at least 1, a sync run could never ingest anything".to_string(),
            ));
        }
        Ok(())
    }
}

/// Connection settings for the remote activity service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    /// OAuth2 bearer token. Token acquisition happens outside this crate.
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://connectapi.garmin.com".to_string(),
            token: None,
            timeout_secs: 30,
        }
    }
}

/// Settings consumed by the layer export.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Fixed map center `[lat, lon]`; computed from the traces when absent.
    pub center: Option<[f64; 2]>,
    /// Prefix joined with the activity id to link back to the remote service.
    pub activity_url: String,
    /// Type buckets. The first entry also receives unmapped types.
    pub mappings: Vec<TypeMapping>,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            center: None,
            activity_url: "https://connect.garmin.com/modern/activity/".to_string(),
            mappings: default_mappings(),
        }
    }
}

/// A named, colored bucket of remote activity type keys.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TypeMapping {
    pub name: String,
    pub color: String,
    pub type_keys: Vec<String>,
}

impl TypeMapping {
    pub fn new(name: &str, color: &str, type_keys: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            color: color.to_string(),
            type_keys: type_keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    pub fn contains_key(&self, type_key: &str) -> bool {
        self.type_keys.iter().any(|k| k == type_key)
    }
}

fn default_mappings() -> Vec<TypeMapping> {
    vec![
        TypeMapping::new("Other", "red", &[]),
        TypeMapping::new(
            "Running",
            "deepskyblue",
            &["running", "track_running", "trail_running"],
        ),
        TypeMapping::new("Inline", "limegreen", &["inline_skating"]),
        TypeMapping::new(
            "Skiing",
            "deeppink",
            &[
                "resort_skiing",
                "resort_snowboarding",
                "resort_skiing_snowboarding_ws",
            ],
        ),
        TypeMapping::new(
            "Crosscountry",
            "magenta",
            &[
                "skate_skiing_ws",
                "cross_country_skiing_ws",
                "backcountry_skiing",
            ],
        ),
        TypeMapping::new("Hiking", "yellow", &["hiking", "walking"]),
        TypeMapping::new(
            "Cycling",
            "darkorange",
            &["cycling", "mountain_biking", "gravel_cycling"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.max_batch, 500);
        assert_eq!(config.coordinate_precision, 5);
        assert!((config.simplification_tolerance - 0.0001).abs() < f64::EPSILON);
        assert_eq!(config.map.mappings[0].name, "Other");
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        assert!(Config::default().validate().is_ok());

        let config = Config {
            max_batch: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(msg)) if msg.contains("max_batch")));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"max_batch": 10, "remote": {"token": "abc"}}"#).unwrap();
        assert_eq!(config.max_batch, 10);
        assert_eq!(config.remote.token.as_deref(), Some("abc"));
        assert_eq!(config.remote.timeout_secs, 30);
        assert_eq!(config.data_dir, PathBuf::from("data"));
    }

    #[test]
    fn test_mapping_contains_key() {
        let mapping = TypeMapping::new("Hiking", "yellow", &["hiking", "walking"]);
        assert!(mapping.contains_key("walking"));
        assert!(!mapping.contains_key("running"));
    }
}

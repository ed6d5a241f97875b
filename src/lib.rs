//! # Activity Map
//!
//! Incremental synchronization of fitness activities from a remote
//! activity-tracking service into a flat-file local store, with GPS trace
//! simplification and map layer export.
//!
//! This library provides:
//! - Douglas-Peucker trace reduction with a tunable coordinate tolerance
//! - A CSV record store with per-activity side-files and backup-before-mutate
//! - An idempotent, resumable sync orchestrator over any [`RemoteSource`]
//! - Grouping of stored activities into colored map layers
//!
//! ## Features
//!
//! - **`http`** (default) - HTTP client for a Garmin-Connect-style JSON API
//!
//! ## Quick Start
//!
//! ```rust
//! use activity_map::{algorithms::reduce, GpsPoint};
//!
//! let track = vec![
//!     GpsPoint::new(50.0000, 14.0000),
//!     GpsPoint::new(50.00001, 14.0005),
//!     GpsPoint::new(50.0000, 14.0010),
//! ];
//!
//! let reduced = reduce(&track, 0.0001);
//! assert_eq!(reduced.len(), 2);
//! ```

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{Error, OptionExt, Result};

// Configuration object passed explicitly to every component
pub mod config;
pub use config::{Config, RemoteConfig, TypeMapping};

// Trace reduction and coordinate rounding
pub mod algorithms;

// Bounds and centers for map layers
pub mod geo_utils;

// GPX track point extraction
pub mod gpx;

// Activity record and its CSV row form
pub mod record;
pub use record::ActivityRecord;

// Flat-file record store with side-files
pub mod store;
pub use store::{ActivityStore, StorePaths};

// Remote source boundary and payload normalization
pub mod remote;
pub use remote::{RemoteActivityDetail, RemoteActivitySummary, RemoteSource};

// HTTP implementation of the remote source
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub use http::HttpSource;

// Sync orchestrator
pub mod sync;
pub use sync::{ReloadOutcome, SyncReport, Syncer};

// Map layer grouping and export
pub mod layers;
pub use layers::{export_layers, group_by_type, map_center, ActivityLayer};

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use activity_map::GpsPoint;
/// let point = GpsPoint::new(50.0755, 14.4378); // Prague
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Opaque activity identifier assigned by the remote source.
///
/// Ids are kept as text. Ordering is numeric when both ids are all digits
/// (the common case), so `"9" < "10"`; non-numeric ids sort after numeric ones
/// and compare lexicographically among themselves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivityId(String);

impl ActivityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn numeric(&self) -> Option<u128> {
        if self.0.is_empty() || !self.0.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        self.0.parse().ok()
    }
}

impl Ord for ActivityId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric(), other.numeric()) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for ActivityId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for ActivityId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for ActivityId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ActivityId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

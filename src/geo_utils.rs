//! Geographic helpers for map layers: bounds and centers of traces.

use geo::{BoundingRect, Coord, LineString};
use serde::{Deserialize, Serialize};

use crate::GpsPoint;

/// Bounding box of a trace.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Get the center point of the bounds.
    pub fn center(&self) -> GpsPoint {
        GpsPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}

/// Convert a trace to a geo `LineString` (x = longitude, y = latitude).
pub fn to_line_string(points: &[GpsPoint]) -> LineString<f64> {
    LineString::new(
        points
            .iter()
            .map(|p| Coord {
                x: p.longitude,
                y: p.latitude,
            })
            .collect(),
    )
}

/// Compute the bounding box of a trace, `None` when empty.
pub fn compute_bounds(points: &[GpsPoint]) -> Option<Bounds> {
    let rect = to_line_string(points).bounding_rect()?;
    Some(Bounds {
        min_lat: rect.min().y,
        max_lat: rect.max().y,
        min_lng: rect.min().x,
        max_lng: rect.max().x,
    })
}

/// Average of the first and last point of every non-empty trace.
pub fn endpoints_center<'a, I>(traces: I) -> Option<GpsPoint>
where
    I: IntoIterator<Item = &'a [GpsPoint]>,
{
    let mut lat = 0.0;
    let mut lng = 0.0;
    let mut count = 0usize;

    for trace in traces {
        if let (Some(first), Some(last)) = (trace.first(), trace.last()) {
            lat += first.latitude + last.latitude;
            lng += first.longitude + last.longitude;
            count += 2;
        }
    }

    if count == 0 {
        return None;
    }
    Some(GpsPoint::new(lat / count as f64, lng / count as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_bounds() {
        let points = vec![
            GpsPoint::new(50.0, 14.5),
            GpsPoint::new(50.2, 14.1),
            GpsPoint::new(49.9, 14.3),
        ];
        let bounds = compute_bounds(&points).unwrap();
        assert_eq!(bounds.min_lat, 49.9);
        assert_eq!(bounds.max_lat, 50.2);
        assert_eq!(bounds.min_lng, 14.1);
        assert_eq!(bounds.max_lng, 14.5);

        assert!(compute_bounds(&[]).is_none());
    }

    #[test]
    fn test_endpoints_center() {
        let a = vec![GpsPoint::new(50.0, 14.0), GpsPoint::new(9.0, 9.0), GpsPoint::new(52.0, 16.0)];
        let b: Vec<GpsPoint> = vec![];
        let center = endpoints_center([a.as_slice(), b.as_slice()]).unwrap();
        assert_eq!(center, GpsPoint::new(51.0, 15.0));

        assert!(endpoints_center([b.as_slice()]).is_none());
    }
}

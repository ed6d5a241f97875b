//! # Trace Reduction
//!
//! Douglas-Peucker simplification of GPS traces and fixed-precision
//! coordinate rounding.
//!
//! The two steps are independent: [`reduce`] runs once at ingestion with the
//! configured tolerance, [`round_coordinates`] runs every time a stored trace
//! is read back and only trims digits.
//!
//! # Example
//!
//! ```rust
//! use activity_map::algorithms::{reduce, round_coordinates};
//! use activity_map::GpsPoint;
//!
//! let track = vec![
//!     GpsPoint::new(50.087451, 14.420671),
//!     GpsPoint::new(50.087460, 14.421000),
//!     GpsPoint::new(50.087470, 14.421400),
//! ];
//! let reduced = reduce(&track, 0.0001);
//! assert_eq!(reduced.first(), track.first());
//! assert_eq!(reduced.last(), track.last());
//!
//! let rounded = round_coordinates(&reduced, 5);
//! assert_eq!(rounded[0].latitude, 50.08745);
//! ```

use geo::{Distance, Euclidean, Line};

use crate::geo_utils::to_line_string;
use crate::GpsPoint;

// =============================================================================
// Line Simplification
// =============================================================================

/// Douglas-Peucker line simplification.
///
/// Within the span between two kept points, the interior point farthest from
/// the segment joining them is kept when its distance exceeds `tolerance`, and
/// both halves are processed the same way. Otherwise the span collapses to its
/// endpoints.
///
/// Distances are Euclidean point-to-segment distances in coordinate space
/// (longitude as x, latitude as y), so `tolerance` is in degrees, not meters.
/// A point past either end of the segment (the turnaround of an out-and-back)
/// is measured to the nearer endpoint. Negative or non-finite tolerances
/// behave like `0.0`.
///
/// This is the same reduction as `geo::Simplify`, except that equal maximum
/// distances resolve to the lowest index (`Simplify` picks the highest).
///
/// Guarantees:
/// - the first and last input points are always kept unchanged
/// - the output is never longer than the input, and empty only for empty input
/// - equal maximum distances resolve to the lowest index, so output is deterministic
///
/// # Arguments
/// * `points` - Input trace, in travel order
/// * `tolerance` - Maximum deviation allowed for dropped points
///
/// # Returns
/// The kept points, in input order
pub fn reduce(points: &[GpsPoint], tolerance: f64) -> Vec<GpsPoint> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let tolerance = if tolerance.is_finite() && tolerance > 0.0 {
        tolerance
    } else {
        0.0
    };

    let line = to_line_string(points);
    let coords = &line.0;
    let last = coords.len() - 1;
    let mut keep = vec![false; coords.len()];
    keep[0] = true;
    keep[last] = true;

    // Explicit work stack, no recursion
    let mut spans = vec![(0usize, last)];

    while let Some((start, end)) = spans.pop() {
        if end <= start + 1 {
            continue;
        }

        let segment = Line::new(coords[start], coords[end]);
        let mut max_distance = -1.0;
        let mut max_index = start;
        for (index, coord) in coords.iter().enumerate().take(end).skip(start + 1) {
            let distance = Euclidean::distance(*coord, &segment);
            // Strict comparison keeps the lowest index on ties
            if distance > max_distance {
                max_distance = distance;
                max_index = index;
            }
        }

        if max_distance > tolerance {
            keep[max_index] = true;
            spans.push((max_index, end));
            spans.push((start, max_index));
        }
    }

    points
        .iter()
        .zip(keep)
        .filter_map(|(point, kept)| kept.then_some(*point))
        .collect()
}

// =============================================================================
// Rounding
// =============================================================================

/// Round a value to `decimals` decimal places.
///
/// Used for coordinates at read time and for distance/duration at ingestion.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals.min(15) as i32);
    (value * factor).round() / factor
}

/// Round every coordinate of a trace to `precision` decimal places.
///
/// Five decimals is roughly one meter. Rounding never changes the number or
/// order of points.
pub fn round_coordinates(points: &[GpsPoint], precision: u32) -> Vec<GpsPoint> {
    points
        .iter()
        .map(|p| GpsPoint::new(round_to(p.latitude, precision), round_to(p.longitude, precision)))
        .collect()
}

//! GPX track point extraction.
//!
//! Only `<trkpt lat=".." lon="..">` elements are read, in document order,
//! across all tracks and segments. Routes (`<rtept>`) and waypoints are
//! ignored; timestamps and elevation are not needed for the map.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::{Error, GpsPoint, Result};

/// Parse raw GPX bytes into an ordered list of track points.
///
/// Points with missing, unparsable or out-of-range coordinates are skipped.
/// An empty or point-less document yields an empty vector.
pub fn parse_track_points(data: &[u8]) -> Result<Vec<GpsPoint>> {
    let mut reader = Reader::from_reader(data);
    reader.config_mut().trim_text(true);

    let mut points = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) | Event::Empty(ref e) => {
                if e.local_name().as_ref() == b"trkpt" {
                    if let Some(point) = read_point(e)? {
                        points.push(point);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(points)
}

fn read_point(element: &BytesStart<'_>) -> Result<Option<GpsPoint>> {
    let mut latitude = None;
    let mut longitude = None;

    for attr in element.attributes() {
        let attr = attr.map_err(|e| Error::Gpx(e.into()))?;
        let value = attr.unescape_value()?;
        match attr.key.local_name().as_ref() {
            b"lat" => latitude = value.trim().parse::<f64>().ok(),
            b"lon" => longitude = value.trim().parse::<f64>().ok(),
            _ => {}
        }
    }

    Ok(match (latitude, longitude) {
        (Some(lat), Some(lon)) => Some(GpsPoint::new(lat, lon)).filter(GpsPoint::is_valid),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx creator="Garmin Connect" version="1.1" xmlns="http://www.topografix.com/GPX/1/1">
  <metadata><time>2024-06-01T06:00:00.000Z</time></metadata>
  <trk>
    <name>Morning Run</name>
    <trkseg>
      <trkpt lat="50.0870" lon="14.4200"><ele>200.0</ele><time>2024-06-01T06:00:00.000Z</time></trkpt>
      <trkpt lat="50.0875" lon="14.4210"><ele>201.0</ele></trkpt>
    </trkseg>
    <trkseg>
      <trkpt lat="50.0880" lon="14.4220"/>
      <trkpt lat="bogus" lon="14.4230"/>
    </trkseg>
  </trk>
</gpx>"#;

    #[test]
    fn test_parse_track_points() {
        let points = parse_track_points(SAMPLE.as_bytes()).unwrap();
        assert_eq!(
            points,
            vec![
                GpsPoint::new(50.0870, 14.4200),
                GpsPoint::new(50.0875, 14.4210),
                GpsPoint::new(50.0880, 14.4220),
            ]
        );
    }

    #[test]
    fn test_parse_empty_inputs() {
        assert!(parse_track_points(b"").unwrap().is_empty());
        let no_track = r#"<gpx version="1.1"><metadata/></gpx>"#;
        assert!(parse_track_points(no_track.as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn test_parse_namespaced_elements() {
        let doc = r#"<g:gpx xmlns:g="http://www.topografix.com/GPX/1/1"><g:trk><g:trkseg>
            <g:trkpt lat="1.5" lon="2.5"/></g:trkseg></g:trk></g:gpx>"#;
        let points = parse_track_points(doc.as_bytes()).unwrap();
        assert_eq!(points, vec![GpsPoint::new(1.5, 2.5)]);
    }
}

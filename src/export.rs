//! AP cache export formats (§4.11/§9), grounded in
//! `original_source/export_utils.py`: CSV, JSON, GPX, KML/KMZ, GeoJSON, and
//! shapefile, all sharing the invariant that a row missing lat or lon is
//! skipped in every geometry format rather than erroring.

use std::io::Write;
use std::path::Path;

use geojson::{Feature, FeatureCollection, Geometry, Value as GeoValue};
use serde_json::json;

use crate::error::PiwError;
use crate::models::record::ApCacheRow;

fn has_location(row: &ApCacheRow) -> bool {
    row.latitude.is_some() && row.longitude.is_some()
}

pub fn to_csv(rows: &[ApCacheRow]) -> Result<String, PiwError> {
    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    writer
        .write_record(["bssid", "ssid", "encryption", "latitude", "longitude", "last_seen"])
        .map_err(|e| PiwError::Validation(e.to_string()))?;
    for row in rows {
        writer
            .write_record([
                row.bssid.as_str(),
                row.ssid.as_str(),
                row.encryption.as_deref().unwrap_or(""),
                &row.latitude.map(|v| v.to_string()).unwrap_or_default(),
                &row.longitude.map(|v| v.to_string()).unwrap_or_default(),
                row.last_seen.as_str(),
            ])
            .map_err(|e| PiwError::Validation(e.to_string()))?;
    }
    let bytes = writer.into_inner().map_err(|e| PiwError::Validation(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| PiwError::Validation(e.to_string()))
}

pub fn to_json(rows: &[ApCacheRow]) -> Result<String, PiwError> {
    serde_json::to_string(rows).map_err(|e| PiwError::Validation(e.to_string()))
}

pub fn to_gpx(rows: &[ApCacheRow]) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<gpx version=\"1.1\" creator=\"piwardrive\">\n");
    for row in rows.iter().filter(|r| has_location(r)) {
        out.push_str(&format!(
            "  <wpt lat=\"{}\" lon=\"{}\"><name>{}</name></wpt>\n",
            row.latitude.unwrap(),
            row.longitude.unwrap(),
            xml_escape(&row.bssid),
        ));
    }
    out.push_str("</gpx>\n");
    out
}

fn kml_placemarks(rows: &[ApCacheRow]) -> String {
    let mut body = String::new();
    for row in rows.iter().filter(|r| has_location(r)) {
        body.push_str(&format!(
            "    <Placemark><name>{}</name><description>{}</description><Point><coordinates>{},{},0</coordinates></Point></Placemark>\n",
            xml_escape(&row.bssid),
            xml_escape(row.ssid.as_str()),
            row.longitude.unwrap(),
            row.latitude.unwrap(),
        ));
    }
    body
}

pub fn to_kml(rows: &[ApCacheRow]) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<kml xmlns=\"http://www.opengis.net/kml/2.2\">\n  <Document>\n{}  </Document>\n</kml>\n",
        kml_placemarks(rows),
    )
}

pub fn to_kmz(rows: &[ApCacheRow]) -> Result<Vec<u8>, PiwError> {
    let kml = to_kml(rows);
    let mut buf = Vec::new();
    {
        let cursor = std::io::Cursor::new(&mut buf);
        let mut zip = zip::ZipWriter::new(cursor);
        let options = zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        zip.start_file("doc.kml", options).map_err(|e| PiwError::Validation(e.to_string()))?;
        zip.write_all(kml.as_bytes()).map_err(|e| PiwError::Validation(e.to_string()))?;
        zip.finish().map_err(|e| PiwError::Validation(e.to_string()))?;
    }
    Ok(buf)
}

pub fn to_geojson(rows: &[ApCacheRow]) -> String {
    let features: Vec<Feature> = rows
        .iter()
        .filter(|r| has_location(r))
        .map(|row| Feature {
            bbox: None,
            geometry: Some(Geometry::new(GeoValue::Point(vec![row.longitude.unwrap(), row.latitude.unwrap()]))),
            id: None,
            properties: Some(
                json!({
                    "bssid": row.bssid,
                    "ssid": row.ssid,
                    "encryption": row.encryption,
                    "last_seen": row.last_seen,
                })
                .as_object()
                .cloned()
                .unwrap(),
            ),
            foreign_members: None,
        })
        .collect();
    let collection = FeatureCollection { bbox: None, features, foreign_members: None };
    collection.to_string()
}

/// Write a point shapefile (`<stem>.shp`/`.shx`/`.dbf`) with BSSID/SSID/
/// encryption attribute fields truncated to shapefile's 10-character limit.
pub fn to_shapefile(rows: &[ApCacheRow], dest: &Path) -> Result<(), PiwError> {
    use shapefile::dbase::{FieldValue, TableWriterBuilder};
    use shapefile::{Point, Writer};

    let table_builder = TableWriterBuilder::new()
        .add_character_field("BSSID".try_into().unwrap(), 17)
        .add_character_field("SSID".try_into().unwrap(), 32)
        .add_character_field("ENCRYPT".try_into().unwrap(), 16);

    let mut writer = Writer::from_path(dest, table_builder).map_err(|e| PiwError::Validation(e.to_string()))?;
    for row in rows.iter().filter(|r| has_location(r)) {
        let point = Point::new(row.longitude.unwrap(), row.latitude.unwrap());
        let mut record = shapefile::dbase::Record::default();
        record.insert("BSSID".to_string(), FieldValue::Character(Some(row.bssid.clone())));
        record.insert("SSID".to_string(), FieldValue::Character(Some(row.ssid.clone())));
        record.insert("ENCRYPT".to_string(), FieldValue::Character(row.encryption.clone()));
        writer.write_shape_and_record(&point, &record).map_err(|e| PiwError::Validation(e.to_string()))?;
    }
    Ok(())
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(bssid: &str, lat: Option<f64>, lon: Option<f64>) -> ApCacheRow {
        ApCacheRow {
            bssid: bssid.to_string(),
            ssid: "Home".to_string(),
            encryption: Some("WPA2".to_string()),
            latitude: lat,
            longitude: lon,
            last_seen: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn csv_includes_header_and_rows() {
        let csv = to_csv(&[row("AA:BB:CC:DD:EE:01", Some(1.0), Some(2.0))]).unwrap();
        assert!(csv.starts_with("bssid,ssid,encryption,latitude,longitude,last_seen"));
        assert!(csv.contains("AA:BB:CC:DD:EE:01"));
    }

    #[test]
    fn gpx_skips_rows_without_location() {
        let gpx = to_gpx(&[row("AA:BB:CC:DD:EE:01", None, None)]);
        assert!(!gpx.contains("<wpt"));
    }

    #[test]
    fn gpx_includes_located_rows() {
        let gpx = to_gpx(&[row("AA:BB:CC:DD:EE:01", Some(1.0), Some(2.0))]);
        assert!(gpx.contains("<wpt lat=\"1\" lon=\"2\">"));
    }

    #[test]
    fn kml_skips_rows_without_location() {
        let kml = to_kml(&[row("AA:BB:CC:DD:EE:01", None, None)]);
        assert!(!kml.contains("<Placemark>"));
    }

    #[test]
    fn geojson_has_one_feature_per_located_row() {
        let gj = to_geojson(&[row("AA:BB:CC:DD:EE:01", Some(1.0), Some(2.0)), row("AA:BB:CC:DD:EE:02", None, None)]);
        let parsed: geojson::GeoJson = gj.parse().unwrap();
        if let geojson::GeoJson::FeatureCollection(fc) = parsed {
            assert_eq!(fc.features.len(), 1);
        } else {
            panic!("expected a feature collection");
        }
    }

    #[test]
    fn kmz_is_a_valid_zip_containing_doc_kml() {
        let kmz = to_kmz(&[row("AA:BB:CC:DD:EE:01", Some(1.0), Some(2.0))]).unwrap();
        let cursor = std::io::Cursor::new(kmz);
        let mut archive = zip::ZipArchive::new(cursor).unwrap();
        let file = archive.by_name("doc.kml").unwrap();
        assert!(file.size() > 0);
    }
}

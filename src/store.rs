use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::model::{MergedRecord, RawListing, RejectedListing};

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    serde_json::from_slice(&bytes).with_context(|| format!("Failed to parse {:?}", path))
}

/// Pretty-printed, non-ASCII kept as is. Creates parent directories.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))
}

pub fn load_raw(path: &Path) -> Result<Vec<RawListing>> {
    read_json(path)
}

/// Final dataset: either a plain array of records or a FeatureCollection whose
/// features carry the records as `properties`.
pub fn load_dataset(path: &Path) -> Result<Vec<MergedRecord>> {
    let value: serde_json::Value = read_json(path)?;
    if value.get("type").and_then(|t| t.as_str()) == Some("FeatureCollection") {
        let features = value
            .get("features")
            .and_then(|f| f.as_array())
            .cloned()
            .unwrap_or_default();
        return features
            .into_iter()
            .map(feature_to_record)
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Bad feature in {:?}", path));
    }
    serde_json::from_value(value).with_context(|| format!("Failed to parse {:?}", path))
}

fn feature_to_record(feature: serde_json::Value) -> Result<MergedRecord> {
    let mut props = feature
        .get("properties")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));
    let coords = feature
        .pointer("/geometry/coordinates")
        .and_then(|c| c.as_array())
        .map(|c| (c.first().and_then(|v| v.as_f64()), c.get(1).and_then(|v| v.as_f64())));
    if let (Some((Some(lng), Some(lat))), Some(obj)) = (coords, props.as_object_mut()) {
        obj.insert("lat".into(), lat.into());
        obj.insert("lng".into(), lng.into());
    }
    Ok(serde_json::from_value(props)?)
}

pub fn save_dataset(path: &Path, records: &[MergedRecord]) -> Result<()> {
    write_json(path, records)
}

pub fn save_rejected(path: &Path, rejected: &[RejectedListing]) -> Result<()> {
    write_json(path, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn raw_listings_round_trip_with_unicode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("raw.json");
        let raw = vec![RawListing {
            name: "祇園 まつもと".into(),
            source_rating: 4.1,
            area: "祇園四条駅".into(),
            cuisine_text: "寿司".into(),
        }];
        write_json(&path, &raw).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("祇園 まつもと"));
        assert_eq!(load_raw(&path).unwrap(), raw);
    }

    #[test]
    fn dataset_from_feature_collection() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("geo.json");
        fs::write(
            &path,
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","geometry":{"type":"Point","coordinates":[135.77,35.0]},
                 "properties":{"name":"Example","tabelog_rating":4.0,"google_rating":4.6,
                               "cuisine":"Sushi","area":"Gion","categories":["Sushi"],"place_id":"p"}}
            ]}"#,
        )
        .unwrap();
        let recs = load_dataset(&path).unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].place.lat, Some(35.0));
        assert_eq!(recs[0].place.lng, Some(135.77));
        assert_eq!(recs[0].place.place_id, "p");
        assert!(recs[0].categories.contains("Sushi"));
    }

    #[test]
    fn missing_file_names_path() {
        let err = load_raw(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(format!("{:#}", err).contains("here.json"));
    }
}

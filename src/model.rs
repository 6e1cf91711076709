use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};

/// Older dataset files write `null` where a value was missing upstream.
fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

/// A restaurant as listed on the ranking site, before enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawListing {
    pub name: String,
    #[serde(alias = "tabelog_rating")]
    pub source_rating: f64,
    #[serde(default)]
    pub area: String,
    #[serde(default, alias = "cuisine")]
    pub cuisine_text: String,
}

impl RawListing {
    /// Stable identity used by the checkpoint. Independent of list position,
    /// so reordering the raw file between runs never causes skips or repeats.
    pub fn key(&self) -> String {
        format!("{}@{}", self.name.trim(), self.area.trim())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Coordinates { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Everything one text-search + detail round trip tells us about a place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    #[serde(default, alias = "google_name", deserialize_with = "null_as_default")]
    pub display_name: String,
    #[serde(alias = "google_rating")]
    pub api_rating: Option<f64>,
    #[serde(default, alias = "google_user_ratings_total", deserialize_with = "null_as_default")]
    pub review_count: u32,
    #[serde(default, alias = "google_address", deserialize_with = "null_as_default")]
    pub address: String,
    #[serde(default, alias = "google_place_id", deserialize_with = "null_as_default")]
    pub place_id: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub price_level: Option<u8>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub opening_hours: Vec<String>,
    pub open_now: Option<bool>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub photo_urls: Vec<String>,
    #[serde(default)]
    pub types: Vec<String>,
}

impl EnrichmentResult {
    pub fn coordinates(&self) -> Option<Coordinates> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(Coordinates::new(lat, lng)),
            _ => None,
        }
    }
}

/// Source listing plus its enrichment, as stored in the final dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRecord {
    #[serde(flatten)]
    pub listing: RawListing,
    #[serde(flatten)]
    pub place: EnrichmentResult,
    #[serde(default)]
    pub categories: BTreeSet<String>,
}

impl MergedRecord {
    pub fn new(listing: RawListing, place: EnrichmentResult) -> Self {
        let categories = crate::classify::classify(
            Some(&listing.cuisine_text),
            Some(&place.types),
            &listing.name,
        );
        MergedRecord {
            listing,
            place,
            categories,
        }
    }

    /// Name shown on the map: the places API name when present.
    pub fn display_name(&self) -> &str {
        if self.place.display_name.is_empty() {
            &self.listing.name
        } else {
            &self.place.display_name
        }
    }

    pub fn coordinates(&self) -> Option<Coordinates> {
        self.place.coordinates().filter(Coordinates::is_valid)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    BelowSourceRating,
    NotFound,
    BelowApiRating { api_rating: Option<f64> },
}

impl RejectReason {
    pub fn label(&self) -> &'static str {
        match self {
            RejectReason::BelowSourceRating => "below_source_rating",
            RejectReason::NotFound => "not_found",
            RejectReason::BelowApiRating { .. } => "below_api_rating",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedListing {
    #[serde(flatten)]
    pub listing: RawListing,
    #[serde(flatten)]
    pub reason: RejectReason,
}

//! Static map page: the dataset is embedded as a GeoJSON FeatureCollection and
//! all filtering happens in the browser.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};

use crate::classify::{self, ranked_counts};
use crate::geo::{EARTH_RADIUS_KM, WALKING_SPEED_KMH};
use crate::model::MergedRecord;

const TEMPLATE: &str = include_str!("../templates/map.html");

/// (symbol, label) per price level; levels past the end clamp to the last tier.
pub const PRICE_TIERS: [(&str, &str); 5] = [
    ("¥", "Free"),
    ("¥¥", "Inexpensive"),
    ("¥¥¥", "Moderate"),
    ("¥¥¥¥", "Expensive"),
    ("¥¥¥¥¥", "Very Expensive"),
];

pub fn price_tier(level: u8) -> (&'static str, &'static str) {
    PRICE_TIERS[usize::from(level).min(PRICE_TIERS.len() - 1)]
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    kind: &'static str,
    pub features: Vec<Feature>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Feature {
    #[serde(rename = "type")]
    kind: &'static str,
    pub geometry: Point,
    pub properties: FeatureProperties,
}

#[derive(Debug, Clone, Serialize)]
pub struct Point {
    #[serde(rename = "type")]
    kind: &'static str,
    /// GeoJSON order: `[lng, lat]`.
    pub coordinates: [f64; 2],
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureProperties {
    pub name: String,
    pub source_rating: f64,
    pub api_rating: Option<f64>,
    pub review_count: u32,
    pub cuisine: String,
    pub area: String,
    pub address: String,
    pub categories: BTreeSet<String>,
    pub place_id: String,
    pub price_level: Option<u8>,
    pub opening_hours: Vec<String>,
    pub open_now: Option<bool>,
    pub photo_urls: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PageOptions {
    pub city: String,
    pub center: [f64; 2],
    pub min_source_rating: f64,
    pub min_api_rating: f64,
    pub default_category: Option<String>,
    pub service_worker_path: Option<String>,
}

impl Default for PageOptions {
    fn default() -> Self {
        PageOptions {
            city: "Kyoto".into(),
            center: [35.0116, 135.7681],
            min_source_rating: 3.5,
            min_api_rating: 4.2,
            default_category: None,
            service_worker_path: None,
        }
    }
}

/// Result of a build: the page plus what went into it.
#[derive(Debug, Clone)]
pub struct BuiltPage {
    pub html: String,
    pub collection: FeatureCollection,
    pub category_counts: BTreeMap<String, usize>,
    pub dropped: usize,
}

fn to_feature(rec: &MergedRecord) -> Option<Feature> {
    let coords = rec.coordinates()?;
    Some(Feature {
        kind: "Feature",
        geometry: Point {
            kind: "Point",
            coordinates: [coords.lng, coords.lat],
        },
        properties: FeatureProperties {
            name: rec.display_name().to_string(),
            source_rating: rec.listing.source_rating,
            api_rating: rec.place.api_rating,
            review_count: rec.place.review_count,
            cuisine: rec.listing.cuisine_text.clone(),
            area: rec.listing.area.clone(),
            address: rec.place.address.clone(),
            categories: rec.categories.clone(),
            place_id: rec.place.place_id.clone(),
            price_level: rec.place.price_level,
            opening_hours: rec.place.opening_hours.clone(),
            open_now: rec.place.open_now,
            photo_urls: rec.place.photo_urls.clone(),
        },
    })
}

/// Records with usable coordinates, tagged. Untagged records are classified
/// here; the default category (if any) fills whatever is still empty.
pub fn to_feature_collection(
    records: &[MergedRecord],
    default_category: Option<&str>,
) -> (FeatureCollection, usize) {
    let mut tagged: Vec<MergedRecord> = records
        .iter()
        .filter(|r| r.coordinates().is_some())
        .cloned()
        .collect();
    let dropped = records.len() - tagged.len();
    for rec in tagged.iter_mut().filter(|r| r.categories.is_empty()) {
        rec.categories = classify::classify(
            Some(&rec.listing.cuisine_text),
            Some(&rec.place.types),
            &rec.listing.name,
        );
    }
    if let Some(tag) = default_category {
        classify::apply_default(&mut tagged, tag);
    }
    let features = tagged.iter().filter_map(to_feature).collect();
    (
        FeatureCollection {
            kind: "FeatureCollection",
            features,
        },
        dropped,
    )
}

/// JSON that is safe inside a `<script>` element.
fn script_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?
        .replace("</", "<\\/")
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029"))
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn category_options(counts: &BTreeMap<String, usize>) -> String {
    ranked_counts(counts)
        .into_iter()
        .map(|(tag, n)| {
            let tag = escape_html(tag);
            format!(
                "            <label class=\"cuisine-option\"><input type=\"checkbox\" data-category=\"{}\"> {} <span class=\"count\">({})</span></label>",
                tag, tag, n
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn service_worker_snippet(path: Option<&str>) -> Result<String> {
    let Some(path) = path else {
        return Ok(String::new());
    };
    Ok(format!(
        "        if ('serviceWorker' in navigator) {{\n            window.addEventListener('load', () => navigator.serviceWorker.register({}).catch(() => {{}}));\n        }}",
        script_json(path)?
    ))
}

pub fn build(records: &[MergedRecord], opts: &PageOptions) -> Result<BuiltPage> {
    let (collection, dropped) = to_feature_collection(records, opts.default_category.as_deref());
    if dropped > 0 {
        debug!(dropped, "Records without coordinates left off the map");
    }
    let counts = category_counts_of(&collection);

    let symbols: Vec<&str> = PRICE_TIERS.iter().map(|(s, _)| *s).collect();
    let labels: Vec<&str> = PRICE_TIERS.iter().map(|(_, l)| *l).collect();
    let title = format!("{} Food Finder", opts.city);
    let stats = format!(
        "{} Restaurants • Source {}+ &amp; Places {}+",
        collection.features.len(),
        opts.min_source_rating,
        opts.min_api_rating
    );

    let html = TEMPLATE
        .replace("{{TITLE}}", &escape_html(&title))
        .replace("{{CITY}}", &escape_html(&opts.city))
        .replace("{{STATS}}", &stats)
        .replace("{{CATEGORY_OPTIONS}}", &category_options(&counts))
        .replace("{{PRICE_SYMBOLS}}", &script_json(&symbols)?)
        .replace("{{PRICE_LABELS}}", &script_json(&labels)?)
        .replace("{{WALKING_SPEED}}", &WALKING_SPEED_KMH.to_string())
        .replace("{{EARTH_RADIUS}}", &EARTH_RADIUS_KM.to_string())
        .replace("{{CENTER}}", &script_json(&opts.center)?)
        .replace(
            "{{SERVICE_WORKER}}",
            &service_worker_snippet(opts.service_worker_path.as_deref())?,
        )
        // last, so placeholder-looking text inside the data is left alone
        .replace("{{DATA}}", &script_json(&collection)?);

    info!(
        restaurants = collection.features.len(),
        dropped,
        categories = counts.len(),
        "Built map page"
    );
    Ok(BuiltPage {
        html,
        collection,
        category_counts: counts,
        dropped,
    })
}

fn category_counts_of(collection: &FeatureCollection) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for f in &collection.features {
        for tag in &f.properties.categories {
            *counts.entry(tag.clone()).or_insert(0) += 1;
        }
    }
    counts
}

/// Web-app manifest written next to the page.
pub fn manifest(opts: &PageOptions) -> serde_json::Value {
    serde_json::json!({
        "name": format!("{} Food Finder", opts.city),
        "short_name": format!("{} Food", opts.city),
        "start_url": ".",
        "display": "standalone",
        "background_color": "#ffffff",
        "theme_color": "#667eea",
        "icons": [
            { "src": "icon-192.png", "sizes": "192x192", "type": "image/png" },
            { "src": "icon-512.png", "sizes": "512x512", "type": "image/png" }
        ]
    })
}

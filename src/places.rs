//! Places API lookup: text search for the best match, then a detail request
//! for the fields the map needs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::EnrichError;
use crate::model::EnrichmentResult;

pub const MAX_PHOTOS: usize = 5;
const DETAIL_FIELDS: &str = "name,rating,user_ratings_total,formatted_address,geometry,place_id,\
opening_hours,price_level,photos,types";

#[async_trait]
pub trait Enricher {
    /// Best-effort lookup. `None` covers both "no match" and "lookup failed";
    /// callers treat it as a reject, never as fatal.
    async fn enrich(&self, name: &str, city: &str) -> Option<EnrichmentResult>;
}

/// How photo references become URLs in the dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum PhotoLinks {
    /// `{base}?maxwidth=W&photo_reference=REF`, resolved by a server-side proxy
    /// that holds the key.
    Proxy { base: String, max_width: u32 },
    /// Direct Places photo URL with the API key in the query string.
    Keyed {
        endpoint: String,
        max_width: u32,
        api_key: String,
    },
}

impl PhotoLinks {
    pub fn url(&self, reference: &str) -> String {
        match self {
            PhotoLinks::Proxy { base, max_width } => format!(
                "{}?maxwidth={}&photo_reference={}",
                base, max_width, reference
            ),
            PhotoLinks::Keyed {
                endpoint,
                max_width,
                api_key,
            } => format!(
                "{}?maxwidth={}&photo_reference={}&key={}",
                endpoint, max_width, reference, api_key
            ),
        }
    }
}

// ── Wire shapes ──

#[derive(Debug, Deserialize)]
struct TextSearchResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    place_id: String,
}

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    result: Option<PlaceDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct PlaceDetails {
    #[serde(default)]
    name: String,
    rating: Option<f64>,
    user_ratings_total: Option<u32>,
    #[serde(default)]
    formatted_address: String,
    #[serde(default)]
    place_id: String,
    geometry: Option<Geometry>,
    price_level: Option<u8>,
    opening_hours: Option<OpeningHours>,
    #[serde(default)]
    photos: Vec<Photo>,
    #[serde(default)]
    types: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: LatLng,
}

#[derive(Debug, Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Deserialize)]
struct OpeningHours {
    open_now: Option<bool>,
    #[serde(default)]
    weekday_text: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Photo {
    photo_reference: String,
}

fn api_error(endpoint: &'static str, status: String, message: Option<String>) -> EnrichError {
    EnrichError::Api {
        endpoint,
        status,
        message,
    }
}

fn into_result(details: PlaceDetails, photos: &PhotoLinks) -> Result<EnrichmentResult, EnrichError> {
    let location = details
        .geometry
        .map(|g| g.location)
        .ok_or_else(|| EnrichError::MissingGeometry(details.place_id.clone()))?;
    let (opening_hours, open_now) = match details.opening_hours {
        Some(h) => (h.weekday_text, h.open_now),
        None => (Vec::new(), None),
    };
    Ok(EnrichmentResult {
        display_name: details.name,
        api_rating: details.rating,
        review_count: details.user_ratings_total.unwrap_or(0),
        address: details.formatted_address,
        place_id: details.place_id,
        lat: Some(location.lat),
        lng: Some(location.lng),
        price_level: details.price_level,
        opening_hours,
        open_now,
        photo_urls: details
            .photos
            .iter()
            .take(MAX_PHOTOS)
            .map(|p| photos.url(&p.photo_reference))
            .collect(),
        types: details.types,
    })
}

/// Places web service client. Requests are sequential; there is no retry.
pub struct PlacesClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    country: String,
    photos: PhotoLinks,
    warned_keyed_photos: AtomicBool,
}

impl PlacesClient {
    /// Fails with `MissingApiKey` when no key is configured.
    pub fn new(settings: &Settings) -> Result<Self, EnrichError> {
        let api_key = settings
            .places_api_key
            .clone()
            .ok_or(EnrichError::MissingApiKey)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.api_timeout_secs))
            .build()?;
        let base_url = settings.places_base_url.trim_end_matches('/').to_string();
        let photos = if settings.embed_photo_key {
            PhotoLinks::Keyed {
                endpoint: format!("{}/photo", base_url),
                max_width: settings.photo_max_width,
                api_key: api_key.clone(),
            }
        } else {
            PhotoLinks::Proxy {
                base: settings.photo_proxy_url.clone(),
                max_width: settings.photo_max_width,
            }
        };
        Ok(PlacesClient {
            http,
            base_url,
            api_key,
            country: settings.country.clone(),
            photos,
            warned_keyed_photos: AtomicBool::new(false),
        })
    }

    fn query(&self, name: &str, city: &str) -> String {
        format!("{} {} {}", name, city, self.country)
    }

    async fn text_search(&self, query: &str) -> Result<Option<String>, EnrichError> {
        let url = format!("{}/textsearch/json", self.base_url);
        let resp: TextSearchResponse = self
            .http
            .get(&url)
            .query(&[("query", query), ("key", self.api_key.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        match resp.status.as_str() {
            "OK" => Ok(resp.results.into_iter().next().map(|hit| hit.place_id)),
            "ZERO_RESULTS" => Ok(None),
            _ => Err(api_error("textsearch", resp.status, resp.error_message)),
        }
    }

    async fn details(&self, place_id: &str) -> Result<PlaceDetails, EnrichError> {
        let url = format!("{}/details/json", self.base_url);
        let resp: DetailsResponse = self
            .http
            .get(&url)
            .query(&[
                ("place_id", place_id),
                ("fields", DETAIL_FIELDS),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        match (resp.status.as_str(), resp.result) {
            ("OK", Some(details)) => Ok(details),
            _ => Err(api_error("details", resp.status, resp.error_message)),
        }
    }

    /// Text search then detail lookup. `Ok(None)` when the search finds nothing.
    pub async fn lookup(&self, name: &str, city: &str) -> Result<Option<EnrichmentResult>, EnrichError> {
        let query = self.query(name, city);
        let Some(place_id) = self.text_search(&query).await? else {
            debug!(%query, "no text search match");
            return Ok(None);
        };
        let details = self.details(&place_id).await?;
        if matches!(self.photos, PhotoLinks::Keyed { .. })
            && !details.photos.is_empty()
            && !self.warned_keyed_photos.swap(true, Ordering::Relaxed)
        {
            warn!("embed_photo_key is on: photo URLs in the dataset carry the API key");
        }
        into_result(details, &self.photos).map(Some)
    }
}

#[async_trait]
impl Enricher for PlacesClient {
    async fn enrich(&self, name: &str, city: &str) -> Option<EnrichmentResult> {
        match self.lookup(name, city).await {
            Ok(found) => found,
            Err(e) => {
                warn!(%name, "Places lookup failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DETAILS_OK: &str = r#"{
        "status": "OK",
        "result": {
            "name": "Gion Sushi",
            "rating": 4.6,
            "user_ratings_total": 321,
            "formatted_address": "Higashiyama Ward, Kyoto",
            "place_id": "ChIJabc",
            "geometry": { "location": { "lat": 35.0, "lng": 135.77 } },
            "price_level": 3,
            "opening_hours": { "open_now": false, "weekday_text": ["Monday: Closed", "Tuesday: 12:00 – 22:00"] },
            "photos": [
                {"photo_reference": "r1"}, {"photo_reference": "r2"}, {"photo_reference": "r3"},
                {"photo_reference": "r4"}, {"photo_reference": "r5"}, {"photo_reference": "r6"}
            ],
            "types": ["restaurant", "food", "point_of_interest"]
        }
    }"#;

    fn proxy() -> PhotoLinks {
        PhotoLinks::Proxy {
            base: "photo".into(),
            max_width: 800,
        }
    }

    #[test]
    fn maps_detail_response() {
        let resp: DetailsResponse = serde_json::from_str(DETAILS_OK).unwrap();
        let r = into_result(resp.result.unwrap(), &proxy()).unwrap();
        assert_eq!(r.display_name, "Gion Sushi");
        assert_eq!(r.api_rating, Some(4.6));
        assert_eq!(r.review_count, 321);
        assert_eq!(r.place_id, "ChIJabc");
        assert_eq!((r.lat, r.lng), (Some(35.0), Some(135.77)));
        assert_eq!(r.price_level, Some(3));
        assert_eq!(r.open_now, Some(false));
        assert_eq!(r.opening_hours.len(), 2);
        assert_eq!(r.types, vec!["restaurant", "food", "point_of_interest"]);
    }

    #[test]
    fn keeps_at_most_five_photos_without_key() {
        let resp: DetailsResponse = serde_json::from_str(DETAILS_OK).unwrap();
        let r = into_result(resp.result.unwrap(), &proxy()).unwrap();
        assert_eq!(r.photo_urls.len(), MAX_PHOTOS);
        assert_eq!(r.photo_urls[0], "photo?maxwidth=800&photo_reference=r1");
        assert!(r.photo_urls.iter().all(|u| !u.contains("key=")));
    }

    #[test]
    fn keyed_photo_links_carry_key() {
        let links = PhotoLinks::Keyed {
            endpoint: "https://maps.googleapis.com/maps/api/place/photo".into(),
            max_width: 800,
            api_key: "SECRET".into(),
        };
        assert_eq!(
            links.url("abc"),
            "https://maps.googleapis.com/maps/api/place/photo?maxwidth=800&photo_reference=abc&key=SECRET"
        );
    }

    #[test]
    fn sparse_details_fill_defaults() {
        let json = r#"{"status":"OK","result":{"place_id":"x","geometry":{"location":{"lat":1.0,"lng":2.0}}}}"#;
        let resp: DetailsResponse = serde_json::from_str(json).unwrap();
        let r = into_result(resp.result.unwrap(), &proxy()).unwrap();
        assert_eq!(r.api_rating, None);
        assert_eq!(r.review_count, 0);
        assert!(r.opening_hours.is_empty());
        assert_eq!(r.open_now, None);
        assert!(r.photo_urls.is_empty());
    }

    #[test]
    fn missing_geometry_is_an_error() {
        let json = r#"{"status":"OK","result":{"place_id":"x","name":"n"}}"#;
        let resp: DetailsResponse = serde_json::from_str(json).unwrap();
        let err = into_result(resp.result.unwrap(), &proxy()).unwrap_err();
        assert!(matches!(err, EnrichError::MissingGeometry(id) if id == "x"));
    }

    #[test]
    fn search_response_shapes() {
        let zero: TextSearchResponse =
            serde_json::from_str(r#"{"status":"ZERO_RESULTS","results":[]}"#).unwrap();
        assert_eq!(zero.status, "ZERO_RESULTS");
        assert!(zero.results.is_empty());

        let denied: TextSearchResponse = serde_json::from_str(
            r#"{"status":"REQUEST_DENIED","error_message":"The provided API key is invalid."}"#,
        )
        .unwrap();
        let err = api_error("textsearch", denied.status, denied.error_message);
        assert_eq!(
            err.to_string(),
            "textsearch returned REQUEST_DENIED: The provided API key is invalid."
        );
    }

    #[test]
    fn client_requires_api_key() {
        let settings = Settings {
            places_api_key: None,
            ..Settings::default()
        };
        assert!(matches!(
            PlacesClient::new(&settings),
            Err(EnrichError::MissingApiKey)
        ));
    }

    #[test]
    fn client_builds_query_and_photo_mode() {
        let settings = Settings {
            places_api_key: Some("k".into()),
            embed_photo_key: true,
            ..Settings::default()
        };
        let client = PlacesClient::new(&settings).unwrap();
        assert_eq!(client.query("Izuju", "Kyoto"), "Izuju Kyoto Japan");
        assert!(client.photos.url("r").ends_with("&key=k"));
        assert!(client.photos.url("r").starts_with("https://maps.googleapis.com/maps/api/place/photo?"));
    }

    async fn json_mock(
        server: &mut mockito::ServerGuard,
        path: &str,
        query: mockito::Matcher,
        status: usize,
        body: &str,
    ) -> mockito::Mock {
        server
            .mock("GET", path)
            .match_query(query)
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }

    fn client_for(server: &mockito::ServerGuard) -> PlacesClient {
        PlacesClient::new(&Settings {
            places_base_url: server.url(),
            places_api_key: Some("k".into()),
            ..Settings::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn lookup_uses_first_search_hit() {
        let mut server = mockito::Server::new_async().await;
        let _search = json_mock(
            &mut server,
            "/textsearch/json",
            mockito::Matcher::UrlEncoded("query".into(), "Izuju Kyoto Japan".into()),
            200,
            r#"{"status":"OK","results":[{"place_id":"p1"},{"place_id":"p2"}]}"#,
        )
        .await;
        let details = json_mock(
            &mut server,
            "/details/json",
            mockito::Matcher::UrlEncoded("place_id".into(), "p1".into()),
            200,
            r#"{"status":"OK","result":{"place_id":"p1","rating":4.4,
                "geometry":{"location":{"lat":35.0,"lng":135.77}}}}"#,
        )
        .await;

        let found = client_for(&server).lookup("Izuju", "Kyoto").await.unwrap().unwrap();
        details.assert_async().await;
        assert_eq!(found.place_id, "p1");
        assert_eq!(found.api_rating, Some(4.4));
    }

    #[tokio::test]
    async fn empty_search_results_are_absent() {
        for body in [
            r#"{"status":"OK","results":[]}"#,
            r#"{"status":"ZERO_RESULTS","results":[]}"#,
        ] {
            let mut server = mockito::Server::new_async().await;
            let _search =
                json_mock(&mut server, "/textsearch/json", mockito::Matcher::Any, 200, body).await;
            let details = server
                .mock("GET", "/details/json")
                .match_query(mockito::Matcher::Any)
                .expect(0)
                .create_async()
                .await;

            let client = client_for(&server);
            assert!(client.lookup("Nowhere", "Kyoto").await.unwrap().is_none());
            assert!(client.enrich("Nowhere", "Kyoto").await.is_none());
            details.assert_async().await;
        }
    }

    #[tokio::test]
    async fn http_failure_becomes_absent() {
        let mut server = mockito::Server::new_async().await;
        let _search =
            json_mock(&mut server, "/textsearch/json", mockito::Matcher::Any, 500, "oops").await;

        let client = client_for(&server);
        assert!(matches!(
            client.lookup("Izuju", "Kyoto").await,
            Err(EnrichError::Http(_))
        ));
        assert!(client.enrich("Izuju", "Kyoto").await.is_none());
    }

    #[tokio::test]
    async fn denied_details_become_absent() {
        let mut server = mockito::Server::new_async().await;
        let _search = json_mock(
            &mut server,
            "/textsearch/json",
            mockito::Matcher::Any,
            200,
            r#"{"status":"OK","results":[{"place_id":"p1"}]}"#,
        )
        .await;
        let _details = json_mock(
            &mut server,
            "/details/json",
            mockito::Matcher::Any,
            200,
            r#"{"status":"REQUEST_DENIED","error_message":"The provided API key is invalid."}"#,
        )
        .await;

        let client = client_for(&server);
        let err = client.lookup("Izuju", "Kyoto").await.unwrap_err();
        assert!(matches!(err, EnrichError::Api { endpoint: "details", ref status, .. } if status == "REQUEST_DENIED"));
        assert!(client.enrich("Izuju", "Kyoto").await.is_none());
    }
}

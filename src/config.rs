use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

const DEFAULT_CONFIG_FILE: &str = "food_finder";
const ENV_PREFIX: &str = "FOOD_FINDER";
const FALLBACK_KEY_VAR: &str = "GOOGLE_PLACES_API_KEY";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub city: String,
    pub country: String,
    /// Listing page URL; `{page}` is replaced by the 1-based page number.
    pub source_url: String,
    pub user_agent: String,
    pub min_source_rating: f64,
    pub min_api_rating: f64,
    pub max_pages: u32,
    pub page_delay_ms: u64,
    pub enrich_delay_ms: u64,
    pub checkpoint_every: usize,
    pub source_timeout_secs: u64,
    pub api_timeout_secs: u64,
    pub places_base_url: String,
    pub places_api_key: Option<String>,
    pub photo_max_width: u32,
    pub photo_proxy_url: String,
    pub embed_photo_key: bool,
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub default_category: Option<String>,
    pub map_center: [f64; 2],
    pub service_worker_path: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            city: "Kyoto".into(),
            country: "Japan".into(),
            source_url: "https://tabelog.com/kyoto/rstLst/{page}/?SrtT=rt".into(),
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36"
                .into(),
            min_source_rating: 3.5,
            min_api_rating: 4.2,
            max_pages: 100,
            page_delay_ms: 2000,
            enrich_delay_ms: 500,
            checkpoint_every: 1,
            source_timeout_secs: 30,
            api_timeout_secs: 10,
            places_base_url: "https://maps.googleapis.com/maps/api/place".into(),
            places_api_key: None,
            photo_max_width: 800,
            photo_proxy_url: "photo".into(),
            embed_photo_key: false,
            data_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("site"),
            default_category: None,
            map_center: [35.0116, 135.7681],
            service_worker_path: None,
        }
    }
}

impl Settings {
    /// Defaults, then the config file (optional unless given explicitly), then
    /// `FOOD_FINDER_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let mut settings: Settings = Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        if settings.places_api_key.is_none() {
            settings.places_api_key = std::env::var(FALLBACK_KEY_VAR).ok();
        }
        settings.places_api_key = settings
            .places_api_key
            .take()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        settings.checkpoint_every = settings.checkpoint_every.max(1);
        Ok(settings)
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            min_source_rating: self.min_source_rating,
            min_api_rating: self.min_api_rating,
        }
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn enrich_delay(&self) -> Duration {
        Duration::from_millis(self.enrich_delay_ms)
    }

    pub fn raw_path(&self) -> PathBuf {
        self.data_dir.join("raw.json")
    }

    pub fn final_path(&self) -> PathBuf {
        self.data_dir.join("final.json")
    }

    pub fn rejected_path(&self) -> PathBuf {
        self.data_dir.join("rejected.json")
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.data_dir.join("checkpoint.json")
    }

    pub fn page_path(&self) -> PathBuf {
        self.output_dir.join("index.html")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join("manifest.json")
    }
}

/// Both rating gates a listing has to clear to reach the final dataset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub min_source_rating: f64,
    pub min_api_rating: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Settings::default().thresholds()
    }
}

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("no places API key configured (set FOOD_FINDER_PLACES_API_KEY or GOOGLE_PLACES_API_KEY)")]
    MissingApiKey,
    #[error("places request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{endpoint} returned {status}{}", .message.as_deref().map(|m| format!(": {}", m)).unwrap_or_default())]
    Api {
        endpoint: &'static str,
        status: String,
        message: Option<String>,
    },
    #[error("place {0} has no geometry")]
    MissingGeometry(String),
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("checkpoint {path:?} is corrupt ({source}); delete it or rerun with --fresh")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

//! Restaurant map pipeline: scrape a rating-sorted listing site, enrich each
//! listing from a places API with resumable checkpoints, tag cuisines, and
//! render everything into one static map page.

pub mod checkpoint;
pub mod classify;
pub mod config;
pub mod error;
pub mod geo;
pub mod model;
pub mod page;
pub mod places;
pub mod runner;
pub mod source;
pub mod store;

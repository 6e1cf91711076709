use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;

use food_finder::checkpoint::{self, CheckpointState};
use food_finder::classify;
use food_finder::config::Settings;
use food_finder::geo;
use food_finder::model::{Coordinates, MergedRecord, RawListing};
use food_finder::page::{self, PageOptions};
use food_finder::places::PlacesClient;
use food_finder::runner::{BatchRunner, RunOutcome};
use food_finder::source::{self, HttpListingSource};
use food_finder::store;

#[derive(Parser)]
#[command(name = "food_finder", about = "Top-rated restaurant map builder")]
struct Cli {
    /// Config file (default: ./food_finder.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk the listing site and save raw listings
    Scrape {
        /// Override the page-count ceiling
        #[arg(long)]
        max_pages: Option<u32>,
    },
    /// Enrich raw listings via the places API (resumable)
    Enrich {
        /// Max listings to process this run
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Delete the checkpoint and start over
        #[arg(long)]
        fresh: bool,
    },
    /// Re-tag records that have no specific cuisine category
    Classify,
    /// Render the map page from the final dataset
    Build,
    /// Scrape + enrich + build
    Run {
        /// Max listings to enrich this run
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Nearest restaurants to a point, with walking times
    Near {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },
    /// Show pipeline statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Scrape { max_pages } => scrape(&settings, max_pages).await.map(|_| ()),
        Commands::Enrich { limit, fresh } => {
            if fresh && checkpoint::clear(&settings.checkpoint_path())? {
                println!("Removed checkpoint {:?}", settings.checkpoint_path());
            }
            let raw = store::load_raw(&settings.raw_path())
                .context("No raw listings. Run 'scrape' first.")?;
            enrich(&settings, &raw, limit).await.map(|_| ())
        }
        Commands::Classify => reclassify(&settings),
        Commands::Build => build(&settings),
        Commands::Run { limit } => {
            let raw = scrape(&settings, None).await?;
            if raw.is_empty() {
                println!("No listings scraped, nothing to enrich.");
                return Ok(());
            }
            let outcome = enrich(&settings, &raw, limit).await?;
            if outcome.remaining > 0 {
                println!(
                    "{} listings still pending; rerun 'enrich' to continue before building.",
                    outcome.remaining
                );
            }
            build(&settings)
        }
        Commands::Near { lat, lng, limit } => near(&settings, Coordinates::new(lat, lng), limit),
        Commands::Stats => stats(&settings),
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn scrape(settings: &Settings, max_pages: Option<u32>) -> Result<Vec<RawListing>> {
    let source = HttpListingSource::new(settings)?;
    println!(
        "Scraping {} listings rated {}+ ...",
        settings.city, settings.min_source_rating
    );
    let listings = source::collect_listings(
        &source,
        settings.min_source_rating,
        max_pages.unwrap_or(settings.max_pages),
        settings.page_delay(),
    )
    .await;
    store::write_json(&settings.raw_path(), &listings)?;
    println!(
        "Saved {} listings to {:?}",
        listings.len(),
        settings.raw_path()
    );
    Ok(listings)
}

async fn enrich(settings: &Settings, raw: &[RawListing], limit: Option<usize>) -> Result<RunOutcome> {
    let client = PlacesClient::new(settings)?;
    let outcome = BatchRunner::new(&client, settings.city.clone(), settings.thresholds())
        .delay(settings.enrich_delay())
        .checkpoint_every(settings.checkpoint_every)
        .limit(limit)
        .run(raw, &settings.checkpoint_path())
        .await?;

    store::save_dataset(&settings.final_path(), &outcome.accepted)?;
    store::save_rejected(&settings.rejected_path(), &outcome.rejected)?;

    println!("Total listings:  {}", raw.len());
    println!("Processed now:   {}", outcome.processed_now);
    println!("Accepted:        {}", outcome.accepted.len());
    println!("Rejected:        {}", outcome.rejected.len());
    if outcome.remaining > 0 {
        println!("Remaining:       {}", outcome.remaining);
    }
    println!("Saved {:?}", settings.final_path());
    Ok(outcome)
}

fn reclassify(settings: &Settings) -> Result<()> {
    let path = settings.final_path();
    let mut records = store::load_dataset(&path)?;
    let changed = classify::reclassify(&mut records);
    store::save_dataset(&path, &records)?;
    println!("Re-tagged {} of {} records", changed, records.len());
    print_counts(&classify::category_counts(&records));
    Ok(())
}

fn build(settings: &Settings) -> Result<()> {
    let records = store::load_dataset(&settings.final_path())
        .context("No final dataset. Run 'enrich' first.")?;
    let opts = PageOptions {
        city: settings.city.clone(),
        center: settings.map_center,
        min_source_rating: settings.min_source_rating,
        min_api_rating: settings.min_api_rating,
        default_category: settings.default_category.clone(),
        service_worker_path: settings.service_worker_path.clone(),
    };
    let built = page::build(&records, &opts)?;

    std::fs::create_dir_all(&settings.output_dir)
        .with_context(|| format!("Failed to create {:?}", settings.output_dir))?;
    std::fs::write(settings.page_path(), &built.html)
        .with_context(|| format!("Failed to write {:?}", settings.page_path()))?;
    store::write_json(&settings.manifest_path(), &page::manifest(&opts))?;

    if built.dropped > 0 {
        warn!(dropped = built.dropped, "Records without coordinates were skipped");
    }
    println!(
        "Wrote {:?} with {} restaurants",
        settings.page_path(),
        built.collection.features.len()
    );
    print_counts(&built.category_counts);
    Ok(())
}

fn near(settings: &Settings, here: Coordinates, limit: usize) -> Result<()> {
    let records = store::load_dataset(&settings.final_path())?;
    let mut by_distance: Vec<(f64, &MergedRecord)> = records
        .iter()
        .filter_map(|r| Some((geo::distance_km(here, r.coordinates()?), r)))
        .collect();
    by_distance.sort_by(|a, b| a.0.total_cmp(&b.0));

    if by_distance.is_empty() {
        println!("No restaurants with coordinates.");
        return Ok(());
    }
    println!(
        "{:>3} | {:<28} | {:>4} | {:>7} | {:<14} | {:<16}",
        "#", "Restaurant", "★", "km", "Walk", "Area"
    );
    println!("{}", "-".repeat(86));
    for (i, (km, r)) in by_distance.iter().take(limit).enumerate() {
        let rating = r
            .place
            .api_rating
            .map(|x| format!("{:.1}", x))
            .unwrap_or_else(|| "-".into());
        println!(
            "{:>3} | {:<28} | {:>4} | {:>7.2} | {:<14} | {:<16}",
            i + 1,
            truncate(r.display_name(), 28),
            rating,
            km,
            geo::format_walking_time(*km),
            truncate(&r.listing.area, 16)
        );
    }
    Ok(())
}

fn stats(settings: &Settings) -> Result<()> {
    let count = |path: PathBuf| -> Option<usize> {
        store::read_json::<Vec<serde_json::Value>>(&path)
            .ok()
            .map(|v| v.len())
    };
    let show = |n: Option<usize>| n.map(|n| n.to_string()).unwrap_or_else(|| "-".into());

    println!("Raw listings: {}", show(count(settings.raw_path())));
    println!("Accepted:     {}", show(count(settings.final_path())));
    println!("Rejected:     {}", show(count(settings.rejected_path())));

    match CheckpointState::load(&settings.checkpoint_path()) {
        Ok(state) => {
            println!("Checkpoint:   {} processed", state.processed.len());
            let mut reasons: BTreeMap<&str, usize> = BTreeMap::new();
            for r in &state.rejected {
                *reasons.entry(r.reason.label()).or_insert(0) += 1;
            }
            for (reason, n) in reasons {
                println!("  {:<20} {}", reason, n);
            }
            if let Some(at) = state.updated_at {
                println!("  updated {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
            }
        }
        Err(e) => warn!("{}", e),
    }
    Ok(())
}

fn print_counts(counts: &BTreeMap<String, usize>) {
    if counts.is_empty() {
        return;
    }
    println!("\nCategory counts:");
    for (tag, n) in classify::ranked_counts(counts) {
        println!("  {:<12} {}", tag, n);
    }
}

/// Cut to `max` characters, marking the cut with "...".
fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &s[..cut]),
        None => s.to_string(),
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let total = d.as_secs();
    match (total / 3600, (total % 3600) / 60, total % 60) {
        (0, 0, _) => format!("{:.1}s", d.as_secs_f64()),
        (0, m, s) => format!("{}m {}s", m, s),
        (h, m, s) => format!("{}h {}m {}s", h, m, s),
    }
}

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::model::RawListing;

const FALLBACK_AREA: &str = "Unknown";
const FALLBACK_CUISINE: &str = "Japanese";

/// One page of listings plus whether the walk should go on.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SourcePage {
    pub listings: Vec<RawListing>,
    pub should_continue: bool,
}

impl SourcePage {
    fn exhausted() -> Self {
        SourcePage::default()
    }
}

#[async_trait]
pub trait ListingSource {
    /// Fetch and parse one page. Never fails: a bad response reads as "no more
    /// data".
    async fn fetch_page(&self, page: u32, min_rating: f64) -> SourcePage;
}

/// Fetches rating-sorted listing pages over HTTP.
pub struct HttpListingSource {
    client: reqwest::Client,
    url_template: String,
}

impl HttpListingSource {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(Duration::from_secs(settings.source_timeout_secs))
            .build()?;
        Ok(HttpListingSource {
            client,
            url_template: settings.source_url.clone(),
        })
    }

    fn url(&self, page: u32) -> String {
        self.url_template.replace("{page}", &page.to_string())
    }
}

#[async_trait]
impl ListingSource for HttpListingSource {
    async fn fetch_page(&self, page: u32, min_rating: f64) -> SourcePage {
        let url = self.url(page);
        debug!(%url, "fetching listing page");
        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(page, "Error fetching page: {}", e);
                return SourcePage::exhausted();
            }
        };
        if !response.status().is_success() {
            warn!(page, status = %response.status(), "Listing page not available");
            return SourcePage::exhausted();
        }
        match response.text().await {
            Ok(body) => parse_listing_page(&body, min_rating),
            Err(e) => {
                warn!(page, "Error reading page body: {}", e);
                SourcePage::exhausted()
            }
        }
    }
}

struct ListingSelectors {
    listing: Selector,
    rating: Selector,
    name: Selector,
    area: Selector,
    genre: Selector,
}

fn selectors() -> &'static ListingSelectors {
    static SELECTORS: OnceLock<ListingSelectors> = OnceLock::new();
    SELECTORS.get_or_init(|| {
        let parse = |css: &str| Selector::parse(css).unwrap_or_else(|e| panic!("{}: {}", css, e));
        ListingSelectors {
            listing: parse("div.list-rst"),
            rating: parse("span.c-rating__val"),
            name: parse("a.list-rst__rst-name-target"),
            area: parse("div.list-rst__area"),
            genre: parse("div.list-rst__genre"),
        }
    })
}

fn clean_text(el: ElementRef<'_>) -> String {
    static WS: OnceLock<Regex> = OnceLock::new();
    let ws = WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    let joined: String = el.text().collect();
    ws.replace_all(joined.trim(), " ").to_string()
}

fn first_text(root: ElementRef<'_>, sel: &Selector) -> Option<String> {
    root.select(sel)
        .next()
        .map(clean_text)
        .filter(|t| !t.is_empty())
}

/// Parse a rating-sorted listing page.
///
/// Listings without a readable rating or name are skipped. The first listing
/// rated below `min_rating` ends the page and clears `should_continue`; this
/// relies on the site sorting by rating descending. A page with no listing
/// markup at all is treated as exhausted.
pub fn parse_listing_page(html: &str, min_rating: f64) -> SourcePage {
    let sel = selectors();
    let doc = Html::parse_document(html);

    let mut listings = Vec::new();
    let mut seen_any = false;
    for node in doc.select(&sel.listing) {
        seen_any = true;
        let Some(rating_text) = first_text(node, &sel.rating) else {
            continue;
        };
        let rating = match rating_text.parse::<f64>() {
            Ok(r) => r,
            Err(_) => {
                warn!(rating = %rating_text, "Skipping listing with unreadable rating");
                continue;
            }
        };
        if rating < min_rating {
            return SourcePage {
                listings,
                should_continue: false,
            };
        }
        let Some(name) = first_text(node, &sel.name) else {
            warn!(rating, "Skipping listing without a name");
            continue;
        };
        let area = first_text(node, &sel.area).unwrap_or_else(|| FALLBACK_AREA.to_string());
        let cuisine_text =
            first_text(node, &sel.genre).unwrap_or_else(|| FALLBACK_CUISINE.to_string());
        debug!(%name, rating, "Found listing");
        listings.push(RawListing {
            name,
            source_rating: rating,
            area,
            cuisine_text,
        });
    }

    SourcePage {
        listings,
        should_continue: seen_any,
    }
}

/// Walk pages from 1 until a page comes back empty, a listing drops below
/// `min_rating`, or `max_pages` is reached. Sleeps `delay` between pages.
pub async fn collect_listings<S: ListingSource + ?Sized>(
    source: &S,
    min_rating: f64,
    max_pages: u32,
    delay: Duration,
) -> Vec<RawListing> {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner} page {pos} {msg}") {
        pb.set_style(style);
    }

    let mut all = Vec::new();
    let mut page = 1;
    loop {
        pb.set_position(page as u64);
        let SourcePage {
            listings,
            should_continue,
        } = source.fetch_page(page, min_rating).await;

        if listings.is_empty() {
            info!(page, "No more results, stopping");
            break;
        }
        all.extend(listings);
        pb.set_message(format!("{} listings", all.len()));

        if !should_continue {
            info!(page, min_rating, "Reached listings below minimum rating, stopping");
            break;
        }
        if page >= max_pages {
            info!(max_pages, "Reached page limit, stopping");
            break;
        }
        page += 1;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    pb.finish_and_clear();
    info!("Collected {} listings from {} pages", all.len(), page);
    all
}

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use crate::checkpoint::CheckpointState;
use crate::config::Thresholds;
use crate::model::{MergedRecord, RawListing, RejectReason, RejectedListing};
use crate::places::Enricher;

/// Accumulated results after a run (including everything resumed from the
/// checkpoint).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutcome {
    pub accepted: Vec<MergedRecord>,
    pub rejected: Vec<RejectedListing>,
    /// Records handled by this invocation.
    pub processed_now: usize,
    /// Listings still pending when the run stopped (non-zero only with a limit).
    pub remaining: usize,
}

pub struct BatchRunner<'a, E: Enricher + ?Sized> {
    enricher: &'a E,
    city: String,
    thresholds: Thresholds,
    delay: Duration,
    checkpoint_every: usize,
    limit: Option<usize>,
}

enum Verdict {
    Accept(MergedRecord),
    Reject(RejectedListing),
}

impl<'a, E: Enricher + ?Sized> BatchRunner<'a, E> {
    pub fn new(enricher: &'a E, city: impl Into<String>, thresholds: Thresholds) -> Self {
        BatchRunner {
            enricher,
            city: city.into(),
            thresholds,
            delay: Duration::ZERO,
            checkpoint_every: 1,
            limit: None,
        }
    }

    /// Pause between enrichment calls.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn checkpoint_every(mut self, n: usize) -> Self {
        self.checkpoint_every = n.max(1);
        self
    }

    /// Stop after this many records; the checkpoint lets the next run pick up.
    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    async fn judge(&self, listing: &RawListing) -> Verdict {
        if listing.source_rating < self.thresholds.min_source_rating {
            return Verdict::Reject(RejectedListing {
                listing: listing.clone(),
                reason: RejectReason::BelowSourceRating,
            });
        }
        let Some(place) = self.enricher.enrich(&listing.name, &self.city).await else {
            return Verdict::Reject(RejectedListing {
                listing: listing.clone(),
                reason: RejectReason::NotFound,
            });
        };
        match place.api_rating {
            Some(r) if r >= self.thresholds.min_api_rating => {
                Verdict::Accept(MergedRecord::new(listing.clone(), place))
            }
            api_rating => Verdict::Reject(RejectedListing {
                listing: listing.clone(),
                reason: RejectReason::BelowApiRating { api_rating },
            }),
        }
    }

    /// Enrich every listing in `pending` whose key is not yet in the
    /// checkpoint at `checkpoint_path`, saving progress as it goes.
    pub async fn run(&self, pending: &[RawListing], checkpoint_path: &Path) -> Result<RunOutcome> {
        let mut state = CheckpointState::load(checkpoint_path)?;
        let todo: Vec<&RawListing> = pending.iter().filter(|l| !state.is_processed(l)).collect();
        info!(
            total = pending.len(),
            done = pending.len() - todo.len(),
            todo = todo.len(),
            "Starting enrichment"
        );

        let pb = ProgressBar::new(todo.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta}) {msg}")
        {
            pb.set_style(style.progress_chars("=> "));
        }

        let mut processed_now = 0usize;
        let mut called_api = false;
        for listing in &todo {
            if self.limit.is_some_and(|n| processed_now >= n) {
                break;
            }
            // duplicates within one input file
            if state.is_processed(listing) {
                pb.inc(1);
                continue;
            }
            let needs_api = listing.source_rating >= self.thresholds.min_source_rating;
            if needs_api && called_api && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            called_api |= needs_api;

            match self.judge(listing).await {
                Verdict::Accept(rec) => {
                    debug!(name = %listing.name, rating = ?rec.place.api_rating, "accepted");
                    state.accept(rec);
                }
                Verdict::Reject(rej) => {
                    debug!(name = %listing.name, reason = rej.reason.label(), "rejected");
                    state.reject(rej);
                }
            }
            processed_now += 1;
            pb.inc(1);
            pb.set_message(format!("{} accepted", state.accepted.len()));

            if processed_now % self.checkpoint_every == 0 {
                state.save(checkpoint_path)?;
            }
        }
        state.save(checkpoint_path)?;
        pb.finish_and_clear();

        let remaining = todo
            .iter()
            .filter(|l| !state.is_processed(l))
            .map(|l| l.key())
            .collect::<BTreeSet<_>>()
            .len();
        info!(
            processed_now,
            accepted = state.accepted.len(),
            rejected = state.rejected.len(),
            remaining,
            "Enrichment finished"
        );
        Ok(RunOutcome {
            accepted: state.accepted,
            rejected: state.rejected,
            processed_now,
            remaining,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EnrichmentResult;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Answers from a fixed table, recording every name asked for.
    struct TableEnricher {
        ratings: HashMap<String, f64>,
        calls: Mutex<Vec<String>>,
    }

    impl TableEnricher {
        fn new(entries: &[(&str, f64)]) -> Self {
            TableEnricher {
                ratings: entries.iter().map(|(n, r)| (n.to_string(), *r)).collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Enricher for TableEnricher {
        async fn enrich(&self, name: &str, _city: &str) -> Option<EnrichmentResult> {
            self.calls.lock().unwrap().push(name.to_string());
            self.ratings.get(name).map(|r| EnrichmentResult {
                display_name: name.to_uppercase(),
                api_rating: Some(*r),
                place_id: format!("id-{}", name),
                lat: Some(35.0),
                lng: Some(135.7),
                ..Default::default()
            })
        }
    }

    fn listing(name: &str, rating: f64) -> RawListing {
        RawListing {
            name: name.into(),
            source_rating: rating,
            area: "Gion".into(),
            cuisine_text: "寿司".into(),
        }
    }

    fn inputs() -> Vec<RawListing> {
        vec![
            listing("a", 4.0),
            listing("b", 3.9),
            listing("c", 3.8),
            listing("d", 3.4),
            listing("e", 3.7),
        ]
    }

    fn table() -> TableEnricher {
        TableEnricher::new(&[("a", 4.6), ("b", 4.0), ("d", 4.9), ("e", 4.2)])
    }

    fn names(recs: &[MergedRecord]) -> Vec<&str> {
        recs.iter().map(|r| r.listing.name.as_str()).collect()
    }

    #[tokio::test]
    async fn sorts_into_accepted_and_rejected() {
        let dir = TempDir::new().unwrap();
        let enricher = table();
        let out = BatchRunner::new(&enricher, "Kyoto", Thresholds::default())
            .run(&inputs(), &dir.path().join("cp.json"))
            .await
            .unwrap();

        assert_eq!(names(&out.accepted), vec!["a", "e"]);
        let reasons: Vec<(&str, &RejectReason)> = out
            .rejected
            .iter()
            .map(|r| (r.listing.name.as_str(), &r.reason))
            .collect();
        assert_eq!(
            reasons,
            vec![
                ("b", &RejectReason::BelowApiRating { api_rating: Some(4.0) }),
                ("c", &RejectReason::NotFound),
                ("d", &RejectReason::BelowSourceRating),
            ]
        );
        // the below-source listing never reaches the API
        assert_eq!(enricher.calls(), vec!["a", "b", "c", "e"]);
        assert_eq!(out.processed_now, 5);
        assert_eq!(out.remaining, 0);
        assert!(out.accepted[0].categories.contains("Sushi"));
    }

    #[tokio::test]
    async fn resume_matches_single_run() {
        let once_dir = TempDir::new().unwrap();
        let once = BatchRunner::new(&table(), "Kyoto", Thresholds::default())
            .run(&inputs(), &once_dir.path().join("cp.json"))
            .await
            .unwrap();

        let dir = TempDir::new().unwrap();
        let cp = dir.path().join("cp.json");
        let first = table();
        let partial = BatchRunner::new(&first, "Kyoto", Thresholds::default())
            .limit(Some(2))
            .run(&inputs(), &cp)
            .await
            .unwrap();
        assert_eq!(partial.processed_now, 2);
        assert_eq!(partial.remaining, 3);

        let second = table();
        let resumed = BatchRunner::new(&second, "Kyoto", Thresholds::default())
            .run(&inputs(), &cp)
            .await
            .unwrap();
        assert_eq!(second.calls(), vec!["c", "e"]);
        assert_eq!(resumed.accepted, once.accepted);
        assert_eq!(resumed.rejected, once.rejected);

        // a third run has nothing left to do
        let third = table();
        let again = BatchRunner::new(&third, "Kyoto", Thresholds::default())
            .run(&inputs(), &cp)
            .await
            .unwrap();
        assert!(third.calls().is_empty());
        assert_eq!(again.processed_now, 0);
        assert_eq!(again.accepted, once.accepted);
    }

    #[tokio::test]
    async fn remaining_counts_duplicate_listings_once() {
        let dir = TempDir::new().unwrap();
        let raw = vec![listing("a", 4.0), listing("b", 3.9), listing("b", 3.9), listing("e", 3.7)];
        let out = BatchRunner::new(&table(), "Kyoto", Thresholds::default())
            .limit(Some(1))
            .run(&raw, &dir.path().join("cp.json"))
            .await
            .unwrap();
        assert_eq!(out.processed_now, 1);
        assert_eq!(out.remaining, 2);
    }

    #[tokio::test]
    async fn resume_key_survives_reordering() {
        let dir = TempDir::new().unwrap();
        let cp = dir.path().join("cp.json");
        BatchRunner::new(&table(), "Kyoto", Thresholds::default())
            .limit(Some(2))
            .run(&inputs(), &cp)
            .await
            .unwrap();

        let mut reordered = inputs();
        reordered.reverse();
        let second = table();
        BatchRunner::new(&second, "Kyoto", Thresholds::default())
            .run(&reordered, &cp)
            .await
            .unwrap();
        assert_eq!(second.calls(), vec!["e", "c"]);
    }

    #[tokio::test]
    async fn checkpoint_written_at_cadence() {
        let dir = TempDir::new().unwrap();
        let cp = dir.path().join("cp.json");
        BatchRunner::new(&table(), "Kyoto", Thresholds::default())
            .checkpoint_every(3)
            .limit(Some(4))
            .run(&inputs(), &cp)
            .await
            .unwrap();
        let state = CheckpointState::load(&cp).unwrap();
        assert_eq!(state.processed.len(), 4);
        assert!(state.updated_at.is_some());
    }

    #[tokio::test]
    async fn duplicate_listings_processed_once() {
        let dir = TempDir::new().unwrap();
        let enricher = table();
        let dupes = vec![listing("a", 4.0), listing("a", 4.0)];
        let out = BatchRunner::new(&enricher, "Kyoto", Thresholds::default())
            .run(&dupes, &dir.path().join("cp.json"))
            .await
            .unwrap();
        assert_eq!(out.accepted.len(), 1);
        assert_eq!(enricher.calls(), vec!["a"]);
    }

    #[tokio::test]
    async fn thresholds_are_configurable() {
        let dir = TempDir::new().unwrap();
        let strict = Thresholds {
            min_source_rating: 3.5,
            min_api_rating: 4.5,
        };
        let out = BatchRunner::new(&table(), "Kyoto", strict)
            .run(&inputs(), &dir.path().join("cp.json"))
            .await
            .unwrap();
        assert_eq!(names(&out.accepted), vec!["a"]);
    }
}

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::index::DedupIndex;
use super::reconcile::{ReconcileOutcome, Reconciler};
use crate::feed::{fetch_feed, FetchSettings};
use crate::storage::Database;

/// Throttling knobs of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// URLs per batch; a batch finishes completely before the next starts
    pub batch_size: usize,
    /// Fetch+reconcile pipelines in flight at once
    pub concurrency: usize,
    /// Pause between batches (not after the last one)
    pub batch_delay: Duration,
    pub fetch: FetchSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            concurrency: 3,
            batch_delay: Duration::from_secs(5),
            fetch: FetchSettings::default(),
        }
    }
}

/// Counters for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub feeds_total: usize,
    /// Feeds downloaded and parsed, whether or not reconciling succeeded
    pub fetched: usize,
    pub fetch_failed: usize,
    pub reconcile_failed: usize,
    pub podcasts_inserted: usize,
    pub podcasts_updated: usize,
    pub episodes_inserted: usize,
    /// Feed items dropped for lacking an iTunes block
    pub items_skipped: usize,
    /// URLs never fetched, or abandoned mid-flight, because the run was cancelled
    pub unprocessed: usize,
    pub cancelled: bool,
}

impl RunSummary {
    fn record(&mut self, outcome: FeedOutcome) {
        match outcome {
            FeedOutcome::Reconciled(outcome) => {
                self.fetched += 1;
                self.podcasts_inserted += usize::from(outcome.inserted);
                self.podcasts_updated += usize::from(outcome.updated);
                self.episodes_inserted += outcome.episodes_inserted;
                self.items_skipped += outcome.skipped_items;
            }
            FeedOutcome::FetchFailed => self.fetch_failed += 1,
            FeedOutcome::ReconcileFailed => {
                self.fetched += 1;
                self.reconcile_failed += 1;
            }
            FeedOutcome::Cancelled => self.unprocessed += 1,
        }
    }
}

#[derive(Debug)]
enum FeedOutcome {
    Reconciled(ReconcileOutcome),
    FetchFailed,
    ReconcileFailed,
    Cancelled,
}

/// Returns a token that cancels itself once `deadline` has elapsed.
///
/// Must be called from within a tokio runtime.
pub fn deadline_token(deadline: Duration) -> CancellationToken {
    let token = CancellationToken::new();
    let timer = token.clone();

    tokio::spawn(async move {
        tokio::select! {
            _ = timer.cancelled() => {}
            _ = tokio::time::sleep(deadline) => {
                tracing::warn!(deadline = ?deadline, "Run deadline reached, cancelling remaining feeds");
                timer.cancel();
            }
        }
    });

    token
}

/// Fetch and reconcile every URL in fixed-size batches.
///
/// At most `settings.concurrency` feeds are in flight at once. Per-feed
/// failures are logged and counted, never propagated. Once `cancel` fires,
/// in-flight feeds are abandoned (open store transactions roll back) and the
/// remaining URLs are counted as unprocessed.
///
/// # Errors
///
/// Fails only when the dedup index cannot be loaded from the store, before
/// any feed is processed.
pub async fn run(
    db: &Database,
    client: &reqwest::Client,
    urls: Vec<String>,
    settings: &PipelineSettings,
    cancel: CancellationToken,
) -> Result<RunSummary> {
    let index = DedupIndex::load(db)
        .await
        .context("Failed to load existing podcasts")?;
    let reconciler = Reconciler::new(db.clone(), Arc::new(index));
    let semaphore = Arc::new(Semaphore::new(settings.concurrency.max(1)));

    let mut summary = RunSummary {
        feeds_total: urls.len(),
        ..Default::default()
    };
    let mut remaining = urls.len();

    for (batch_number, batch) in urls.chunks(settings.batch_size.max(1)).enumerate() {
        if batch_number > 0 && !settings.batch_delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(settings.batch_delay) => {}
            }
        }
        if cancel.is_cancelled() {
            break;
        }

        tracing::info!(
            batch = batch_number + 1,
            feeds = batch.len(),
            remaining,
            "Starting batch"
        );

        let mut tasks = JoinSet::new();
        for url in batch {
            tasks.spawn(process_feed(
                url.clone(),
                client.clone(),
                reconciler.clone(),
                settings.fetch.clone(),
                Arc::clone(&semaphore),
                cancel.clone(),
            ));
        }
        remaining -= batch.len();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    tracing::error!(error = %e, "Feed task panicked");
                    summary.reconcile_failed += 1;
                }
            }
        }
    }

    summary.unprocessed += remaining;
    summary.cancelled = cancel.is_cancelled();

    if summary.cancelled {
        tracing::warn!(unprocessed = summary.unprocessed, "Run cancelled");
    }

    Ok(summary)
}

async fn process_feed(
    url: String,
    client: reqwest::Client,
    reconciler: Reconciler,
    fetch: FetchSettings,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
) -> FeedOutcome {
    let _permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => return FeedOutcome::Cancelled,
        permit = semaphore.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return FeedOutcome::Cancelled,
        },
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::debug!(url = %url, "Abandoning feed on cancellation");
            FeedOutcome::Cancelled
        }
        outcome = fetch_and_reconcile(&url, &client, &reconciler, &fetch) => outcome,
    }
}

async fn fetch_and_reconcile(
    url: &str,
    client: &reqwest::Client,
    reconciler: &Reconciler,
    fetch: &FetchSettings,
) -> FeedOutcome {
    let feed = match fetch_feed(client, url, fetch).await {
        Ok(feed) => feed,
        Err(e) => {
            tracing::warn!(url = %url, error = %e.kind, "Failed to fetch feed");
            return FeedOutcome::FetchFailed;
        }
    };

    match reconciler.reconcile(&feed).await {
        Ok(outcome) => {
            tracing::info!(
                url = %url,
                slug = %outcome.slug,
                new_episodes = outcome.episodes_inserted,
                "Processed feed"
            );
            FeedOutcome::Reconciled(outcome)
        }
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "Failed to reconcile feed");
            FeedOutcome::ReconcileFailed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rss(title: &str) -> String {
        format!(
            r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd"><channel>
    <title>{title}</title>
    <item><guid>ep-1</guid><title>Episode</title><itunes:duration>10:00</itunes:duration></item>
</channel></rss>"#
        )
    }

    fn fast_settings() -> PipelineSettings {
        PipelineSettings {
            batch_size: 10,
            concurrency: 3,
            batch_delay: Duration::ZERO,
            fetch: FetchSettings {
                timeout: Duration::from_secs(5),
                ..Default::default()
            },
        }
    }

    async fn serve_rss(title: &str, delay: Duration) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(rss(title))
                    .set_delay(delay),
            )
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_empty_url_list() {
        let db = Database::open(":memory:").await.unwrap();
        let summary = run(
            &db,
            &reqwest::Client::new(),
            Vec::new(),
            &fast_settings(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(summary, RunSummary::default());
    }

    #[tokio::test]
    async fn test_pre_cancelled_run_processes_nothing() {
        let db = Database::open(":memory:").await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let urls: Vec<String> = (0..25)
            .map(|i| format!("http://127.0.0.1:9/feed-{i}"))
            .collect();
        let summary = run(&db, &reqwest::Client::new(), urls, &fast_settings(), cancel)
            .await
            .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.feeds_total, 25);
        assert_eq!(summary.unprocessed, 25);
        assert_eq!(summary.fetched, 0);
        assert_eq!(db.count_podcasts().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_counts_successes_and_failures() {
        let db = Database::open(":memory:").await.unwrap();
        let ok = serve_rss("Good Show", Duration::ZERO).await;
        let broken = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&broken)
            .await;

        let urls = vec![format!("{}/feed", ok.uri()), format!("{}/feed", broken.uri())];
        let summary = run(
            &db,
            &reqwest::Client::new(),
            urls,
            &fast_settings(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.feeds_total, 2);
        assert_eq!(summary.fetched, 1);
        assert_eq!(summary.fetch_failed, 1);
        assert_eq!(summary.podcasts_inserted, 1);
        assert_eq!(summary.episodes_inserted, 1);
        assert!(!summary.cancelled);
    }

    #[tokio::test]
    async fn test_concurrency_limit_bounds_parallel_fetches() {
        let db = Database::open(":memory:").await.unwrap();
        let delay = Duration::from_millis(200);
        let mut servers = Vec::new();
        for i in 0..4 {
            servers.push(serve_rss(&format!("Show {i}"), delay).await);
        }
        let urls = servers.iter().map(|s| format!("{}/feed", s.uri())).collect();
        let settings = PipelineSettings {
            concurrency: 2,
            ..fast_settings()
        };

        let started = Instant::now();
        let summary = run(&db, &reqwest::Client::new(), urls, &settings, CancellationToken::new())
            .await
            .unwrap();

        // Four slow feeds through two permits need at least two rounds
        assert!(started.elapsed() >= delay * 2);
        assert_eq!(summary.podcasts_inserted, 4);
    }

    /// Serves an RSS document per path and records when each request arrived.
    struct RecordingFeed {
        delay: Duration,
        starts: Arc<std::sync::Mutex<Vec<(usize, Instant)>>>,
    }

    impl wiremock::Respond for RecordingFeed {
        fn respond(&self, request: &wiremock::Request) -> ResponseTemplate {
            let index = request
                .url
                .path()
                .trim_start_matches("/feed-")
                .parse()
                .unwrap_or(usize::MAX);
            self.starts.lock().unwrap().push((index, Instant::now()));
            ResponseTemplate::new(200)
                .set_body_string(rss(&format!("Show {index}")))
                .set_delay(self.delay)
        }
    }

    #[tokio::test]
    async fn test_in_flight_fetches_never_exceed_concurrency_and_batches_do_not_overlap() {
        let db = Database::open(":memory:").await.unwrap();
        let delay = Duration::from_millis(200);
        let starts = Arc::new(std::sync::Mutex::new(Vec::new()));
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(RecordingFeed {
                delay,
                starts: Arc::clone(&starts),
            })
            .mount(&server)
            .await;

        let urls = (0..7).map(|i| format!("{}/feed-{i}", server.uri())).collect();
        let settings = PipelineSettings {
            batch_size: 4,
            concurrency: 2,
            ..fast_settings()
        };
        let summary = run(&db, &reqwest::Client::new(), urls, &settings, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.podcasts_inserted, 7);

        let starts = starts.lock().unwrap().clone();
        assert_eq!(starts.len(), 7);

        // A response finishes no earlier than its start plus the delay, and a
        // permit is only handed on after that.
        let max_in_flight = starts
            .iter()
            .map(|(_, at)| {
                starts
                    .iter()
                    .filter(|(_, other)| *other <= *at && *at < *other + delay)
                    .count()
            })
            .max()
            .unwrap();
        assert!(max_in_flight <= 2, "{max_in_flight} fetches in flight");

        let last_first_batch_end = starts
            .iter()
            .filter(|(i, _)| *i < 4)
            .map(|(_, at)| *at + delay)
            .max()
            .unwrap();
        let first_second_batch_start = starts
            .iter()
            .filter(|(i, _)| *i >= 4)
            .map(|(_, at)| *at)
            .min()
            .unwrap();
        assert!(first_second_batch_start >= last_first_batch_end);
    }

    #[tokio::test]
    async fn test_batch_delay_between_batches() {
        let db = Database::open(":memory:").await.unwrap();
        let first = serve_rss("First", Duration::ZERO).await;
        let second = serve_rss("Second", Duration::ZERO).await;
        let settings = PipelineSettings {
            batch_size: 1,
            batch_delay: Duration::from_millis(300),
            ..fast_settings()
        };

        let started = Instant::now();
        let summary = run(
            &db,
            &reqwest::Client::new(),
            vec![format!("{}/feed", first.uri()), format!("{}/feed", second.uri())],
            &settings,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(summary.podcasts_inserted, 2);
    }

    #[tokio::test]
    async fn test_cancellation_during_batch_delay_stops_run() {
        let db = Database::open(":memory:").await.unwrap();
        let first = serve_rss("First", Duration::ZERO).await;
        let settings = PipelineSettings {
            batch_size: 1,
            batch_delay: Duration::from_secs(30),
            ..fast_settings()
        };
        let cancel = deadline_token(Duration::from_millis(500));

        let summary = run(
            &db,
            &reqwest::Client::new(),
            vec![
                format!("{}/feed", first.uri()),
                "http://127.0.0.1:9/a".into(),
                "http://127.0.0.1:9/b".into(),
            ],
            &settings,
            cancel,
        )
        .await
        .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.podcasts_inserted, 1);
        assert_eq!(summary.unprocessed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_token_fires_after_deadline() {
        let token = deadline_token(Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!token.is_cancelled());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(token.is_cancelled());
    }
}

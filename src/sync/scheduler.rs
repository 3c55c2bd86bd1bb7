use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::clock::Clock;
use super::persister::{ingest_item, CycleSummary};
use super::selector::{claim_next, ClaimError};
use crate::feed::{parse_channel, FetchError, FetchFeed, ParseError};
use crate::storage::{DatabaseError, Feed, FeedStore};

/// How a single polling cycle ended.
#[derive(Debug)]
pub enum CycleReport {
    /// No feed is registered
    NoFeedDue,
    /// Storage failed while claiming
    ClaimFailed(DatabaseError),
    FetchFailed { feed: Feed, error: FetchError },
    ParseFailed { feed: Feed, error: ParseError },
    Completed { feed: Feed, summary: CycleSummary },
}

impl CycleReport {
    /// Posts inserted by this cycle (zero unless it completed)
    pub fn inserted(&self) -> usize {
        match self {
            CycleReport::Completed { summary, .. } => summary.inserted,
            _ => 0,
        }
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleReport::NoFeedDue => write!(f, "No feeds registered, nothing to fetch"),
            CycleReport::ClaimFailed(e) => write!(f, "Could not pick a feed: {}", e),
            CycleReport::FetchFailed { feed, error } => {
                write!(f, "Failed to fetch {} ({}): {}", feed.name, feed.url, error)
            }
            CycleReport::ParseFailed { feed, error } => {
                write!(f, "Failed to parse {} ({}): {}", feed.name, feed.url, error)
            }
            CycleReport::Completed { feed, summary } => {
                write!(f, "Now adding posts from: {}\n{}", feed.name, summary)
            }
        }
    }
}

/// Drives claim → fetch → parse → normalize → persist, one feed per cycle.
///
/// Collaborators are injected once; the scheduler keeps no state between
/// cycles beyond what the store holds.
pub struct Scheduler<S, F, C> {
    store: S,
    fetcher: F,
    clock: C,
    fetch_timeout: Duration,
}

impl<S, F, C> Scheduler<S, F, C>
where
    S: FeedStore,
    F: FetchFeed,
    C: Clock,
{
    pub fn new(store: S, fetcher: F, clock: C, fetch_timeout: Duration) -> Self {
        Self {
            store,
            fetcher,
            clock,
            fetch_timeout,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run one full cycle. Never returns an error: every failure is reported
    /// in the [`CycleReport`] and left for the next tick.
    pub async fn run_cycle(&self) -> CycleReport {
        let feed = match claim_next(&self.store, &self.clock).await {
            Ok(feed) => feed,
            Err(ClaimError::NotFound) => {
                tracing::debug!("No feeds to fetch");
                return CycleReport::NoFeedDue;
            }
            Err(ClaimError::Database(e)) => {
                tracing::error!(error = %e, "Failed to claim next feed");
                return CycleReport::ClaimFailed(e);
            }
        };

        let bytes = match self.fetcher.fetch(&feed.url, self.fetch_timeout).await {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!(feed_id = feed.id, url = %feed.url, error = %error, "Feed fetch failed");
                return CycleReport::FetchFailed { feed, error };
            }
        };

        let channel = match parse_channel(&bytes) {
            Ok(channel) => channel,
            Err(error) => {
                tracing::warn!(feed_id = feed.id, url = %feed.url, error = %error, "Feed parse failed");
                return CycleReport::ParseFailed { feed, error };
            }
        };

        let mut summary = CycleSummary::default();
        for item in &channel.items {
            summary.record(ingest_item(&self.store, item, feed.id).await);
        }

        tracing::info!(
            feed_id = feed.id,
            feed = %feed.name,
            items = channel.items.len(),
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            date_skips = summary.date_skips,
            title_skips = summary.title_skips,
            persist_errors = summary.persist_errors,
            "Feed cycle complete"
        );

        CycleReport::Completed { feed, summary }
    }

    /// Run cycles every `interval` until `shutdown` flips to `true`.
    ///
    /// The first cycle starts immediately. Cycles never overlap: a cycle that
    /// outlasts `interval` pushes the next tick back instead of bunching ticks
    /// up. Shutdown is observed between cycles, so a running cycle finishes
    /// first. Dropping the sender side of `shutdown` also stops the loop.
    ///
    /// Returns the number of cycles run.
    pub async fn run_until_cancelled<R>(
        &self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
        mut on_report: R,
    ) -> u64
    where
        R: FnMut(&CycleReport),
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles = 0u64;

        tracing::info!(interval = ?interval, "Polling loop started");

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() {
                        tracing::debug!("Shutdown sender dropped");
                        break;
                    }
                    continue;
                }

                _ = ticker.tick() => {}
            }

            let report = self.run_cycle().await;
            cycles += 1;
            on_report(&report);
        }

        tracing::info!(cycles = cycles, "Polling loop stopped");
        cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use crate::sync::SystemClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Serves the same document for every url and counts requests.
    #[derive(Clone)]
    struct StaticFetcher {
        body: Result<&'static str, u16>,
        calls: Arc<AtomicUsize>,
    }

    impl FetchFeed for StaticFetcher {
        async fn fetch(&self, _url: &str, _timeout: Duration) -> Result<Vec<u8>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.body {
                Ok(body) => Ok(body.as_bytes().to_vec()),
                Err(status) => Err(FetchError::HttpStatus(status)),
            }
        }
    }

    const DOC: &str = r#"<rss version="2.0"><channel><title>Test</title>
        <item><title>Launch Update</title><link>https://example.com/launch</link>
        <pubDate>Wed, 01 May 2024 08:00:00 +0000</pubDate></item>
    </channel></rss>"#;

    async fn scheduler_with(
        body: Result<&'static str, u16>,
        feeds: usize,
    ) -> (Scheduler<Database, StaticFetcher, SystemClock>, Arc<AtomicUsize>) {
        let db = Database::open(":memory:").await.unwrap();
        let user = db.create_user("tester").await.unwrap();
        for i in 0..feeds {
            db.create_feed(
                &format!("Feed {}", i),
                &format!("https://feed{}.example.com/rss", i),
                user.id,
            )
            .await
            .unwrap();
        }
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = StaticFetcher {
            body,
            calls: calls.clone(),
        };
        (
            Scheduler::new(db, fetcher, SystemClock, Duration::from_secs(5)),
            calls,
        )
    }

    #[tokio::test]
    async fn test_cycle_without_feeds() {
        let (scheduler, calls) = scheduler_with(Ok(DOC), 0).await;
        let report = scheduler.run_cycle().await;

        assert!(matches!(report, CycleReport::NoFeedDue));
        assert_eq!(report.inserted(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cycle_fetch_failure_still_claims() {
        let (scheduler, _) = scheduler_with(Err(503), 1).await;
        let report = scheduler.run_cycle().await;

        match report {
            CycleReport::FetchFailed { feed, error } => {
                assert!(feed.last_fetched_at.is_some());
                assert!(matches!(error, FetchError::HttpStatus(503)));
            }
            other => panic!("Expected FetchFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cycle_parse_failure() {
        let (scheduler, _) = scheduler_with(Ok("<rss><channel>"), 1).await;
        assert!(matches!(
            scheduler.run_cycle().await,
            CycleReport::ParseFailed { .. }
        ));
    }

    #[tokio::test]
    async fn test_cycle_completes_and_reports() {
        let (scheduler, _) = scheduler_with(Ok(DOC), 1).await;
        let report = scheduler.run_cycle().await;

        assert_eq!(report.inserted(), 1);
        let text = report.to_string();
        assert!(text.contains("Now adding posts from: Feed 0"));
        assert!(text.contains("No issues"));
    }

    /// Delegates to SQLite but can fail claims or the insert of one url.
    struct FlakyStore {
        db: Database,
        fail_claims: bool,
        fail_url: &'static str,
    }

    impl FeedStore for FlakyStore {
        async fn select_due_feed(&self) -> Result<Option<Feed>, DatabaseError> {
            self.db.select_due_feed().await
        }

        async fn claim_feed(
            &self,
            feed_id: i64,
            now: chrono::DateTime<chrono::Utc>,
        ) -> Result<Feed, DatabaseError> {
            if self.fail_claims {
                return Err(DatabaseError::InstanceLocked);
            }
            self.db.claim_feed(feed_id, now).await
        }

        async fn insert_post(
            &self,
            post: &crate::storage::NewPost,
        ) -> Result<crate::storage::Post, crate::storage::InsertPostError> {
            if post.url == self.fail_url {
                return Err(DatabaseError::NotFound("disk".to_string()).into());
            }
            self.db.insert_post(post).await
        }
    }

    const THREE_ITEMS: &str = r#"<rss version="2.0"><channel><title>Test</title>
        <item><title>First post</title><link>https://example.com/1</link>
        <pubDate>Wed, 01 May 2024 08:00:00 +0000</pubDate></item>
        <item><title>Second post</title><link>https://example.com/2</link>
        <pubDate>Thu, 02 May 2024 08:00:00 +0000</pubDate></item>
        <item><title>Third post</title><link>https://example.com/3</link>
        <pubDate>Fri, 03 May 2024 08:00:00 +0000</pubDate></item>
    </channel></rss>"#;

    async fn flaky_scheduler(
        fail_claims: bool,
        fail_url: &'static str,
    ) -> Scheduler<FlakyStore, StaticFetcher, SystemClock> {
        let (inner, _) = scheduler_with(Ok(THREE_ITEMS), 1).await;
        let store = FlakyStore {
            db: inner.store,
            fail_claims,
            fail_url,
        };
        Scheduler::new(store, inner.fetcher, SystemClock, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_claim_storage_failure_skips_cycle() {
        let scheduler = flaky_scheduler(true, "").await;
        let report = scheduler.run_cycle().await;

        assert!(matches!(report, CycleReport::ClaimFailed(DatabaseError::InstanceLocked)));
        assert_eq!(scheduler.fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_persist_failure_does_not_stop_later_items() {
        let scheduler = flaky_scheduler(false, "https://example.com/2").await;

        match scheduler.run_cycle().await {
            CycleReport::Completed { summary, .. } => {
                assert_eq!(summary.inserted, 2);
                assert_eq!(summary.persist_errors, 1);
                assert_eq!(summary.items_seen(), 3);
            }
            other => panic!("Expected a completed cycle, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_self_closing_item_counted_as_date_skip() {
        let (scheduler, _) = scheduler_with(
            Ok(r#"<rss><channel><title>T</title><item/>
                <item><title>Launch Update</title><link>https://example.com/launch</link>
                <pubDate>Wed, 01 May 2024 08:00:00 +0000</pubDate></item>
            </channel></rss>"#),
            1,
        )
        .await;

        match scheduler.run_cycle().await {
            CycleReport::Completed { summary, .. } => {
                assert_eq!(summary.items_seen(), 2);
                assert_eq!(summary.date_skips, 1);
                assert_eq!(summary.inserted, 1);
            }
            other => panic!("Expected a completed cycle, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_loop_stops_on_shutdown() {
        let (scheduler, calls) = scheduler_with(Ok(DOC), 2).await;
        let (tx, rx) = watch::channel(false);

        let mut reports = Vec::new();
        let cycles = scheduler
            .run_until_cancelled(Duration::from_millis(10), rx, |r| {
                reports.push(r.inserted());
                if reports.len() == 3 {
                    tx.send(true).unwrap();
                }
            })
            .await;

        assert_eq!(cycles, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Second feed's copy of the same link is a duplicate
        assert_eq!(reports, vec![1, 0, 0]);
    }

    #[tokio::test]
    async fn test_loop_already_cancelled_runs_nothing() {
        let (scheduler, calls) = scheduler_with(Ok(DOC), 1).await;
        let (_tx, rx) = watch::channel(true);

        let cycles = scheduler
            .run_until_cancelled(Duration::from_secs(1), rx, |_| {})
            .await;
        assert_eq!(cycles, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_loop_stops_when_sender_dropped() {
        let (scheduler, _) = scheduler_with(Ok(DOC), 1).await;
        let (tx, rx) = watch::channel(false);
        drop(tx);

        let cycles = scheduler
            .run_until_cancelled(Duration::from_secs(1), rx, |_| {})
            .await;
        assert_eq!(cycles, 0);
    }
}

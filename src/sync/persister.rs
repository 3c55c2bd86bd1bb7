use std::fmt;

use crate::feed::{normalize_item, RawItem, SkipReason};
use crate::storage::{DatabaseError, FeedStore, InsertPostError, NewPost, Post};

/// Result of handing one normalized post to the store.
#[derive(Debug)]
pub enum PersistOutcome {
    Inserted(Post),
    /// The url was ingested before, from this feed or another one.
    DuplicateSkipped,
    Failed(DatabaseError),
}

/// What happened to one item of a feed document.
#[derive(Debug)]
pub enum ItemOutcome {
    Inserted,
    DuplicateSkipped,
    DateSkip(SkipReason),
    TitleSkip,
    PersistError(DatabaseError),
}

/// Insert a post, folding a url clash into [`PersistOutcome::DuplicateSkipped`].
pub async fn persist_post<S: FeedStore>(store: &S, post: &NewPost) -> PersistOutcome {
    match store.insert_post(post).await {
        Ok(stored) => PersistOutcome::Inserted(stored),
        Err(InsertPostError::UniqueViolation(_)) => PersistOutcome::DuplicateSkipped,
        Err(InsertPostError::Database(e)) => PersistOutcome::Failed(e),
    }
}

/// Normalize then persist a single item. Never fails: every problem becomes
/// an [`ItemOutcome`] so the caller can move on to the next item.
pub async fn ingest_item<S: FeedStore>(store: &S, item: &RawItem, feed_id: i64) -> ItemOutcome {
    let post = match normalize_item(item, feed_id) {
        Ok(post) => post,
        Err(reason @ SkipReason::DateParse { .. }) => {
            tracing::debug!(feed_id = feed_id, reason = %reason, "Skipping item");
            return ItemOutcome::DateSkip(reason);
        }
        Err(reason @ SkipReason::TitleTooShort(_)) => {
            tracing::debug!(feed_id = feed_id, reason = %reason, "Skipping item");
            return ItemOutcome::TitleSkip;
        }
    };

    match persist_post(store, &post).await {
        PersistOutcome::Inserted(stored) => {
            tracing::debug!(feed_id = feed_id, post_id = stored.id, url = %stored.url, "Inserted post");
            ItemOutcome::Inserted
        }
        PersistOutcome::DuplicateSkipped => {
            tracing::debug!(feed_id = feed_id, url = %post.url, "Post already stored");
            ItemOutcome::DuplicateSkipped
        }
        PersistOutcome::Failed(e) => {
            tracing::warn!(feed_id = feed_id, url = %post.url, error = %e, "Failed to store post");
            ItemOutcome::PersistError(e)
        }
    }
}

/// Per-cycle tally of item outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub inserted: usize,
    pub duplicates: usize,
    pub title_skips: usize,
    pub date_skips: usize,
    pub persist_errors: usize,
    /// Description of the most recent date-parse failure
    pub last_date_issue: Option<String>,
}

impl CycleSummary {
    pub fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Inserted => self.inserted += 1,
            ItemOutcome::DuplicateSkipped => self.duplicates += 1,
            ItemOutcome::TitleSkip => self.title_skips += 1,
            ItemOutcome::DateSkip(reason) => {
                self.date_skips += 1;
                self.last_date_issue = Some(reason.to_string());
            }
            ItemOutcome::PersistError(_) => self.persist_errors += 1,
        }
    }

    pub fn has_date_problem(&self) -> bool {
        self.date_skips > 0
    }

    pub fn items_seen(&self) -> usize {
        self.inserted + self.duplicates + self.title_skips + self.date_skips + self.persist_errors
    }
}

impl fmt::Display for CycleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} posts successfully added", self.inserted)?;
        match &self.last_date_issue {
            Some(issue) => write!(f, "Possible problem: {}", issue),
            None => write!(f, "No issues"),
        }
    }
}

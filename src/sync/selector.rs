use thiserror::Error;

use super::clock::Clock;
use crate::storage::{DatabaseError, Feed, FeedStore};

#[derive(Debug, Error)]
pub enum ClaimError {
    /// Storage holds no feeds at all
    #[error("No feeds registered")]
    NotFound,

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Pick the feed due next and stamp it as fetched.
///
/// The stamp is written before any network I/O so a feed that is slow to
/// download is not handed out again in the meantime. Ordering (never fetched
/// first, then oldest `last_fetched_at`, then id) lives in the store.
pub async fn claim_next<S, C>(store: &S, clock: &C) -> Result<Feed, ClaimError>
where
    S: FeedStore,
    C: Clock,
{
    let due = store.select_due_feed().await?.ok_or(ClaimError::NotFound)?;
    let claimed = store.claim_feed(due.id, clock.now()).await?;

    tracing::debug!(
        feed_id = claimed.id,
        url = %claimed.url,
        previous_fetch = ?due.last_fetched_at,
        "Claimed feed"
    );
    Ok(claimed)
}

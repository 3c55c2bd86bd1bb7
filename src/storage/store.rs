use chrono::{DateTime, Utc};
use std::future::Future;

use super::schema::Database;
use super::types::{DatabaseError, Feed, InsertPostError, NewPost, Post};

/// The slice of storage the polling engine talks to.
///
/// The scheduler only ever sees this trait, so tests can swap in a store that
/// fails on demand without touching SQLite.
pub trait FeedStore: Send + Sync {
    /// The feed due for polling, or `None` when no feed is registered.
    fn select_due_feed(&self) -> impl Future<Output = Result<Option<Feed>, DatabaseError>> + Send;

    /// Stamp `last_fetched_at`/`updated_at` with `now` and return the fresh row.
    fn claim_feed(
        &self,
        feed_id: i64,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Feed, DatabaseError>> + Send;

    /// Insert a post, reporting a clash on its url as a unique violation.
    fn insert_post(
        &self,
        post: &NewPost,
    ) -> impl Future<Output = Result<Post, InsertPostError>> + Send;
}

impl FeedStore for Database {
    async fn select_due_feed(&self) -> Result<Option<Feed>, DatabaseError> {
        self.next_feed_to_fetch().await
    }

    async fn claim_feed(&self, feed_id: i64, now: DateTime<Utc>) -> Result<Feed, DatabaseError> {
        self.mark_feed_fetched(feed_id, now).await
    }

    async fn insert_post(&self, post: &NewPost) -> Result<Post, InsertPostError> {
        self.create_post(post).await
    }
}

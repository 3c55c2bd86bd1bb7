use chrono::{DateTime, Utc};

use super::schema::Database;
use super::types::{to_timestamp_nanos, DatabaseError, Feed, FeedDbRow, FeedWithOwner};

/// Row type for the feed listing joined with its owner
type FeedOwnerRow = (i64, String, String, i64, i64, i64, Option<i64>, String);

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Register a feed owned by `user_id`. Fails on a duplicate URL.
    pub async fn create_feed(
        &self,
        name: &str,
        url: &str,
        user_id: i64,
    ) -> Result<Feed, DatabaseError> {
        let now = to_timestamp_nanos(Utc::now());
        let row = sqlx::query_as::<_, FeedDbRow>(
            r#"
            INSERT INTO feeds (name, url, user_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id, name, url, user_id, created_at, updated_at, last_fetched_at
        "#,
        )
        .bind(name)
        .bind(url)
        .bind(user_id)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_feed())
    }

    /// Look up a feed by its URL
    pub async fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>, DatabaseError> {
        let row = sqlx::query_as::<_, FeedDbRow>(
            r#"
            SELECT id, name, url, user_id, created_at, updated_at, last_fetched_at
            FROM feeds
            WHERE url = ?
        "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(FeedDbRow::into_feed))
    }

    /// All feeds with the name of the user that registered them, ordered by name
    pub async fn get_feeds_with_owner(&self) -> Result<Vec<FeedWithOwner>, DatabaseError> {
        let rows: Vec<FeedOwnerRow> = sqlx::query_as(
            r#"
                SELECT
                    f.id, f.name, f.url, f.user_id, f.created_at, f.updated_at,
                    f.last_fetched_at, u.name
                FROM feeds f
                JOIN users u ON u.id = f.user_id
                ORDER BY f.name, f.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let feeds = rows
            .into_iter()
            .map(
                |(id, name, url, user_id, created_at, updated_at, last_fetched_at, owner_name)| {
                    FeedWithOwner {
                        feed: FeedDbRow {
                            id,
                            name,
                            url,
                            user_id,
                            created_at,
                            updated_at,
                            last_fetched_at,
                        }
                        .into_feed(),
                        owner_name,
                    }
                },
            )
            .collect();

        Ok(feeds)
    }

    // ========================================================================
    // Polling Operations
    // ========================================================================

    /// The feed that should be polled next, if any feed exists.
    ///
    /// Never-fetched feeds sort before every fetched feed; fetched feeds sort
    /// oldest first; the id breaks ties so the choice is deterministic.
    pub async fn next_feed_to_fetch(&self) -> Result<Option<Feed>, DatabaseError> {
        let row = sqlx::query_as::<_, FeedDbRow>(
            r#"
            SELECT id, name, url, user_id, created_at, updated_at, last_fetched_at
            FROM feeds
            ORDER BY last_fetched_at IS NOT NULL, last_fetched_at ASC, id ASC
            LIMIT 1
        "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(FeedDbRow::into_feed))
    }

    /// Stamp a feed as fetched at `now` and return the updated row.
    ///
    /// Single-row UPDATE, so the stamp is atomic. `last_fetched_at` only moves
    /// forward: a stored value later than `now` is left in place.
    pub async fn mark_feed_fetched(
        &self,
        feed_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Feed, DatabaseError> {
        let now = to_timestamp_nanos(now);
        let row = sqlx::query_as::<_, FeedDbRow>(
            r#"
            UPDATE feeds
            SET last_fetched_at = MAX(COALESCE(last_fetched_at, ?1), ?1),
                updated_at = MAX(updated_at, ?1)
            WHERE id = ?2
            RETURNING id, name, url, user_id, created_at, updated_at, last_fetched_at
        "#,
        )
        .bind(now)
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(FeedDbRow::into_feed)
            .ok_or_else(|| DatabaseError::NotFound(format!("feed {}", feed_id)))
    }
}

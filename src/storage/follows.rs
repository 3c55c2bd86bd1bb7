use chrono::Utc;

use super::schema::Database;
use super::types::{from_timestamp, DatabaseError, Feed, FeedDbRow, FeedFollow};

/// Row type for a follow joined with its user and feed names
type FollowRow = (i64, i64, i64, String, String, i64);

impl Database {
    // ========================================================================
    // Follow Operations
    // ========================================================================

    /// Subscribe a user to a feed. Following twice is a no-op that returns
    /// the existing follow.
    pub async fn follow_feed(&self, user_id: i64, feed_id: i64) -> Result<FeedFollow, DatabaseError> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO feed_follows (user_id, feed_id, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id, feed_id) DO NOTHING
        "#,
        )
        .bind(user_id)
        .bind(feed_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let row: FollowRow = sqlx::query_as(
            r#"
            SELECT ff.id, ff.user_id, ff.feed_id, u.name, f.name, ff.created_at
            FROM feed_follows ff
            JOIN users u ON u.id = ff.user_id
            JOIN feeds f ON f.id = ff.feed_id
            WHERE ff.user_id = ? AND ff.feed_id = ?
        "#,
        )
        .bind(user_id)
        .bind(feed_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let (id, user_id, feed_id, user_name, feed_name, created_at) = row;
        Ok(FeedFollow {
            id,
            user_id,
            feed_id,
            user_name,
            feed_name,
            created_at: from_timestamp(created_at),
        })
    }

    /// Remove a follow, returning whether one existed
    pub async fn unfollow_feed(&self, user_id: i64, feed_id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM feed_follows WHERE user_id = ? AND feed_id = ?")
            .bind(user_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Feeds a user follows, ordered by feed name
    pub async fn get_followed_feeds(&self, user_id: i64) -> Result<Vec<Feed>, DatabaseError> {
        let rows = sqlx::query_as::<_, FeedDbRow>(
            r#"
            SELECT f.id, f.name, f.url, f.user_id, f.created_at, f.updated_at, f.last_fetched_at
            FROM feeds f
            JOIN feed_follows ff ON ff.feed_id = f.id
            WHERE ff.user_id = ?
            ORDER BY f.name, f.id
        "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FeedDbRow::into_feed).collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::Database;

    async fn setup() -> (Database, i64, i64) {
        let db = Database::open(":memory:").await.unwrap();
        let user = db.create_user("tester").await.unwrap();
        let feed = db
            .create_feed("Blog", "https://blog.example.com/rss", user.id)
            .await
            .unwrap();
        (db, user.id, feed.id)
    }

    #[tokio::test]
    async fn test_follow_resolves_names() {
        let (db, user_id, feed_id) = setup().await;
        let follow = db.follow_feed(user_id, feed_id).await.unwrap();

        assert_eq!(follow.user_name, "tester");
        assert_eq!(follow.feed_name, "Blog");
    }

    #[tokio::test]
    async fn test_follow_twice_is_idempotent() {
        let (db, user_id, feed_id) = setup().await;
        let first = db.follow_feed(user_id, feed_id).await.unwrap();
        let second = db.follow_feed(user_id, feed_id).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(db.get_followed_feeds(user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unfollow() {
        let (db, user_id, feed_id) = setup().await;
        db.follow_feed(user_id, feed_id).await.unwrap();

        assert!(db.unfollow_feed(user_id, feed_id).await.unwrap());
        assert!(!db.unfollow_feed(user_id, feed_id).await.unwrap());
        assert!(db.get_followed_feeds(user_id).await.unwrap().is_empty());
    }
}

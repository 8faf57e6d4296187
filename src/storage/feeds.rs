use chrono::{DateTime, Utc};

use super::schema::Database;
use super::types::{DatabaseError, Feed, FeedRow};

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Insert a new feed with `added = now` and no watermark.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::AlreadyExists`] when the url is already
    /// stored; the UNIQUE constraint on `feeds.url` is the source of truth.
    pub async fn create_feed(&self, url: &str) -> Result<Feed, DatabaseError> {
        let now = Utc::now().timestamp();
        let result: Result<FeedRow, sqlx::Error> = sqlx::query_as(
            "INSERT INTO feeds (url, added) VALUES (?, ?) RETURNING id, url, added, updated",
        )
        .bind(url)
        .bind(now)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(Feed::from(row)),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(DatabaseError::AlreadyExists(url.to_string()))
            }
            Err(e) => Err(DatabaseError::from_sqlx(e)),
        }
    }

    /// Get a feed by id
    pub async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>, DatabaseError> {
        let row: Option<FeedRow> =
            sqlx::query_as("SELECT id, url, added, updated FROM feeds WHERE id = ?")
                .bind(feed_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Feed::from))
    }

    /// Get a feed by its url
    pub async fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>, DatabaseError> {
        let row: Option<FeedRow> =
            sqlx::query_as("SELECT id, url, added, updated FROM feeds WHERE url = ?")
                .bind(url)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Feed::from))
    }

    /// All feeds in insertion order
    pub async fn list_feeds(&self) -> Result<Vec<Feed>, DatabaseError> {
        let rows: Vec<FeedRow> =
            sqlx::query_as("SELECT id, url, added, updated FROM feeds ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(Feed::from).collect())
    }

    /// Delete a feed by id. Returns whether a row was removed.
    pub async fn delete_feed(&self, feed_id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a feed by url. Returns whether a row was removed.
    pub async fn delete_feed_by_url(&self, url: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM feeds WHERE url = ?")
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Persist the polling watermark. `None` clears it (reset).
    ///
    /// Only whole seconds are stored.
    pub async fn set_feed_updated(
        &self,
        feed_id: i64,
        updated: Option<DateTime<Utc>>,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE feeds SET updated = ? WHERE id = ?")
            .bind(updated.map(|t| t.timestamp()))
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

//! Feed service: every user-facing operation, wrapped by its lifecycle
//! signals.
use crate::extension::{Pipeline, PipelineError};
use crate::feed::{MailSettings, PollError, PollOutcome, PollReport, Poller};
use crate::notify::Notifier;
use crate::storage::{Database, DatabaseError, Feed};
use reqwest::redirect::Policy;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result of [`App::add_feed`].
#[derive(Debug, Clone, PartialEq)]
pub struct AddResult {
    /// The stored feed, as returned by `post_add_feed` for a new feed.
    pub feed: Option<Feed>,
    /// False when the url was already subscribed.
    pub created: bool,
}

/// Custom redirect policy with loop detection and a hop limit.
fn create_redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= 5 {
            return attempt.error("Too many redirects (max 5)");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );

        attempt.follow()
    })
}

pub struct App {
    db: Database,
    pipeline: Arc<Pipeline>,
    poller: Poller,
}

impl App {
    pub fn new(
        db: Database,
        pipeline: Pipeline,
        notifier: Arc<dyn Notifier>,
        mail: MailSettings,
    ) -> Result<Self, AppError> {
        let http_client = reqwest::Client::builder()
            .redirect(create_redirect_policy())
            .user_agent(concat!("bear/", env!("CARGO_PKG_VERSION")))
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(30))
            .build()?;

        let pipeline = Arc::new(pipeline);
        let poller = Poller::new(
            db.clone(),
            http_client,
            Arc::clone(&pipeline),
            notifier,
            mail,
        );
        Ok(Self {
            db,
            pipeline,
            poller,
        })
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Subscribe to `url`.
    ///
    /// `pre_add_feed` may rewrite the url first. Adding a url that is
    /// already stored is not an error: `post_add_feed` sees `None` and the
    /// existing feed is returned with `created == false`.
    pub async fn add_feed(&self, url: &str) -> Result<AddResult, AppError> {
        let url = self.pipeline.pre_add_feed(url.to_string())?;

        match self.db.create_feed(&url).await {
            Ok(feed) => {
                tracing::info!(feed_id = feed.id, url = %feed.url, "Feed added");
                let feed = self.pipeline.post_add_feed(Some(feed))?;
                Ok(AddResult {
                    feed,
                    created: true,
                })
            }
            Err(DatabaseError::AlreadyExists(_)) => {
                tracing::info!(url = %url, "Feed already exists");
                self.pipeline.post_add_feed(None)?;
                let existing = self.db.get_feed_by_url(&url).await?;
                Ok(AddResult {
                    feed: existing,
                    created: false,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Unsubscribe. Whatever `pre_delete_feed` returns is what gets
    /// deleted; returns the deleted feed, if any.
    pub async fn delete_feed(&self, feed_id: i64) -> Result<Option<Feed>, AppError> {
        let mut guard = self.poller.lock_feed(feed_id).await;

        let feed = self.db.get_feed(feed_id).await?;
        let feed = self.pipeline.pre_delete_feed(feed)?;
        match &feed {
            Some(feed) => {
                if feed.id != feed_id {
                    drop(guard);
                    guard = self.poller.lock_feed(feed.id).await;
                }
                self.db.delete_feed(feed.id).await?;
                tracing::info!(feed_id = feed.id, url = %feed.url, "Feed deleted");
            }
            None => tracing::warn!(feed_id, "No feed to delete"),
        }
        drop(guard);
        Ok(self.pipeline.post_delete_feed(feed)?)
    }

    /// Forget the watermark so the next poll treats the feed as never
    /// polled and re-sends its current entries.
    pub async fn reset_feed(&self, feed_id: i64) -> Result<Option<Feed>, AppError> {
        let mut guard = self.poller.lock_feed(feed_id).await;

        let feed = self.db.get_feed(feed_id).await?;
        let feed = match self.pipeline.pre_reset_feed(feed)? {
            Some(mut feed) => {
                if feed.id != feed_id {
                    drop(guard);
                    guard = self.poller.lock_feed(feed.id).await;
                }
                self.db.set_feed_updated(feed.id, None).await?;
                feed.updated = None;
                tracing::info!(feed_id = feed.id, url = %feed.url, "Feed reset");
                Some(feed)
            }
            None => {
                tracing::warn!(feed_id, "No feed to reset");
                None
            }
        };
        drop(guard);
        Ok(self.pipeline.post_reset_feed(feed)?)
    }

    pub async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>, AppError> {
        Ok(self.db.get_feed(feed_id).await?)
    }

    pub async fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>, AppError> {
        Ok(self.db.get_feed_by_url(url).await?)
    }

    pub async fn list_feeds(&self) -> Result<Vec<Feed>, AppError> {
        Ok(self.db.list_feeds().await?)
    }

    pub async fn fetch_feed(&self, feed_id: i64) -> Result<PollOutcome, PollError> {
        self.poller.fetch(feed_id).await
    }

    pub async fn fetch_all(&self) -> Result<Vec<PollReport>, AppError> {
        Ok(self.poller.fetch_all().await?)
    }
}

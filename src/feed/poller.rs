//! Feed polling: decide whether a feed has news, mail the new entries
//! oldest-first, then advance the watermark.
use crate::extension::{Envelope, Pipeline, PipelineError};
use crate::feed::fetcher::{fetch_document, FetchError};
use crate::feed::parser::Entry;
use crate::notify::{Notifier, NotifyError};
use crate::storage::{Database, DatabaseError};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Max feeds polled at once by [`Poller::fetch_all`]
const MAX_CONCURRENT_POLLS: usize = 10;

/// What a single poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// No feed with that id.
    UnknownFeed,
    /// The document is not newer than the stored watermark.
    UpToDate,
    /// New content was processed; `sent` emails went out and the watermark
    /// moved forward.
    Delivered { sent: usize },
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The document carries neither an updated nor a published timestamp.
    #[error("Feed document has no updated or published timestamp")]
    MissingTimestamp,

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Delivery failed: {0}")]
    Delivery(#[from] NotifyError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Result of polling one feed as part of [`Poller::fetch_all`].
#[derive(Debug)]
pub struct PollReport {
    pub feed_id: i64,
    pub result: Result<PollOutcome, PollError>,
}

/// Default envelope addresses for outgoing mail.
#[derive(Debug, Clone, Default)]
pub struct MailSettings {
    pub sender: String,
    pub recipients: Vec<String>,
}

/// One async mutex per feed id.
///
/// Held across a whole read-compare-write sequence so two polls of the
/// same feed cannot both see a stale watermark and mail the same entries.
/// Entries nobody holds or waits on are dropped on the next `lock`.
#[derive(Debug, Default)]
pub struct FeedLocks {
    locks: std::sync::Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl FeedLocks {
    pub async fn lock(&self, feed_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            // Only the map's own reference left: idle.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(feed_id).or_default())
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

pub struct Poller {
    db: Database,
    client: reqwest::Client,
    pipeline: Arc<Pipeline>,
    notifier: Arc<dyn Notifier>,
    mail: MailSettings,
    locks: FeedLocks,
}

impl Poller {
    pub fn new(
        db: Database,
        client: reqwest::Client,
        pipeline: Arc<Pipeline>,
        notifier: Arc<dyn Notifier>,
        mail: MailSettings,
    ) -> Self {
        Self {
            db,
            client,
            pipeline,
            notifier,
            mail,
            locks: FeedLocks::default(),
        }
    }

    /// Take the per-feed lock. Anything that writes a feed's watermark
    /// outside of [`fetch`](Self::fetch) should hold it.
    pub async fn lock_feed(&self, feed_id: i64) -> OwnedMutexGuard<()> {
        self.locks.lock(feed_id).await
    }

    /// Poll one feed.
    ///
    /// # Errors
    ///
    /// Any error leaves the stored watermark untouched, so entries that
    /// were not delivered are tried again on the next poll (possibly
    /// re-sending ones that were).
    pub async fn fetch(&self, feed_id: i64) -> Result<PollOutcome, PollError> {
        let _guard = self.lock_feed(feed_id).await;

        let Some(feed) = self.db.get_feed(feed_id).await? else {
            tracing::warn!(feed_id, "Unknown feed");
            return Ok(PollOutcome::UnknownFeed);
        };

        tracing::info!(feed_id, url = %feed.url, "Fetching feed");
        let document = fetch_document(&self.client, &feed.url).await?;

        let Some(freshness) = document.freshness else {
            tracing::error!(feed_id, url = %feed.url, "Feed is malformed: no updated or published date");
            return Err(PollError::MissingTimestamp);
        };

        if feed.updated.is_some_and(|updated| freshness <= updated) {
            tracing::info!(feed_id, "No updates found");
            return Ok(PollOutcome::UpToDate);
        }

        let entries: Vec<Arc<Entry>> = document
            .entries
            .iter()
            .rev()
            .cloned()
            .map(Arc::new)
            .collect();
        let feed_title = document
            .title
            .clone()
            .unwrap_or_else(|| feed.url.clone());
        let feed = Arc::new(feed);
        let document = Arc::new(document);

        let mut sent = 0;
        for entry in entries {
            tracing::info!(feed_id, title = %entry.title, "New entry");
            let envelope = Envelope {
                sender: self.mail.sender.clone(),
                recipients: self.mail.recipients.clone(),
                subject: format!("[{}] {}", feed_title, entry.title),
                body: entry.description.clone(),
                feed: Arc::clone(&feed),
                document: Arc::clone(&document),
                entry,
            };
            let envelope = self.pipeline.pre_send_email(envelope)?;

            if envelope.recipients.is_empty() {
                tracing::debug!(feed_id, subject = %envelope.subject, "No recipients, skipping entry");
                continue;
            }

            self.notifier
                .send(
                    &envelope.sender,
                    &envelope.recipients,
                    &envelope.subject,
                    &envelope.body,
                )
                .await?;
            sent += 1;
        }

        self.db.set_feed_updated(feed.id, Some(freshness)).await?;
        tracing::info!(feed_id, sent, updated = %freshness, "Feed polled");
        Ok(PollOutcome::Delivered { sent })
    }

    /// Poll every stored feed, at most ten at a time.
    ///
    /// Per-feed failures are logged and reported; only failing to list the
    /// feeds fails the whole call.
    pub async fn fetch_all(&self) -> Result<Vec<PollReport>, DatabaseError> {
        let feeds = self.db.list_feeds().await?;
        if feeds.is_empty() {
            return Ok(Vec::new());
        }

        let reports: Vec<PollReport> = stream::iter(feeds)
            .map(|feed| async move {
                let result = self.fetch(feed.id).await;
                if let Err(ref e) = result {
                    tracing::error!(feed_id = feed.id, url = %feed.url, error = %e, "Poll failed");
                }
                PollReport {
                    feed_id: feed.id,
                    result,
                }
            })
            .buffer_unordered(MAX_CONCURRENT_POLLS)
            .collect()
            .await;

        let failed = reports.iter().filter(|r| r.result.is_err()).count();
        let sent: usize = reports
            .iter()
            .filter_map(|r| match r.result {
                Ok(PollOutcome::Delivered { sent }) => Some(sent),
                _ => None,
            })
            .sum();
        tracing::info!(feeds = reports.len(), sent, failed, "Polled all feeds");
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::{Extension, ExtensionRegistry, Hook, HookError, HookResult, HookSet};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Clone, PartialEq)]
    struct Sent {
        from: String,
        to: Vec<String>,
        subject: String,
        body: String,
    }

    /// Records every message; fails on the call numbered `fail_on` (1-based).
    #[derive(Default)]
    struct RecordingNotifier {
        sent: std::sync::Mutex<Vec<Sent>>,
        fail_on: Option<usize>,
    }

    impl RecordingNotifier {
        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(
            &self,
            from: &str,
            to: &[String],
            subject: &str,
            body_html: &str,
        ) -> Result<(), NotifyError> {
            let mut sent = self.sent.lock().unwrap();
            if self.fail_on == Some(sent.len() + 1) {
                return Err(NotifyError::Address {
                    address: to.join(","),
                    reason: "mailbox unavailable".into(),
                });
            }
            sent.push(Sent {
                from: from.to_string(),
                to: to.to_vec(),
                subject: subject.to_string(),
                body: body_html.to_string(),
            });
            Ok(())
        }
    }

    struct FailingSend;

    impl Extension for FailingSend {
        fn name(&self) -> &str {
            "failing"
        }
        fn hooks(&self) -> HookSet {
            HookSet::empty().with(Hook::PreSendEmail)
        }
        fn pre_send_email(&self, _envelope: Envelope) -> HookResult<Envelope> {
            Err(HookError::Failed(anyhow::anyhow!("template exploded")))
        }
    }

    fn atom(updated: &str, entries: &[(&str, &str)]) -> String {
        let mut xml = format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Blog</title>
  <id>urn:blog</id>
  <updated>{updated}</updated>
"#
        );
        for (title, published) in entries {
            xml.push_str(&format!(
                r#"  <entry>
    <title>{title}</title>
    <id>urn:{title}</id>
    <updated>{published}</updated>
    <published>{published}</published>
    <summary>Body of {title}</summary>
  </entry>
"#
            ));
        }
        xml.push_str("</feed>\n");
        xml
    }

    const NO_TIMESTAMP: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Blog</title><link>http://example.com</link>
<item><title>A</title><description>a</description></item>
</channel></rss>"#;

    async fn serve(server: &MockServer, body: String) {
        server.reset().await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    struct Harness {
        server: MockServer,
        db: Database,
        notifier: Arc<RecordingNotifier>,
        poller: Poller,
        feed_id: i64,
    }

    async fn harness_with(
        pipeline: Pipeline,
        notifier: RecordingNotifier,
        recipients: Vec<String>,
    ) -> Harness {
        let server = MockServer::start().await;
        let db = Database::open(":memory:").await.unwrap();
        let feed = db
            .create_feed(&format!("{}/feed.xml", server.uri()))
            .await
            .unwrap();
        let notifier = Arc::new(notifier);
        let poller = Poller::new(
            db.clone(),
            reqwest::Client::new(),
            Arc::new(pipeline),
            notifier.clone(),
            MailSettings {
                sender: "bear@example.com".into(),
                recipients,
            },
        );
        Harness {
            server,
            db,
            notifier,
            poller,
            feed_id: feed.id,
        }
    }

    async fn harness() -> Harness {
        harness_with(
            Pipeline::empty(),
            RecordingNotifier::default(),
            vec!["me@example.com".into()],
        )
        .await
    }

    fn jan_first_2020() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
    }

    async fn watermark(h: &Harness) -> Option<chrono::DateTime<Utc>> {
        h.db.get_feed(h.feed_id).await.unwrap().unwrap().updated
    }

    #[tokio::test]
    async fn test_first_poll_delivers_oldest_first() {
        let h = harness().await;
        serve(
            &h.server,
            atom(
                "2020-01-01T00:00:00Z",
                &[("B", "2019-12-31T12:00:00Z"), ("A", "2019-12-30T12:00:00Z")],
            ),
        )
        .await;

        let outcome = h.poller.fetch(h.feed_id).await.unwrap();
        assert_eq!(outcome, PollOutcome::Delivered { sent: 2 });

        let sent = h.notifier.sent();
        assert_eq!(
            sent.iter().map(|s| s.subject.as_str()).collect::<Vec<_>>(),
            vec!["[Blog] A", "[Blog] B"]
        );
        assert_eq!(sent[0].from, "bear@example.com");
        assert_eq!(sent[0].to, vec!["me@example.com".to_string()]);
        assert_eq!(sent[0].body, "Body of A");
        assert_eq!(watermark(&h).await, Some(jan_first_2020()));
    }

    #[tokio::test]
    async fn test_repoll_same_document_is_up_to_date() {
        let h = harness().await;
        serve(
            &h.server,
            atom("2020-01-01T00:00:00Z", &[("A", "2019-12-30T12:00:00Z")]),
        )
        .await;

        h.poller.fetch(h.feed_id).await.unwrap();
        let outcome = h.poller.fetch(h.feed_id).await.unwrap();

        assert_eq!(outcome, PollOutcome::UpToDate);
        assert_eq!(h.notifier.sent().len(), 1);
        assert_eq!(watermark(&h).await, Some(jan_first_2020()));
    }

    #[tokio::test]
    async fn test_older_document_is_up_to_date() {
        let h = harness().await;
        serve(&h.server, atom("2020-01-01T00:00:00Z", &[])).await;
        h.poller.fetch(h.feed_id).await.unwrap();

        serve(&h.server, atom("2019-06-01T00:00:00Z", &[("Old", "2019-06-01T00:00:00Z")])).await;
        let outcome = h.poller.fetch(h.feed_id).await.unwrap();

        assert_eq!(outcome, PollOutcome::UpToDate);
        assert!(h.notifier.sent().is_empty());
        assert_eq!(watermark(&h).await, Some(jan_first_2020()));
    }

    #[tokio::test]
    async fn test_newer_document_advances_watermark() {
        let h = harness().await;
        serve(&h.server, atom("2020-01-01T00:00:00Z", &[("A", "2020-01-01T00:00:00Z")])).await;
        h.poller.fetch(h.feed_id).await.unwrap();
        let first = watermark(&h).await.unwrap();

        serve(
            &h.server,
            atom(
                "2020-02-01T00:00:00Z",
                &[("B", "2020-02-01T00:00:00Z"), ("A", "2020-01-01T00:00:00Z")],
            ),
        )
        .await;
        let outcome = h.poller.fetch(h.feed_id).await.unwrap();
        let second = watermark(&h).await.unwrap();

        assert_eq!(outcome, PollOutcome::Delivered { sent: 2 });
        assert_eq!(first, jan_first_2020());
        assert_eq!(second, Utc.with_ymd_and_hms(2020, 2, 1, 0, 0, 0).unwrap());
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_missing_timestamp_is_malformed() {
        let h = harness().await;
        serve(&h.server, atom("2020-01-01T00:00:00Z", &[])).await;
        h.poller.fetch(h.feed_id).await.unwrap();

        serve(&h.server, NO_TIMESTAMP.to_string()).await;
        let err = h.poller.fetch(h.feed_id).await.unwrap_err();

        assert!(matches!(err, PollError::MissingTimestamp));
        assert!(h.notifier.sent().is_empty());
        assert_eq!(watermark(&h).await, Some(jan_first_2020()));
    }

    #[tokio::test]
    async fn test_unparseable_document_leaves_feed_untouched() {
        let h = harness().await;
        serve(&h.server, "<html>not a feed</html>".to_string()).await;

        let err = h.poller.fetch(h.feed_id).await.unwrap_err();
        assert!(matches!(err, PollError::Fetch(FetchError::Parse(_))));
        assert_eq!(watermark(&h).await, None);
    }

    #[tokio::test]
    async fn test_unknown_feed() {
        let h = harness().await;
        let outcome = h.poller.fetch(h.feed_id + 100).await.unwrap();
        assert_eq!(outcome, PollOutcome::UnknownFeed);
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_empty_document_still_advances() {
        let h = harness().await;
        serve(&h.server, atom("2020-01-01T00:00:00Z", &[])).await;

        let outcome = h.poller.fetch(h.feed_id).await.unwrap();
        assert_eq!(outcome, PollOutcome::Delivered { sent: 0 });
        assert_eq!(watermark(&h).await, Some(jan_first_2020()));
    }

    #[tokio::test]
    async fn test_no_recipients_skips_but_advances() {
        let h = harness_with(Pipeline::empty(), RecordingNotifier::default(), Vec::new()).await;
        serve(&h.server, atom("2020-01-01T00:00:00Z", &[("A", "2020-01-01T00:00:00Z")])).await;

        let outcome = h.poller.fetch(h.feed_id).await.unwrap();
        assert_eq!(outcome, PollOutcome::Delivered { sent: 0 });
        assert!(h.notifier.sent().is_empty());
        assert_eq!(watermark(&h).await, Some(jan_first_2020()));
    }

    #[tokio::test]
    async fn test_delivery_failure_keeps_watermark() {
        let notifier = RecordingNotifier {
            fail_on: Some(2),
            ..Default::default()
        };
        let h = harness_with(Pipeline::empty(), notifier, vec!["me@example.com".into()]).await;
        serve(
            &h.server,
            atom(
                "2020-01-01T00:00:00Z",
                &[
                    ("C", "2019-12-31T00:00:00Z"),
                    ("B", "2019-12-30T00:00:00Z"),
                    ("A", "2019-12-29T00:00:00Z"),
                ],
            ),
        )
        .await;

        let err = h.poller.fetch(h.feed_id).await.unwrap_err();
        assert!(matches!(err, PollError::Delivery(_)));
        // A went out, B failed, C was never attempted.
        assert_eq!(h.notifier.sent().len(), 1);
        assert_eq!(h.notifier.sent()[0].subject, "[Blog] A");
        assert_eq!(watermark(&h).await, None);
    }

    #[tokio::test]
    async fn test_pipeline_failure_keeps_watermark() {
        let registry = ExtensionRegistry::from_extensions(vec![Arc::new(FailingSend) as Arc<dyn Extension>]);
        let h = harness_with(
            Pipeline::new(registry),
            RecordingNotifier::default(),
            vec!["me@example.com".into()],
        )
        .await;
        serve(&h.server, atom("2020-01-01T00:00:00Z", &[("A", "2020-01-01T00:00:00Z")])).await;

        let err = h.poller.fetch(h.feed_id).await.unwrap_err();
        match err {
            PollError::Pipeline(PipelineError::Extension { extension, hook, .. }) => {
                assert_eq!(extension, "failing");
                assert_eq!(hook, Hook::PreSendEmail);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(h.notifier.sent().is_empty());
        assert_eq!(watermark(&h).await, None);
    }

    #[tokio::test]
    async fn test_subject_falls_back_to_feed_url() {
        let h = harness().await;
        let xml = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><link>http://example.com</link>
<lastBuildDate>Wed, 01 Jan 2020 00:00:00 GMT</lastBuildDate>
<item><title>Hello</title><description>hi</description></item>
</channel></rss>"#;
        serve(&h.server, xml.to_string()).await;

        h.poller.fetch(h.feed_id).await.unwrap();
        let url = h.db.get_feed(h.feed_id).await.unwrap().unwrap().url;
        assert_eq!(h.notifier.sent()[0].subject, format!("[{url}] Hello"));
    }

    #[tokio::test]
    async fn test_fetch_all_reports_each_feed() {
        let h = harness().await;
        serve(&h.server, atom("2020-01-01T00:00:00Z", &[("A", "2020-01-01T00:00:00Z")])).await;
        let broken = h
            .db
            .create_feed(&format!("{}/missing.xml", h.server.uri()))
            .await
            .unwrap();

        let mut reports = h.poller.fetch_all().await.unwrap();
        reports.sort_by_key(|r| r.feed_id);

        assert_eq!(reports.len(), 2);
        assert!(matches!(
            reports[0].result,
            Ok(PollOutcome::Delivered { sent: 1 })
        ));
        assert_eq!(reports[1].feed_id, broken.id);
        assert!(matches!(
            reports[1].result,
            Err(PollError::Fetch(FetchError::HttpStatus(404)))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_polls_of_one_feed_send_once() {
        let h = harness().await;
        serve(&h.server, atom("2020-01-01T00:00:00Z", &[("A", "2020-01-01T00:00:00Z")])).await;

        let (a, b) = tokio::join!(h.poller.fetch(h.feed_id), h.poller.fetch(h.feed_id));
        let mut outcomes = vec![a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|o| matches!(o, PollOutcome::UpToDate));

        assert_eq!(
            outcomes,
            vec![PollOutcome::Delivered { sent: 1 }, PollOutcome::UpToDate]
        );
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_feed_locks_are_per_feed() {
        let locks = FeedLocks::default();
        let _one = locks.lock(1).await;
        // A different feed is not blocked.
        let _two = tokio::time::timeout(std::time::Duration::from_secs(1), locks.lock(2))
            .await
            .expect("lock for another feed should be free");
        // The same feed is.
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(50), locks.lock(1))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_feed_locks_forget_idle_feeds() {
        let locks = FeedLocks::default();
        for feed_id in 0..50 {
            drop(locks.lock(feed_id).await);
        }
        let held = locks.lock(7).await;
        assert_eq!(locks.tracked(), 1);
        drop(held);

        let h = harness().await;
        h.poller.fetch(h.feed_id + 100).await.unwrap();
        h.poller.fetch(h.feed_id + 101).await.unwrap();
        let _guard = h.poller.lock_feed(h.feed_id).await;
        assert_eq!(h.poller.locks.tracked(), 1);
    }
}

//! Remote feeds: retrieval, parsing and polling.
//!
//! - [`parser`] - RSS/Atom parsing using the `feed-rs` crate
//! - [`fetcher`] - bounded HTTP retrieval
//! - [`poller`] - the per-feed polling state machine and bulk polling

mod fetcher;
mod parser;
mod poller;

pub use fetcher::{fetch_document, FetchError};
pub use parser::{parse_document, Document, Entry, ParseError};
pub use poller::{FeedLocks, MailSettings, PollError, PollOutcome, PollReport, Poller};

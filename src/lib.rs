//! bear polls RSS/Atom feeds and emails every new entry to its subscribers.
//!
//! The crate is organised around two pieces:
//!
//! - [`extension`] - the signal pipeline that lets configured extensions
//!   observe and rewrite values at fixed feed lifecycle points
//! - [`feed`] - document fetching/parsing and the polling state machine that
//!   decides which entries are new and advances the per-feed watermark
//!
//! [`App`] ties them to the SQLite [`storage`] layer and the SMTP [`notify`]
//! transport.

pub mod app;
pub mod config;
pub mod extension;
pub mod feed;
pub mod notify;
pub mod storage;
pub mod util;

pub use app::{AddResult, App};

//! Extensions and the signal pipeline.
//!
//! An [`Extension`] declares, through [`Extension::hooks`], which of the
//! fixed lifecycle [`Hook`]s it implements. The [`Pipeline`] threads each
//! signal's payload through every extension that declared the hook, in
//! registration order, so later extensions see earlier rewrites.
//!
//! Hook outcomes:
//!
//! - hook not declared: the extension is skipped (decline)
//! - `Ok(payload)`: the payload is handed to the next extension
//! - [`HookError::Malformed`]: the output is discarded, the chain continues
//!   with the payload the extension was given
//! - [`HookError::Failed`]: the whole signal aborts with [`PipelineError`]

pub mod guesser;
mod pipeline;
mod registry;
pub mod summarize;
pub mod template;

use crate::feed::{Document, Entry};
use crate::storage::Feed;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub use pipeline::{Pipeline, PipelineError, Signal};
pub use registry::{Builtin, Constructor, ExtensionRegistry, RegistryError, BUILTINS};

/// Flat option map from an `[extension.<name>]` config table.
pub type ExtensionConfig = BTreeMap<String, String>;

// ============================================================================
// Hooks
// ============================================================================

/// The fixed set of lifecycle points extensions can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    PreAddFeed,
    PostAddFeed,
    PreDeleteFeed,
    PostDeleteFeed,
    PreResetFeed,
    PostResetFeed,
    PreSendEmail,
}

impl Hook {
    pub const ALL: [Hook; 7] = [
        Hook::PreAddFeed,
        Hook::PostAddFeed,
        Hook::PreDeleteFeed,
        Hook::PostDeleteFeed,
        Hook::PreResetFeed,
        Hook::PostResetFeed,
        Hook::PreSendEmail,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Hook::PreAddFeed => "pre_add_feed",
            Hook::PostAddFeed => "post_add_feed",
            Hook::PreDeleteFeed => "pre_delete_feed",
            Hook::PostDeleteFeed => "post_delete_feed",
            Hook::PreResetFeed => "pre_reset_feed",
            Hook::PostResetFeed => "post_reset_feed",
            Hook::PreSendEmail => "pre_send_email",
        }
    }

    /// Number of values the hook's payload carries.
    pub fn arity(self) -> usize {
        match self {
            Hook::PreSendEmail => 7,
            _ => 1,
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of hooks an extension implements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookSet(u8);

impl HookSet {
    pub const fn empty() -> Self {
        HookSet(0)
    }

    pub fn with(self, hook: Hook) -> Self {
        HookSet(self.0 | hook.bit())
    }

    pub fn contains(self, hook: Hook) -> bool {
        self.0 & hook.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Hook> {
        Hook::ALL.into_iter().filter(move |h| self.contains(*h))
    }
}

impl FromIterator<Hook> for HookSet {
    fn from_iter<I: IntoIterator<Item = Hook>>(iter: I) -> Self {
        iter.into_iter().fold(HookSet::empty(), HookSet::with)
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// Payload of `pre_send_email`.
///
/// `sender`, `recipients`, `subject` and `body` may be rewritten. `feed`,
/// `document` and `entry` are shared context: an extension that hands back
/// an envelope pointing at different context has its output discarded.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub sender: String,
    pub recipients: Vec<String>,
    pub subject: String,
    /// HTML body
    pub body: String,
    pub feed: Arc<Feed>,
    pub document: Arc<Document>,
    pub entry: Arc<Entry>,
}

impl Envelope {
    /// Whether both envelopes refer to the same feed, document and entry.
    pub fn same_context(&self, other: &Envelope) -> bool {
        Arc::ptr_eq(&self.feed, &other.feed)
            && Arc::ptr_eq(&self.document, &other.document)
            && Arc::ptr_eq(&self.entry, &other.entry)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Error returned from inside a hook.
#[derive(Debug, Error)]
pub enum HookError {
    /// The hook produced output the pipeline cannot use. Recoverable: the
    /// output is ignored and the chain continues.
    #[error("malformed output: {0}")]
    Malformed(String),

    /// Anything else. Aborts the signal.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

pub type HookResult<T> = Result<T, HookError>;

/// Errors raised while constructing an extension or checking what it needs.
#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("invalid value for option `{option}`: {reason}")]
    InvalidOption { option: String, reason: String },

    #[error("missing dependency: {0}")]
    MissingDependency(String),
}

// ============================================================================
// Extension trait
// ============================================================================

/// A unit of behavior attached to feed lifecycle events.
///
/// Only hooks listed by [`hooks`](Extension::hooks) are ever called. The
/// default bodies pass the payload through unchanged.
///
/// Instances are shared by every concurrent poll, so any cache an extension
/// keeps must carry its own synchronization.
pub trait Extension: Send + Sync {
    /// Name the extension was configured under
    fn name(&self) -> &str;

    /// Hooks this extension implements
    fn hooks(&self) -> HookSet;

    /// Verify required external capabilities. Called once at load time; an
    /// error here stops startup.
    fn check_dependencies(&self) -> Result<(), ExtensionError> {
        Ok(())
    }

    /// Human readable description and options
    fn help(&self) -> &'static str {
        ""
    }

    fn pre_add_feed(&self, url: String) -> HookResult<String> {
        Ok(url)
    }

    fn post_add_feed(&self, feed: Option<Feed>) -> HookResult<Option<Feed>> {
        Ok(feed)
    }

    fn pre_delete_feed(&self, feed: Option<Feed>) -> HookResult<Option<Feed>> {
        Ok(feed)
    }

    fn post_delete_feed(&self, feed: Option<Feed>) -> HookResult<Option<Feed>> {
        Ok(feed)
    }

    fn pre_reset_feed(&self, feed: Option<Feed>) -> HookResult<Option<Feed>> {
        Ok(feed)
    }

    fn post_reset_feed(&self, feed: Option<Feed>) -> HookResult<Option<Feed>> {
        Ok(feed)
    }

    fn pre_send_email(&self, envelope: Envelope) -> HookResult<Envelope> {
        Ok(envelope)
    }
}

// ============================================================================
// Option helpers
// ============================================================================

/// Read a boolean option (`true`/`false`, `yes`/`no`, `on`/`off`, `1`/`0`).
pub(crate) fn bool_option(
    config: &ExtensionConfig,
    option: &str,
    default: bool,
) -> Result<bool, ExtensionError> {
    let Some(raw) = config.get(option) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(ExtensionError::InvalidOption {
            option: option.to_string(),
            reason: format!("expected a boolean, got `{raw}`"),
        }),
    }
}

/// Read an unsigned integer option.
pub(crate) fn usize_option(
    config: &ExtensionConfig,
    option: &str,
    default: usize,
) -> Result<usize, ExtensionError> {
    match config.get(option) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ExtensionError::InvalidOption {
            option: option.to_string(),
            reason: format!("expected a positive number, got `{raw}`"),
        }),
    }
}

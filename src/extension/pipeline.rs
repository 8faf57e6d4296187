use super::{Envelope, Extension, ExtensionRegistry, Hook, HookError, HookResult};
use crate::storage::Feed;
use crate::util::truncate_to_width;
use std::fmt::Debug;
use std::sync::Arc;
use thiserror::Error;

/// Width of the payload preview in debug logs
const PREVIEW_WIDTH: usize = 90;

/// A lifecycle event together with its payload.
///
/// [`Pipeline::run_signal`] always returns the same variant it was given.
#[derive(Debug, Clone)]
pub enum Signal {
    PreAddFeed(String),
    PostAddFeed(Option<Feed>),
    PreDeleteFeed(Option<Feed>),
    PostDeleteFeed(Option<Feed>),
    PreResetFeed(Option<Feed>),
    PostResetFeed(Option<Feed>),
    PreSendEmail(Box<Envelope>),
}

impl Signal {
    pub fn hook(&self) -> Hook {
        match self {
            Signal::PreAddFeed(_) => Hook::PreAddFeed,
            Signal::PostAddFeed(_) => Hook::PostAddFeed,
            Signal::PreDeleteFeed(_) => Hook::PreDeleteFeed,
            Signal::PostDeleteFeed(_) => Hook::PostDeleteFeed,
            Signal::PreResetFeed(_) => Hook::PreResetFeed,
            Signal::PostResetFeed(_) => Hook::PostResetFeed,
            Signal::PreSendEmail(_) => Hook::PreSendEmail,
        }
    }
}

/// An extension raised a hard failure; the signal was abandoned.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("extension `{extension}` failed in {hook}: {source}")]
    Extension {
        extension: String,
        hook: Hook,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Runs signals through the loaded extensions.
pub struct Pipeline {
    extensions: Vec<Arc<dyn Extension>>,
}

impl Pipeline {
    pub fn new(registry: ExtensionRegistry) -> Self {
        Self {
            extensions: registry.into_extensions(),
        }
    }

    /// A pipeline with no extensions; every signal passes through unchanged.
    pub fn empty() -> Self {
        Self {
            extensions: Vec::new(),
        }
    }

    pub fn extensions(&self) -> &[Arc<dyn Extension>] {
        &self.extensions
    }

    /// Thread `signal` through every extension that implements its hook.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Extension`] when a hook fails with
    /// [`HookError::Failed`]. Remaining extensions are not called.
    pub fn run_signal(&self, signal: Signal) -> Result<Signal, PipelineError> {
        Ok(match signal {
            Signal::PreAddFeed(url) => Signal::PreAddFeed(self.pre_add_feed(url)?),
            Signal::PostAddFeed(feed) => Signal::PostAddFeed(self.post_add_feed(feed)?),
            Signal::PreDeleteFeed(feed) => Signal::PreDeleteFeed(self.pre_delete_feed(feed)?),
            Signal::PostDeleteFeed(feed) => Signal::PostDeleteFeed(self.post_delete_feed(feed)?),
            Signal::PreResetFeed(feed) => Signal::PreResetFeed(self.pre_reset_feed(feed)?),
            Signal::PostResetFeed(feed) => Signal::PostResetFeed(self.post_reset_feed(feed)?),
            Signal::PreSendEmail(envelope) => {
                Signal::PreSendEmail(Box::new(self.pre_send_email(*envelope)?))
            }
        })
    }

    pub fn pre_add_feed(&self, url: String) -> Result<String, PipelineError> {
        self.chain(Hook::PreAddFeed, url, |ext, url| ext.pre_add_feed(url), accept)
    }

    pub fn post_add_feed(&self, feed: Option<Feed>) -> Result<Option<Feed>, PipelineError> {
        self.feed_chain(Hook::PostAddFeed, feed)
    }

    pub fn pre_delete_feed(&self, feed: Option<Feed>) -> Result<Option<Feed>, PipelineError> {
        self.feed_chain(Hook::PreDeleteFeed, feed)
    }

    pub fn post_delete_feed(&self, feed: Option<Feed>) -> Result<Option<Feed>, PipelineError> {
        self.feed_chain(Hook::PostDeleteFeed, feed)
    }

    pub fn pre_reset_feed(&self, feed: Option<Feed>) -> Result<Option<Feed>, PipelineError> {
        self.feed_chain(Hook::PreResetFeed, feed)
    }

    pub fn post_reset_feed(&self, feed: Option<Feed>) -> Result<Option<Feed>, PipelineError> {
        self.feed_chain(Hook::PostResetFeed, feed)
    }

    pub fn pre_send_email(&self, envelope: Envelope) -> Result<Envelope, PipelineError> {
        self.chain(
            Hook::PreSendEmail,
            envelope,
            |ext, envelope| ext.pre_send_email(envelope),
            |before, after| {
                if after.same_context(before) {
                    Ok(())
                } else {
                    Err("feed, document or entry context was replaced".to_string())
                }
            },
        )
    }

    fn feed_chain(&self, hook: Hook, feed: Option<Feed>) -> Result<Option<Feed>, PipelineError> {
        self.chain(hook, feed, |ext, feed| call_feed_hook(ext, hook, feed), accept)
    }

    /// Core chain: every extension sees the output of the one before it.
    fn chain<T, C, V>(
        &self,
        hook: Hook,
        initial: T,
        call: C,
        validate: V,
    ) -> Result<T, PipelineError>
    where
        T: Clone + Debug,
        C: Fn(&dyn Extension, T) -> HookResult<T>,
        V: Fn(&T, &T) -> Result<(), String>,
    {
        let mut payload = initial;

        for ext in &self.extensions {
            let name = ext.name();
            if !ext.hooks().contains(hook) {
                tracing::debug!(hook = %hook, extension = name, "Hook not implemented");
                continue;
            }

            match call(ext.as_ref(), payload.clone()) {
                Ok(next) => match validate(&payload, &next) {
                    Ok(()) => {
                        tracing::debug!(
                            hook = %hook,
                            extension = name,
                            args = %preview(&next),
                            "Hook applied"
                        );
                        payload = next;
                    }
                    Err(reason) => {
                        tracing::error!(
                            hook = %hook,
                            extension = name,
                            reason = %reason,
                            "Hook returned a malformed payload (ignored)"
                        );
                    }
                },
                Err(HookError::Malformed(reason)) => {
                    tracing::error!(
                        hook = %hook,
                        extension = name,
                        reason = %reason,
                        "Hook returned a malformed payload (ignored)"
                    );
                }
                Err(HookError::Failed(source)) => {
                    return Err(PipelineError::Extension {
                        extension: name.to_string(),
                        hook,
                        source: source.into(),
                    });
                }
            }
        }

        Ok(payload)
    }
}

fn accept<T>(_: &T, _: &T) -> Result<(), String> {
    Ok(())
}

fn call_feed_hook(ext: &dyn Extension, hook: Hook, feed: Option<Feed>) -> HookResult<Option<Feed>> {
    match hook {
        Hook::PostAddFeed => ext.post_add_feed(feed),
        Hook::PreDeleteFeed => ext.pre_delete_feed(feed),
        Hook::PostDeleteFeed => ext.post_delete_feed(feed),
        Hook::PreResetFeed => ext.pre_reset_feed(feed),
        Hook::PostResetFeed => ext.post_reset_feed(feed),
        Hook::PreAddFeed | Hook::PreSendEmail => Ok(feed),
    }
}

fn preview<T: Debug>(payload: &T) -> String {
    let full = format!("{:?}", payload);
    truncate_to_width(&full, PREVIEW_WIDTH).into_owned()
}

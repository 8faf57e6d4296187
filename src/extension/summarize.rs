//! Replaces long HTML bodies with a short plain-text summary.
use super::{
    usize_option, Envelope, Extension, ExtensionConfig, ExtensionError, Hook, HookResult, HookSet,
};
use crate::util::{html_to_text, strip_control_chars, truncate_to_width};

const DEFAULT_MAX_WIDTH: usize = 280;

pub const HELP: &str = "\
Summarize entry bodies.

The email body becomes the entry text with markup removed, cut to at most
max_width columns.

Options:
    max_width = \"280\"    summary length in display columns";

pub struct Summarize {
    name: String,
    max_width: usize,
}

impl Summarize {
    pub fn build(name: &str, config: &ExtensionConfig) -> Result<Box<dyn Extension>, ExtensionError> {
        let max_width = usize_option(config, "max_width", DEFAULT_MAX_WIDTH)?;
        if max_width == 0 {
            return Err(ExtensionError::InvalidOption {
                option: "max_width".into(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(Box::new(Self {
            name: name.to_string(),
            max_width,
        }))
    }
}

impl Extension for Summarize {
    fn name(&self) -> &str {
        &self.name
    }

    fn hooks(&self) -> HookSet {
        HookSet::empty().with(Hook::PreSendEmail)
    }

    fn help(&self) -> &'static str {
        HELP
    }

    fn pre_send_email(&self, mut envelope: Envelope) -> HookResult<Envelope> {
        let text = html_to_text(&envelope.body);
        let text = strip_control_chars(&text);
        envelope.body = truncate_to_width(&text, self.max_width).into_owned();
        Ok(envelope)
    }
}

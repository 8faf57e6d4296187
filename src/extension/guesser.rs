//! Cleans up the url handed to `bear add`.
use super::{bool_option, Extension, ExtensionConfig, ExtensionError, Hook, HookResult, HookSet};
use crate::util::{normalize_url, validate_url};
use anyhow::anyhow;

pub const HELP: &str = "\
Normalize and check the url given to `bear add`.

Surrounding whitespace is removed and https:// is assumed when no scheme is
given. The result must be an http(s) url; localhost and private network
addresses are refused unless allowed. The url is not fetched, so a website
address is stored as given rather than resolved to its feed.

Options:
    allow_private = \"false\"    accept localhost and private IP addresses";

pub struct Guesser {
    name: String,
    allow_private: bool,
}

impl Guesser {
    pub fn build(name: &str, config: &ExtensionConfig) -> Result<Box<dyn Extension>, ExtensionError> {
        Ok(Box::new(Self {
            name: name.to_string(),
            allow_private: bool_option(config, "allow_private", false)?,
        }))
    }
}

impl Extension for Guesser {
    fn name(&self) -> &str {
        &self.name
    }

    fn hooks(&self) -> HookSet {
        HookSet::empty().with(Hook::PreAddFeed)
    }

    fn help(&self) -> &'static str {
        HELP
    }

    fn pre_add_feed(&self, url: String) -> HookResult<String> {
        let candidate = normalize_url(&url);
        let parsed = validate_url(&candidate, self.allow_private)
            .map_err(|e| anyhow!("refusing to add `{}`: {}", url.trim(), e))?;
        if parsed.as_str() != url {
            tracing::debug!(from = %url, to = %parsed, "Rewrote feed url");
        }
        Ok(parsed.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::HookError;

    fn guesser(allow_private: bool) -> Box<dyn Extension> {
        let mut config = ExtensionConfig::new();
        config.insert("allow_private".into(), allow_private.to_string());
        Guesser::build("guesser", &config).unwrap()
    }

    #[test]
    fn test_adds_scheme_and_trims() {
        let g = guesser(false);
        assert_eq!(
            g.pre_add_feed("  example.com/feed.xml ".into()).unwrap(),
            "https://example.com/feed.xml"
        );
    }

    #[test]
    fn test_valid_url_kept() {
        let g = guesser(false);
        assert_eq!(
            g.pre_add_feed("http://news.example.org/rss".into()).unwrap(),
            "http://news.example.org/rss"
        );
    }

    #[test]
    fn test_private_url_is_hard_failure() {
        let g = guesser(false);
        let err = g.pre_add_feed("http://192.168.0.10/rss".into()).unwrap_err();
        assert!(matches!(err, HookError::Failed(_)));
        assert!(err.to_string().contains("192.168.0.10"));
    }

    #[test]
    fn test_private_allowed_by_option() {
        let g = guesser(true);
        assert_eq!(
            g.pre_add_feed("http://127.0.0.1:8080/rss".into()).unwrap(),
            "http://127.0.0.1:8080/rss"
        );
    }

    #[test]
    fn test_bad_option_rejected() {
        let mut config = ExtensionConfig::new();
        config.insert("allow_private".into(), "sometimes".into());
        assert!(Guesser::build("guesser", &config).is_err());
    }

    #[test]
    fn test_website_url_not_resolved_to_feed() {
        let g = guesser(false);
        assert_eq!(
            g.pre_add_feed("example.com".into()).unwrap(),
            "https://example.com/"
        );
        assert!(HELP.contains("not fetched"));
    }
}

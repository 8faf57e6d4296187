//! Custom subjects and bodies rendered from templates.
use super::{Envelope, Extension, ExtensionConfig, ExtensionError, Hook, HookResult, HookSet};
use std::path::PathBuf;
use std::sync::OnceLock;

pub const HELP: &str = "\
Set a custom subject and body for notification emails.

Placeholders: {feed.title} {feed.url} {entry.title} {entry.description}
{entry.link} {entry.published}

Options:
    subject = \"{feed.title}: {entry.title}\"    subject template
    template_file = \"/path/to/body.html\"       body template, read at startup";

pub struct Template {
    name: String,
    subject: Option<String>,
    template_file: Option<PathBuf>,
    /// Body template, read from `template_file` once
    body: OnceLock<String>,
}

impl Template {
    pub fn build(name: &str, config: &ExtensionConfig) -> Result<Box<dyn Extension>, ExtensionError> {
        let subject = config.get("subject").cloned();
        let template_file = config.get("template_file").map(PathBuf::from);

        if subject.is_none() {
            tracing::debug!(extension = name, "No subject template set");
        }
        if template_file.is_none() {
            tracing::debug!(extension = name, "No template_file set");
        }

        Ok(Box::new(Self {
            name: name.to_string(),
            subject,
            template_file,
            body: OnceLock::new(),
        }))
    }

    /// The body template, read on first use.
    fn body_template(&self) -> Result<Option<&str>, ExtensionError> {
        let Some(path) = &self.template_file else {
            return Ok(None);
        };
        if let Some(body) = self.body.get() {
            return Ok(Some(body));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            ExtensionError::MissingDependency(format!(
                "template_file '{}' cannot be read: {}",
                path.display(),
                e
            ))
        })?;
        // Losing a race only means another thread stored identical content
        let _ = self.body.set(content);
        Ok(self.body.get().map(String::as_str))
    }
}

impl Extension for Template {
    fn name(&self) -> &str {
        &self.name
    }

    fn hooks(&self) -> HookSet {
        HookSet::empty().with(Hook::PreSendEmail)
    }

    fn check_dependencies(&self) -> Result<(), ExtensionError> {
        self.body_template().map(|_| ())
    }

    fn help(&self) -> &'static str {
        HELP
    }

    fn pre_send_email(&self, mut envelope: Envelope) -> HookResult<Envelope> {
        if let Some(subject) = &self.subject {
            envelope.subject = render(subject, &envelope);
        }
        let body = self.body_template().map_err(anyhow::Error::from)?;
        if let Some(body) = body {
            envelope.body = render(body, &envelope);
        }
        Ok(envelope)
    }
}

/// Substitute the `{feed.*}` and `{entry.*}` placeholders.
///
/// The template is scanned once: substituted values are never scanned
/// again, so placeholder-like text inside a title or body stays literal.
/// Unknown `{...}` sequences are copied through.
fn render(template: &str, envelope: &Envelope) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let open = &rest[start..];
        let value = open
            .find('}')
            .and_then(|end| placeholder(&open[1..end], envelope).map(|v| (end, v)));
        match value {
            Some((end, value)) => {
                out.push_str(&value);
                rest = &open[end + 1..];
            }
            None => {
                out.push('{');
                rest = &open[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn placeholder(name: &str, envelope: &Envelope) -> Option<String> {
    let value = match name {
        "feed.title" => envelope
            .document
            .title
            .clone()
            .unwrap_or_else(|| envelope.feed.url.clone()),
        "feed.url" => envelope.feed.url.clone(),
        "entry.title" => envelope.entry.title.clone(),
        "entry.description" => envelope.entry.description.clone(),
        "entry.link" => envelope.entry.link.clone().unwrap_or_default(),
        "entry.published" => envelope
            .entry
            .published
            .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_default(),
        _ => return None,
    };
    Some(value)
}

use super::{guesser, summarize, template, Extension, ExtensionConfig, ExtensionError};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Builds an extension from its configured name and option table.
pub type Constructor = fn(&str, &ExtensionConfig) -> Result<Box<dyn Extension>, ExtensionError>;

/// An entry in the static extension table.
pub struct Builtin {
    pub name: &'static str,
    pub help: &'static str,
    pub build: Constructor,
}

/// Every extension bear knows how to load, looked up by name.
pub const BUILTINS: &[Builtin] = &[
    Builtin {
        name: "guesser",
        help: guesser::HELP,
        build: guesser::Guesser::build,
    },
    Builtin {
        name: "summarize",
        help: summarize::HELP,
        build: summarize::Summarize::build,
    },
    Builtin {
        name: "template",
        help: template::HELP,
        build: template::Template::build,
    },
];

#[derive(Debug, Error)]
pub enum RegistryError {
    /// An extension could not be built or is missing something it needs.
    /// Fatal at startup.
    #[error("extension `{name}` cannot be loaded: {source}")]
    Dependency {
        name: String,
        #[source]
        source: ExtensionError,
    },
}

/// The loaded extensions, in the order they were configured.
#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: Vec<Arc<dyn Extension>>,
}

impl ExtensionRegistry {
    /// Load the named extensions from [`BUILTINS`].
    ///
    /// Names are loaded in the given order, which is the order the pipeline
    /// calls them in. Each gets its own table from `configs` (empty when
    /// absent). Unknown names are logged and skipped; a construction or
    /// dependency failure aborts loading.
    pub fn load(
        names: &[String],
        configs: &HashMap<String, ExtensionConfig>,
    ) -> Result<Self, RegistryError> {
        Self::load_from(BUILTINS, names, configs)
    }

    /// Same as [`load`](Self::load) against a custom table.
    pub fn load_from(
        table: &[Builtin],
        names: &[String],
        configs: &HashMap<String, ExtensionConfig>,
    ) -> Result<Self, RegistryError> {
        let empty = ExtensionConfig::new();
        let mut extensions: Vec<Arc<dyn Extension>> = Vec::with_capacity(names.len());

        for name in names {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            if extensions.iter().any(|e| e.name() == name) {
                tracing::warn!(extension = name, "Extension listed twice, keeping the first");
                continue;
            }
            let Some(builtin) = table.iter().find(|b| b.name == name) else {
                tracing::warn!(extension = name, "Extension not found (skipped)");
                continue;
            };

            let config = configs.get(name).unwrap_or(&empty);
            let dependency_error = |source| RegistryError::Dependency {
                name: name.to_string(),
                source,
            };
            let extension = (builtin.build)(name, config).map_err(dependency_error)?;
            extension.check_dependencies().map_err(dependency_error)?;

            tracing::info!(
                extension = name,
                hooks = ?extension.hooks().iter().map(|h| h.name()).collect::<Vec<_>>(),
                "Loaded extension"
            );
            extensions.push(Arc::from(extension));
        }

        Ok(Self { extensions })
    }

    /// Wrap already built extensions, skipping name lookup and dependency
    /// checks.
    pub fn from_extensions(extensions: Vec<Arc<dyn Extension>>) -> Self {
        Self { extensions }
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.extensions.iter().map(|e| e.name())
    }

    pub(crate) fn into_extensions(self) -> Vec<Arc<dyn Extension>> {
        self.extensions
    }
}

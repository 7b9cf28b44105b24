//! Raw boot configuration as supplied by a test.

use super::keys::AuthorizedKey;
use super::platform::Platform;
use super::render::render;
use super::rendered::RenderedConfig;
use super::source::resolve_user_data;
use super::ConfError;

/// How a document's text should be interpreted.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum ConfigKind {
    /// No configuration.
    #[default]
    Empty,
    /// Free-form script, passed through.
    Script,
    /// Legacy `#cloud-config`.
    CloudConfig,
    /// Container Linux Config transpiled to Ignition v3.0.
    Transpiled,
    /// Versioned Ignition JSON.
    Native,
    /// Detected from the text at render time.
    Unknown,
}

/// An immutable raw document plus the keys to inject when it is rendered.
///
/// Every `with_*` method returns a fresh document; the receiver is left as it
/// was, so one template can fan out to many machines.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConfigDocument {
    kind: ConfigKind,
    data: String,
    pending_keys: Vec<AuthorizedKey>,
}

impl ConfigDocument {
    fn new(kind: ConfigKind, data: impl Into<String>) -> Self {
        Self {
            kind,
            data: data.into(),
            pending_keys: Vec::new(),
        }
    }

    /// A document that renders to nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A script passed through unmodified apart from key substitution.
    #[must_use]
    pub fn script(data: impl Into<String>) -> Self {
        Self::new(ConfigKind::Script, data)
    }

    /// A legacy cloud-config document.
    #[must_use]
    pub fn cloud_config(data: impl Into<String>) -> Self {
        Self::new(ConfigKind::CloudConfig, data)
    }

    /// A Container Linux Config that will be transpiled for the target
    /// platform.
    #[must_use]
    pub fn transpiled(data: impl Into<String>) -> Self {
        Self::new(ConfigKind::Transpiled, data)
    }

    /// Versioned Ignition JSON.
    #[must_use]
    pub fn native(data: impl Into<String>) -> Self {
        Self::new(ConfigKind::Native, data)
    }

    /// Text whose kind is detected at render time.
    #[must_use]
    pub fn unknown(data: impl Into<String>) -> Self {
        Self::new(ConfigKind::Unknown, data)
    }

    /// Loads user data from an inline value or a file. No source at all gives
    /// an empty document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfError::Source`] when the sources conflict, are blank or
    /// the file cannot be read.
    pub fn from_sources(inline: Option<&str>, file: Option<&str>) -> Result<Self, ConfError> {
        Ok(resolve_user_data(inline, file)?.map_or_else(Self::empty, Self::unknown))
    }

    /// Declared kind.
    #[must_use]
    pub const fn kind(&self) -> ConfigKind {
        self.kind
    }

    /// Raw text.
    #[must_use]
    pub fn data(&self) -> &str {
        &self.data
    }

    /// Keys injected after rendering, in insertion order.
    #[must_use]
    pub fn pending_keys(&self) -> &[AuthorizedKey] {
        &self.pending_keys
    }

    /// Returns `true` when the raw text contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.data.contains(needle)
    }

    /// Returns `true` for kinds that render to Ignition.
    #[must_use]
    pub const fn is_native_compatible(&self) -> bool {
        matches!(self.kind, ConfigKind::Native | ConfigKind::Transpiled)
    }

    /// Returns a copy with every occurrence of `old` replaced by `new`.
    #[must_use]
    pub fn with_substitution(&self, old: &str, new: &str) -> Self {
        Self {
            kind: self.kind,
            data: self.data.replace(old, new),
            pending_keys: self.pending_keys.clone(),
        }
    }

    /// Returns a copy with `key` appended to the pending keys.
    #[must_use]
    pub fn with_key(&self, key: AuthorizedKey) -> Self {
        self.with_keys([key])
    }

    /// Returns a copy with `keys` appended to the pending keys.
    #[must_use]
    pub fn with_keys(&self, keys: impl IntoIterator<Item = AuthorizedKey>) -> Self {
        let mut pending_keys = self.pending_keys.clone();
        pending_keys.extend(keys);
        Self {
            kind: self.kind,
            data: self.data.clone(),
            pending_keys,
        }
    }

    /// Renders the document for `platform`.
    ///
    /// # Errors
    ///
    /// See [`render`].
    pub fn render(&self, platform: Platform) -> Result<RenderedConfig, ConfError> {
        render(self, platform)
    }
}

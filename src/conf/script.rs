//! Free-form shell scripts passed through unmodified.

use super::ConfError;
use super::keys::{AuthorizedKey, key_lines};
use super::mutator::{ConfigMutator, ConfigSummary, Operation, SCRIPT_OPERATIONS, Variant};

/// Token replaced with the injected keys.
pub const SSH_KEYS_TOKEN: &str = "@SSH_KEYS@";

/// Raw script text.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Script {
    text: String,
}

impl Script {
    /// Wraps script text.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Returns the script text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}

impl ConfigMutator for Script {
    fn variant(&self) -> Variant {
        Variant::Script
    }

    fn capabilities(&self) -> &'static [Operation] {
        SCRIPT_OPERATIONS
    }

    fn copy_keys(&mut self, keys: &[AuthorizedKey]) -> Result<(), ConfError> {
        let joined = key_lines(keys).join("\n");
        self.text = self.text.replace(SSH_KEYS_TOKEN, &joined);
        Ok(())
    }

    fn summary(&self) -> ConfigSummary {
        ConfigSummary::default()
    }
}

//! SSH public key records injected into boot configurations.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::ConfError;

/// A public key destined for the `core` user's `authorized_keys`.
///
/// The record mirrors what an SSH agent reports: the key algorithm, the raw
/// wire-format blob and a free-form comment.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct AuthorizedKey {
    /// Key algorithm, for example `ssh-ed25519`.
    pub algorithm: String,
    /// Public key bytes in SSH wire format.
    pub blob: Vec<u8>,
    /// Trailing comment; empty when absent.
    pub comment: String,
}

impl AuthorizedKey {
    /// Creates a key record.
    #[must_use]
    pub fn new(
        algorithm: impl Into<String>,
        blob: impl Into<Vec<u8>>,
        comment: impl Into<String>,
    ) -> Self {
        Self {
            algorithm: algorithm.into(),
            blob: blob.into(),
            comment: comment.into(),
        }
    }

    /// Renders the key as a single `authorized_keys` line.
    #[must_use]
    pub fn to_line(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for AuthorizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.algorithm, STANDARD.encode(&self.blob))?;
        if !self.comment.is_empty() {
            write!(f, " {}", self.comment)?;
        }
        Ok(())
    }
}

impl FromStr for AuthorizedKey {
    type Err = ConfError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let invalid = |message: &str| ConfError::InvalidKey {
            line: line.to_owned(),
            message: message.to_owned(),
        };

        let mut parts = line.trim().splitn(3, char::is_whitespace);
        let algorithm = parts
            .next()
            .filter(|value| !value.is_empty())
            .ok_or_else(|| invalid("missing key algorithm"))?;
        let encoded = parts
            .next()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| invalid("missing key data"))?;
        let blob = STANDARD
            .decode(encoded)
            .map_err(|err| invalid(&err.to_string()))?;
        let comment = parts.next().map(str::trim).unwrap_or_default();

        Ok(Self::new(algorithm, blob, comment))
    }
}

/// Renders a key list as `authorized_keys` lines, preserving order.
pub(crate) fn key_lines(keys: &[AuthorizedKey]) -> Vec<String> {
    keys.iter().map(AuthorizedKey::to_line).collect()
}

//! Error types for configuration parsing, rendering and mutation.

use std::fmt;

use thiserror::Error;

use super::mutator::{Operation, Variant};
use super::source::UserDataSourceError;

/// Errors raised while detecting, rendering or mutating a configuration.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfError {
    /// Raised when the text is not valid in the requested format.
    #[error("failed to parse {format} configuration: {message}")]
    Parse {
        /// Format the parser expected.
        format: &'static str,
        /// Diagnostic from the underlying parser.
        message: String,
    },
    /// Raised when a declarative-native document names no supported version.
    #[error("configuration does not declare a supported Ignition version")]
    UnknownVersion,
    /// Raised when a document parses but fails its schema validator.
    #[error("invalid {variant} configuration: {report}")]
    Invalid {
        /// Schema variant that rejected the document.
        variant: Variant,
        /// Validator findings.
        report: ValidationReport,
    },
    /// Raised when a transpiled document cannot be converted.
    #[error("rendering configuration for platform {platform}: {message}")]
    Transpile {
        /// Platform hint used for the conversion.
        platform: String,
        /// Description of the failure.
        message: String,
    },
    /// Raised when an operation is not part of a variant's capability set.
    #[error("{operation} is not supported for {variant} configurations")]
    Unsupported {
        /// Requested operation.
        operation: Operation,
        /// Variant currently populated.
        variant: Variant,
    },
    /// Raised when mutating a configuration with no populated variant.
    #[error("configuration is empty or unrendered; render it before mutating")]
    Unrendered,
    /// Raised when an Ignition v1 config targets a filesystem other than root.
    #[error("unexpected filesystem for Ignition v1 files: {device:?}")]
    UnexpectedFilesystem {
        /// Device of the first declared filesystem.
        device: String,
    },
    /// Raised when an `authorized_keys` line cannot be parsed.
    #[error("invalid SSH public key `{line}`: {message}")]
    InvalidKey {
        /// Offending line.
        line: String,
        /// Parser diagnostic.
        message: String,
    },
    /// Raised when a configuration cannot be serialized.
    #[error("failed to serialize {variant} configuration: {message}")]
    Serialize {
        /// Variant being serialized.
        variant: Variant,
        /// Serializer diagnostic.
        message: String,
    },
    /// Raised when writing a serialized configuration fails.
    #[error("failed to write configuration to {path}: {message}")]
    Write {
        /// Destination path.
        path: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when raw user data cannot be resolved from its source.
    #[error(transparent)]
    Source(#[from] UserDataSourceError),
}

impl ConfError {
    /// Returns `true` for errors caused by calling code misusing the API.
    ///
    /// These are never retried by provisioning sessions.
    #[must_use]
    pub const fn is_programming_error(&self) -> bool {
        matches!(self, Self::Unrendered | Self::UnexpectedFilesystem { .. })
    }
}

/// Findings produced by a schema validator.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ValidationReport {
    entries: Vec<String>,
}

impl ValidationReport {
    /// Creates an empty report.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Records a finding.
    pub fn push(&mut self, entry: impl Into<String>) {
        self.entries.push(entry.into());
    }

    /// Returns `true` when no findings were recorded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the recorded findings.
    #[must_use]
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Converts a non-empty report into [`ConfError::Invalid`].
    pub(crate) fn into_result(self, variant: Variant) -> Result<(), ConfError> {
        if self.is_clean() {
            return Ok(());
        }
        Err(ConfError::Invalid {
            variant,
            report: self,
        })
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.entries.join("; "))
    }
}

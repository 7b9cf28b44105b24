//! Versioned Ignition schemas.
//!
//! Each submodule models one spec version closely enough to implement the
//! mutation contract. Fields the crate does not interpret are preserved in
//! flattened `other` maps so a parsed document serializes back without loss.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::dataurl;
use super::error::{ConfError, ValidationReport};
use super::keys::{AuthorizedKey, key_lines};
use super::mutator::{DropinView, Variant};

pub mod v1;
pub mod v2_0;
pub mod v2_1;
pub mod v2_2;
pub mod v2_3;
pub mod v3_0;
pub mod v2x;

/// Name of the single administrative user every variant targets.
pub(crate) const CORE_USER: &str = "core";

/// Unknown fields carried through parse and serialize untouched.
pub type Extra = BTreeMap<String, Value>;

/// Version declared by a JSON document.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum DeclaredVersion {
    /// `ignitionVersion` integer used by the v1 schema.
    Legacy(u64),
    /// `ignition.version` semantic version used from 2.0 onwards.
    Semver(semver::Version),
}

/// Why a versioned parser rejected a document.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum ParseError {
    /// The text is not JSON.
    NotJson(String),
    /// The document does not declare a version this parser accepts.
    UnknownVersion,
    /// The declared version matched but the structure did not deserialize.
    Malformed(String),
    /// The document deserialized but failed validation.
    Invalid(ValidationReport),
}

impl ParseError {
    pub(crate) fn into_conf_error(self, variant: Variant) -> ConfError {
        match self {
            Self::NotJson(message) | Self::Malformed(message) => ConfError::Parse {
                format: "Ignition",
                message,
            },
            Self::UnknownVersion => ConfError::UnknownVersion,
            Self::Invalid(report) => ConfError::Invalid { variant, report },
        }
    }
}

/// Reads the version a JSON document declares, if any.
pub(crate) fn declared_version(value: &Value) -> Option<DeclaredVersion> {
    if let Some(legacy) = value.get("ignitionVersion").and_then(Value::as_u64) {
        return Some(DeclaredVersion::Legacy(legacy));
    }
    value
        .get("ignition")
        .and_then(|ignition| ignition.get("version"))
        .and_then(Value::as_str)
        .and_then(|version| semver::Version::parse(version).ok())
        .map(DeclaredVersion::Semver)
}

/// Returns `true` when a JSON document carries any Ignition version marker.
pub(crate) fn has_version_marker(value: &Value) -> bool {
    value.get("ignitionVersion").is_some()
        || value
            .get("ignition")
            .is_some_and(|ignition| ignition.get("version").is_some())
}

/// Parses `text` into `T` when `accepts` approves the declared version.
pub(crate) fn parse_versioned<T, F>(text: &str, accepts: F) -> Result<T, ParseError>
where
    T: DeserializeOwned,
    F: FnOnce(&DeclaredVersion) -> bool,
{
    let value: Value =
        serde_json::from_str(text).map_err(|err| ParseError::NotJson(err.to_string()))?;
    let declared = declared_version(&value).ok_or(ParseError::UnknownVersion)?;
    if !accepts(&declared) {
        return Err(ParseError::UnknownVersion);
    }
    serde_json::from_value(value).map_err(|err| ParseError::Malformed(err.to_string()))
}

/// Serializes an Ignition document as compact JSON.
pub(crate) fn to_json<T: Serialize>(config: &T, variant: Variant) -> Result<String, ConfError> {
    serde_json::to_string(config).map_err(|err| ConfError::Serialize {
        variant,
        message: err.to_string(),
    })
}

/// `ignition` section used from spec 2.0 onwards.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Ignition {
    /// Declared spec version.
    pub version: String,
    /// Remaining fields such as `config` and `timeouts`.
    #[serde(flatten)]
    pub other: Extra,
}

impl Ignition {
    pub(crate) fn with_version(version: &str) -> Self {
        Self {
            version: version.to_owned(),
            other: Extra::new(),
        }
    }
}

/// `passwd` section shared by every Ignition version.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Passwd {
    /// Declared users.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<PasswdUser>,
    /// Remaining fields such as `groups`.
    #[serde(flatten)]
    pub other: Extra,
}

impl Passwd {
    pub(crate) fn is_empty(&self) -> bool {
        self.users.is_empty() && self.other.is_empty()
    }

    /// Appends keys to the `core` user, creating it when absent.
    pub(crate) fn copy_keys(&mut self, keys: &[AuthorizedKey]) {
        let lines = key_lines(keys);
        if let Some(user) = self.users.iter_mut().find(|user| user.name == CORE_USER) {
            user.ssh_authorized_keys.extend(lines);
            return;
        }
        self.users.push(PasswdUser {
            name: CORE_USER.to_owned(),
            ssh_authorized_keys: lines,
            other: Extra::new(),
        });
    }

    /// Keys of the first `core` user.
    pub(crate) fn core_keys(&self) -> Vec<String> {
        self.users
            .iter()
            .find(|user| user.name == CORE_USER)
            .map(|user| user.ssh_authorized_keys.clone())
            .unwrap_or_default()
    }
}

/// User entry shared by every Ignition version.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PasswdUser {
    /// Login name.
    pub name: String,
    /// Authorized keys in OpenSSH format.
    #[serde(
        rename = "sshAuthorizedKeys",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub ssh_authorized_keys: Vec<String>,
    /// Remaining user fields.
    #[serde(flatten)]
    pub other: Extra,
}

/// Systemd drop-in with literal contents, used by v1 and v2.x.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Dropin {
    /// Drop-in file name.
    pub name: String,
    /// Drop-in contents.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub contents: String,
}

impl From<&Dropin> for DropinView {
    fn from(dropin: &Dropin) -> Self {
        Self {
            name: dropin.name.clone(),
            contents: dropin.contents.clone(),
        }
    }
}

/// `contents` object of a v2.x file entry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FileContents {
    /// Source URL, usually a `data:` URL.
    #[serde(default)]
    pub source: String,
    /// Remaining fields such as `compression` and `verification`.
    #[serde(flatten)]
    pub other: Extra,
}

/// Decodes file contents for summaries; remote sources decode as empty.
pub(crate) fn decode_source(source: &str) -> Vec<u8> {
    dataurl::decode(source).unwrap_or_default()
}

const UNIT_SUFFIXES: &[&str] = &[
    ".service",
    ".socket",
    ".device",
    ".mount",
    ".automount",
    ".swap",
    ".target",
    ".path",
    ".timer",
    ".snapshot",
    ".slice",
    ".scope",
];

/// Shared validation rules applied by every Ignition schema.
pub(crate) struct Checks<'a> {
    report: &'a mut ValidationReport,
}

impl<'a> Checks<'a> {
    pub(crate) const fn new(report: &'a mut ValidationReport) -> Self {
        Self { report }
    }

    pub(crate) fn path(&mut self, path: &str) {
        if !path.starts_with('/') {
            self.report.push(format!("path {path:?} is not absolute"));
        }
    }

    pub(crate) fn mode(&mut self, path: &str, mode: Option<u32>) {
        if let Some(value) = mode
            && value > 0o7777
        {
            self.report
                .push(format!("mode {value:#o} for {path} is out of range"));
        }
    }

    pub(crate) fn source(&mut self, path: &str, source: &str) {
        if source.starts_with("data:")
            && let Err(err) = dataurl::decode(source)
        {
            self.report
                .push(format!("contents of {path} are not a valid data URL: {err}"));
        }
    }

    pub(crate) fn unit(&mut self, name: &str) {
        if !UNIT_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
            self.report
                .push(format!("unit {name:?} has an unknown unit type"));
        }
    }

    pub(crate) fn dropin(&mut self, unit: &str, name: &str) {
        if !name.ends_with(".conf") {
            self.report
                .push(format!("drop-in {name:?} for {unit} must end in .conf"));
        }
    }
}

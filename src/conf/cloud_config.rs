//! Legacy `#cloud-config` documents.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;
use tracing::warn;

use super::ConfError;
use super::keys::{AuthorizedKey, key_lines};
use super::mutator::{
    ConfigMutator, ConfigSummary, DECLARATIVE_OPERATIONS, DropinView, FileView, Operation,
    UnitView, Variant,
};

/// Header line identifying a cloud-config document.
pub const HEADER: &str = "#cloud-config";

const FILE_OWNER: &str = "root";
const KNOWN_KEYS: &[&str] = &["hostname", "users", "manage_etc_hosts"];

/// Parsed cloud-config document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Keys added to the `core` user.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssh_authorized_keys: Vec<String>,
    /// Container Linux specific section.
    #[serde(default, skip_serializing_if = "CoreOs::is_empty")]
    pub coreos: CoreOs,
    /// Files written before units start.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub write_files: Vec<WriteFile>,
    /// Remaining keys such as `hostname` and `users`.
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

/// `coreos` section.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreOs {
    /// Systemd units.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub units: Vec<Unit>,
    /// Remaining keys such as `etcd2` and `update`.
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

impl CoreOs {
    fn is_empty(&self) -> bool {
        self.units.is_empty() && self.other.is_empty()
    }
}

/// Systemd unit entry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    /// Unit name.
    pub name: String,
    /// Whether the unit is enabled.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub enable: bool,
    /// Unit file contents.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    /// Drop-ins.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drop_ins: Vec<DropIn>,
    /// Remaining keys such as `command` and `mask`.
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

/// Unit drop-in.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DropIn {
    /// Drop-in file name.
    pub name: String,
    /// Drop-in contents.
    #[serde(default)]
    pub content: String,
}

/// `write_files` entry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteFile {
    /// Absolute path.
    pub path: String,
    /// File contents.
    #[serde(default)]
    pub content: String,
    /// Owner as `user[:group]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Octal permissions string such as `0644`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "permissions_from_yaml"
    )]
    pub permissions: Option<String>,
    /// Remaining keys such as `encoding`.
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

impl WriteFile {
    /// Parses [`WriteFile::permissions`] as an octal mode.
    #[must_use]
    pub fn mode(&self) -> Option<u32> {
        let text = self.permissions.as_deref()?.trim();
        let digits = text.strip_prefix("0o").unwrap_or(text);
        u32::from_str_radix(digits, 8).ok()
    }
}

fn permissions_from_yaml<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(text)) => Some(text),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

/// Renders `mode` the way cloud-config expects: octal with a leading zero.
pub(crate) fn permissions(mode: u32) -> String {
    if mode == 0 {
        return String::from("0");
    }
    format!("0{mode:o}")
}

/// Returns `true` when `text` starts with the cloud-config header.
pub(crate) fn has_header(text: &str) -> bool {
    text.lines()
        .next()
        .is_some_and(|line| line.trim_end() == HEADER)
}

/// Parses a cloud-config document.
pub(crate) fn parse(text: &str) -> Result<CloudConfig, ConfError> {
    if !has_header(text) {
        return Err(ConfError::Parse {
            format: "cloud-config",
            message: format!("document does not start with {HEADER}"),
        });
    }
    let value: Value = serde_yaml::from_str(text).map_err(|err| parse_error(&err))?;
    if value.is_null() {
        return Ok(CloudConfig::default());
    }
    let config: CloudConfig = serde_yaml::from_value(value).map_err(|err| parse_error(&err))?;
    for key in config.other.keys() {
        if !KNOWN_KEYS.contains(&key.as_str()) {
            warn!(key = %key, "unrecognised cloud-config key");
        }
    }
    Ok(config)
}

fn parse_error(err: &serde_yaml::Error) -> ConfError {
    ConfError::Parse {
        format: "cloud-config",
        message: err.to_string(),
    }
}

impl CloudConfig {
    /// Serializes the document with its header line.
    ///
    /// # Errors
    ///
    /// Returns [`ConfError::Serialize`] when YAML encoding fails.
    pub fn to_text(&self) -> Result<String, ConfError> {
        let body = serde_yaml::to_string(self).map_err(|err| ConfError::Serialize {
            variant: Variant::CloudConfig,
            message: err.to_string(),
        })?;
        Ok(format!("{HEADER}\n{body}"))
    }
}

impl ConfigMutator for CloudConfig {
    fn variant(&self) -> Variant {
        Variant::CloudConfig
    }

    fn capabilities(&self) -> &'static [Operation] {
        DECLARATIVE_OPERATIONS
    }

    fn add_file(
        &mut self,
        path: &str,
        _filesystem: &str,
        contents: &str,
        mode: u32,
    ) -> Result<(), ConfError> {
        self.write_files.push(WriteFile {
            path: path.to_owned(),
            content: contents.to_owned(),
            owner: Some(FILE_OWNER.to_owned()),
            permissions: Some(permissions(mode)),
            other: BTreeMap::new(),
        });
        Ok(())
    }

    fn add_systemd_unit(
        &mut self,
        name: &str,
        contents: &str,
        enabled: bool,
    ) -> Result<(), ConfError> {
        self.coreos.units.push(Unit {
            name: name.to_owned(),
            enable: enabled,
            content: contents.to_owned(),
            drop_ins: Vec::new(),
            other: BTreeMap::new(),
        });
        Ok(())
    }

    fn add_systemd_unit_dropin(
        &mut self,
        unit: &str,
        name: &str,
        contents: &str,
    ) -> Result<(), ConfError> {
        let dropin = DropIn {
            name: name.to_owned(),
            content: contents.to_owned(),
        };
        if let Some(existing) = self.coreos.units.iter_mut().find(|u| u.name == unit) {
            existing.drop_ins.push(dropin);
            return Ok(());
        }
        self.coreos.units.push(Unit {
            name: unit.to_owned(),
            drop_ins: vec![dropin],
            ..Unit::default()
        });
        Ok(())
    }

    fn copy_keys(&mut self, keys: &[AuthorizedKey]) -> Result<(), ConfError> {
        self.ssh_authorized_keys.extend(key_lines(keys));
        Ok(())
    }

    fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            files: self
                .write_files
                .iter()
                .map(|file| FileView {
                    path: file.path.clone(),
                    contents: file.content.clone().into_bytes(),
                    mode: file.mode(),
                })
                .collect(),
            units: self
                .coreos
                .units
                .iter()
                .map(|unit| UnitView {
                    name: unit.name.clone(),
                    contents: Some(unit.content.clone()).filter(|text| !text.is_empty()),
                    enabled: unit.enable,
                    dropins: unit
                        .drop_ins
                        .iter()
                        .map(|dropin| DropinView {
                            name: dropin.name.clone(),
                            contents: dropin.content.clone(),
                        })
                        .collect(),
                })
                .collect(),
            authorized_keys: self.ssh_authorized_keys.clone(),
        }
    }
}

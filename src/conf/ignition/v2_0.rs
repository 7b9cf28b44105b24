//! Ignition spec 2.0.

use serde::{Deserialize, Serialize};

use super::{
    Checks, DeclaredVersion, Dropin, Extra, FileContents, Ignition, ParseError, Passwd,
    decode_source, parse_versioned,
};
use crate::conf::dataurl;
use crate::conf::error::{ConfError, ValidationReport};
use crate::conf::keys::AuthorizedKey;
use crate::conf::mutator::{
    ConfigMutator, ConfigSummary, DECLARATIVE_OPERATIONS, DropinView, FileView, Operation,
    UnitView, Variant, non_empty,
};

/// Version stamped on documents of this schema.
pub const VERSION: &str = "2.0.0";

/// Top-level 2.0 document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Version header.
    pub ignition: Ignition,
    /// Files and remaining storage sections.
    #[serde(default, skip_serializing_if = "Storage::is_empty")]
    pub storage: Storage,
    /// Systemd units.
    #[serde(default, skip_serializing_if = "Systemd::is_empty")]
    pub systemd: Systemd,
    /// Users and groups.
    #[serde(default, skip_serializing_if = "Passwd::is_empty")]
    pub passwd: Passwd,
    /// Remaining sections such as `networkd`.
    #[serde(flatten)]
    pub other: Extra,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ignition: Ignition::with_version(VERSION),
            storage: Storage::default(),
            systemd: Systemd::default(),
            passwd: Passwd::default(),
            other: Extra::new(),
        }
    }
}

/// `storage` section.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Storage {
    /// Declared files.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<File>,
    /// Remaining fields such as `disks` and `filesystems`.
    #[serde(flatten)]
    pub other: Extra,
}

impl Storage {
    fn is_empty(&self) -> bool {
        self.files.is_empty() && self.other.is_empty()
    }
}

/// File entry bound to a named filesystem.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct File {
    /// Name of the filesystem the path is relative to.
    pub filesystem: String,
    /// Absolute path.
    pub path: String,
    /// Contents source.
    #[serde(default)]
    pub contents: FileContents,
    /// POSIX mode.
    #[serde(default)]
    pub mode: u32,
    /// Remaining fields such as `user` and `group`.
    #[serde(flatten)]
    pub other: Extra,
}

/// `systemd` section.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Systemd {
    /// Declared units.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub units: Vec<Unit>,
}

impl Systemd {
    fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// Systemd unit using the `enable` flag.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    /// Unit name.
    pub name: String,
    /// Whether the unit is enabled.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub enable: bool,
    /// Unit file contents.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub contents: String,
    /// Drop-ins.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dropins: Vec<Dropin>,
    /// Remaining fields such as `mask`.
    #[serde(flatten)]
    pub other: Extra,
}

/// Parses a 2.0 document.
pub(crate) fn parse(text: &str) -> Result<Config, ParseError> {
    let config: Config = parse_versioned(text, |declared| {
        matches!(declared, DeclaredVersion::Semver(version)
            if version.major == 2 && version.minor == 0 && version.pre.is_empty())
    })?;
    let report = config.validate();
    if report.is_clean() {
        Ok(config)
    } else {
        Err(ParseError::Invalid(report))
    }
}

impl Config {
    /// Runs the schema validator.
    #[must_use]
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::new();
        let mut checks = Checks::new(&mut report);
        for file in &self.storage.files {
            checks.path(&file.path);
            checks.mode(&file.path, Some(file.mode));
            checks.source(&file.path, &file.contents.source);
        }
        for unit in &self.systemd.units {
            checks.unit(&unit.name);
            for dropin in &unit.dropins {
                checks.dropin(&unit.name, &dropin.name);
            }
        }
        report
    }
}

impl ConfigMutator for Config {
    fn variant(&self) -> Variant {
        Variant::IgnitionV2_0
    }

    fn capabilities(&self) -> &'static [Operation] {
        DECLARATIVE_OPERATIONS
    }

    fn add_file(
        &mut self,
        path: &str,
        filesystem: &str,
        contents: &str,
        mode: u32,
    ) -> Result<(), ConfError> {
        self.storage.files.push(File {
            filesystem: filesystem.to_owned(),
            path: path.to_owned(),
            contents: FileContents {
                source: dataurl::encode(contents.as_bytes()),
                other: Extra::new(),
            },
            mode,
            other: Extra::new(),
        });
        Ok(())
    }

    fn add_systemd_unit(
        &mut self,
        name: &str,
        contents: &str,
        enabled: bool,
    ) -> Result<(), ConfError> {
        self.systemd.units.push(Unit {
            name: name.to_owned(),
            enable: enabled,
            contents: contents.to_owned(),
            dropins: Vec::new(),
            other: Extra::new(),
        });
        Ok(())
    }

    fn add_systemd_unit_dropin(
        &mut self,
        unit: &str,
        name: &str,
        contents: &str,
    ) -> Result<(), ConfError> {
        let dropin = Dropin {
            name: name.to_owned(),
            contents: contents.to_owned(),
        };
        if let Some(existing) = self.systemd.units.iter_mut().find(|u| u.name == unit) {
            existing.dropins.push(dropin);
            return Ok(());
        }
        self.systemd.units.push(Unit {
            name: unit.to_owned(),
            dropins: vec![dropin],
            ..Unit::default()
        });
        Ok(())
    }

    fn copy_keys(&mut self, keys: &[AuthorizedKey]) -> Result<(), ConfError> {
        self.passwd.copy_keys(keys);
        Ok(())
    }

    fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            files: self
                .storage
                .files
                .iter()
                .map(|file| FileView {
                    path: file.path.clone(),
                    contents: decode_source(&file.contents.source),
                    mode: Some(file.mode),
                })
                .collect(),
            units: self
                .systemd
                .units
                .iter()
                .map(|unit| UnitView {
                    name: unit.name.clone(),
                    contents: non_empty(&unit.contents),
                    enabled: unit.enable,
                    dropins: unit.dropins.iter().map(DropinView::from).collect(),
                })
                .collect(),
            authorized_keys: self.passwd.core_keys(),
        }
    }
}

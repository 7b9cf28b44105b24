//! Ignition config version 1.
//!
//! Files are grouped under filesystem entries and carry literal contents.

use serde::{Deserialize, Serialize};

use super::{Checks, DeclaredVersion, Dropin, Extra, ParseError, Passwd, parse_versioned};
use crate::conf::error::{ConfError, ValidationReport};
use crate::conf::keys::AuthorizedKey;
use crate::conf::mutator::{
    ConfigMutator, ConfigSummary, DECLARATIVE_OPERATIONS, DropinView, FileView, Operation,
    UnitView, Variant, non_empty,
};

/// Device every v1 file is written to.
pub const ROOT_DEVICE: &str = "/dev/disk/by-partlabel/ROOT";
const ROOT_FORMAT: &str = "ext4";

/// Top-level v1 document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Always `1`.
    #[serde(rename = "ignitionVersion")]
    pub ignition_version: u64,
    /// Filesystems and their files.
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
            ignition_version: 1,
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
    /// Filesystems; files hang off each entry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filesystems: Vec<Filesystem>,
    /// Remaining fields such as `disks` and `raid`.
    #[serde(flatten)]
    pub other: Extra,
}

impl Storage {
    fn is_empty(&self) -> bool {
        self.filesystems.is_empty() && self.other.is_empty()
    }
}

/// Filesystem entry owning a list of files.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Filesystem {
    /// Block device path.
    pub device: String,
    /// Filesystem type.
    #[serde(default)]
    pub format: String,
    /// Files written to this filesystem.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<File>,
    /// Remaining fields such as `create`.
    #[serde(flatten)]
    pub other: Extra,
}

/// File with literal contents.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct File {
    /// Absolute path within the filesystem.
    pub path: String,
    /// Literal file contents.
    #[serde(default)]
    pub contents: String,
    /// POSIX mode.
    #[serde(default)]
    pub mode: u32,
    /// Remaining fields such as `uid` and `gid`.
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

/// Parses a v1 document.
pub(crate) fn parse(text: &str) -> Result<Config, ParseError> {
    let config: Config = parse_versioned(text, |declared| {
        matches!(declared, DeclaredVersion::Legacy(1))
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
        for file in self.storage.filesystems.iter().flat_map(|fs| &fs.files) {
            checks.path(&file.path);
            checks.mode(&file.path, Some(file.mode));
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
        Variant::IgnitionV1
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
        let file = File {
            path: path.to_owned(),
            contents: contents.to_owned(),
            mode,
            other: Extra::new(),
        };
        match self.storage.filesystems.first_mut() {
            None => self.storage.filesystems.push(Filesystem {
                device: ROOT_DEVICE.to_owned(),
                format: ROOT_FORMAT.to_owned(),
                files: vec![file],
                other: Extra::new(),
            }),
            Some(root) if root.device == ROOT_DEVICE => root.files.push(file),
            Some(other) => {
                return Err(ConfError::UnexpectedFilesystem {
                    device: other.device.clone(),
                });
            }
        }
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
                .filesystems
                .iter()
                .flat_map(|fs| &fs.files)
                .map(|file| FileView {
                    path: file.path.clone(),
                    contents: file.contents.clone().into_bytes(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn creates_root_filesystem_on_first_file() {
        let mut config = Config::default();
        config
            .add_file("/etc/hostname", "root", "worker-1", 0o644)
            .expect("add file");
        config
            .add_file("/etc/motd", "root", "hi", 0o600)
            .expect("add file");

        assert_eq!(config.storage.filesystems.len(), 1);
        let root = &config.storage.filesystems[0];
        assert_eq!(root.device, ROOT_DEVICE);
        assert_eq!(root.format, "ext4");
        assert_eq!(root.files.len(), 2);
        assert_eq!(root.files[0].contents, "worker-1");
    }

    #[rstest]
    fn rejects_foreign_first_filesystem() {
        let mut config = parse(
            r#"{"ignitionVersion":1,"storage":{"filesystems":[{"device":"/dev/sdb1","format":"ext4"}]}}"#,
        )
        .expect("valid v1");
        let err = config
            .add_file("/etc/hostname", "root", "x", 0o644)
            .expect_err("foreign device");
        assert_eq!(
            err,
            ConfError::UnexpectedFilesystem {
                device: "/dev/sdb1".to_owned()
            }
        );
    }

    #[rstest]
    fn parse_ignores_other_versions() {
        assert_eq!(
            parse(r#"{"ignition":{"version":"2.0.0"}}"#),
            Err(ParseError::UnknownVersion)
        );
        assert_eq!(parse(r#"{"ignitionVersion":2}"#), Err(ParseError::UnknownVersion));
    }

    #[rstest]
    fn serializes_with_legacy_version_key() {
        let mut config = Config::default();
        config
            .add_systemd_unit("etcd.service", "[Service]", true)
            .expect("add unit");
        let json = serde_json::to_value(&config).expect("serialize");
        assert_eq!(json["ignitionVersion"], 1);
        assert_eq!(json["systemd"]["units"][0]["enable"], true);
    }
}

//! Schema shared by Ignition specs 2.1, 2.2 and 2.3.
//!
//! The three specs agree on every field the mutation contract touches, so a
//! single generic document is instantiated once per spec through a marker type.
//! A parser for spec 2.N accepts any 2.x document with a minor version up to N
//! and re-stamps it with its own version.

use std::fmt;
use std::marker::PhantomData;

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
    UnitView, Variant,
};

/// Identifies one 2.x spec.
pub trait SpecMinor: Clone + Default + fmt::Debug + PartialEq + Send + Sync + 'static {
    /// Minor version number.
    const MINOR: u64;
    /// Version string stamped on documents.
    const VERSION: &'static str;
    /// Variant reported by the mutator.
    const VARIANT: Variant;
}

/// Top-level 2.x document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Config<M: SpecMinor> {
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
    #[serde(skip)]
    spec: PhantomData<M>,
}

impl<M: SpecMinor> Default for Config<M> {
    fn default() -> Self {
        Self {
            ignition: Ignition::with_version(M::VERSION),
            storage: Storage::default(),
            systemd: Systemd::default(),
            passwd: Passwd::default(),
            other: Extra::new(),
            spec: PhantomData,
        }
    }
}

/// `storage` section.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Storage {
    /// Declared files.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<File>,
    /// Remaining fields such as `directories` and `links`.
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
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
    /// Remaining fields such as `user`, `group` and `overwrite`.
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

/// Systemd unit using the `enabled` flag.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    /// Unit name.
    pub name: String,
    /// Whether the unit is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Unit file contents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
    /// Drop-ins.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dropins: Vec<Dropin>,
    /// Remaining fields such as `mask` and the deprecated `enable`.
    #[serde(flatten)]
    pub other: Extra,
}

/// Parses any 2.x document up to spec `M` and re-stamps it as `M`.
pub(crate) fn parse<M: SpecMinor>(text: &str) -> Result<Config<M>, ParseError> {
    let mut config: Config<M> = parse_versioned(text, |declared| {
        matches!(declared, DeclaredVersion::Semver(version)
            if version.major == 2 && version.minor <= M::MINOR && version.pre.is_empty())
    })?;
    M::VERSION.clone_into(&mut config.ignition.version);
    let report = config.validate();
    if report.is_clean() {
        Ok(config)
    } else {
        Err(ParseError::Invalid(report))
    }
}

impl<M: SpecMinor> Config<M> {
    /// Runs the schema validator.
    #[must_use]
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::new();
        let mut checks = Checks::new(&mut report);
        for file in &self.storage.files {
            checks.path(&file.path);
            checks.mode(&file.path, file.mode);
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

impl<M: SpecMinor> ConfigMutator for Config<M> {
    fn variant(&self) -> Variant {
        M::VARIANT
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
            mode: Some(mode),
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
            enabled: Some(enabled),
            contents: Some(contents.to_owned()),
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
                    mode: file.mode,
                })
                .collect(),
            units: self
                .systemd
                .units
                .iter()
                .map(|unit| UnitView {
                    name: unit.name.clone(),
                    contents: unit.contents.clone().filter(|text| !text.is_empty()),
                    enabled: unit.enabled.unwrap_or(false),
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
    use crate::conf::ignition::{v2_1, v2_2, v2_3};
    use rstest::rstest;

    const SPEC_2_1: &str = r#"{"ignition":{"version":"2.1.0"}}"#;

    #[rstest]
    fn newer_parser_restamps_older_document() {
        let config = v2_3::parse(SPEC_2_1).expect("2.3 accepts 2.1");
        assert_eq!(config.ignition.version, "2.3.0");
    }

    #[rstest]
    fn older_parser_rejects_newer_document() {
        assert_eq!(
            v2_1::parse(r#"{"ignition":{"version":"2.2.0"}}"#),
            Err(ParseError::UnknownVersion)
        );
    }

    #[rstest]
    fn units_serialize_enabled_flag() {
        let mut config = v2_2::Config::default();
        config
            .add_systemd_unit("docker.service", "[Service]", false)
            .expect("add unit");
        let json = serde_json::to_value(&config).expect("serialize");
        assert_eq!(json["ignition"]["version"], "2.2.0");
        assert_eq!(json["systemd"]["units"][0]["enabled"], false);
    }

    #[rstest]
    fn preserves_unknown_sections() {
        let text = r#"{"ignition":{"version":"2.2.0"},"networkd":{"units":[{"name":"10-eth.network"}]}}"#;
        let config = v2_2::parse(text).expect("valid");
        let json = serde_json::to_value(&config).expect("serialize");
        assert_eq!(json["networkd"]["units"][0]["name"], "10-eth.network");
    }
}

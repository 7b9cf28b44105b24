//! Ignition spec 3.0.
//!
//! Every mutation is expressed as a 3.0 fragment and merged into the
//! document. Merging follows the v3.0 schema rules: keyed lists (files by path,
//! units and drop-ins by name, users by name) merge entry by entry, scalar
//! fields set in the fragment override, and plain lists append.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{Checks, DeclaredVersion, Extra, Ignition, Passwd, ParseError, PasswdUser};
use super::{CORE_USER, decode_source, parse_versioned};
use crate::conf::dataurl;
use crate::conf::error::{ConfError, ValidationReport};
use crate::conf::keys::{AuthorizedKey, key_lines};
use crate::conf::mutator::{
    ConfigMutator, ConfigSummary, DropinView, FileView, MERGEABLE_OPERATIONS, Operation,
    UnitView, Variant,
};

/// Version stamped on documents of this schema.
pub const VERSION: &str = "3.0.0";

/// Top-level 3.0 document.
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
    /// Remaining top-level fields.
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
    /// Remaining fields such as `directories`, `links` and `filesystems`.
    #[serde(flatten)]
    pub other: Extra,
}

impl Storage {
    fn is_empty(&self) -> bool {
        self.files.is_empty() && self.other.is_empty()
    }
}

/// File entry keyed by path.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct File {
    /// Absolute path.
    pub path: String,
    /// Whether an existing file is replaced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overwrite: Option<bool>,
    /// Contents source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<FileContents>,
    /// POSIX mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
    /// Remaining fields such as `append`, `user` and `group`.
    #[serde(flatten)]
    pub other: Extra,
}

/// `contents` object of a 3.0 file entry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FileContents {
    /// Source URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Remaining fields such as `compression` and `verification`.
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

/// Systemd unit keyed by name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    /// Unit name.
    pub name: String,
    /// Whether the unit is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Whether the unit is masked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<bool>,
    /// Unit file contents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
    /// Drop-ins keyed by name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dropins: Vec<Dropin>,
}

/// Systemd drop-in keyed by name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Dropin {
    /// Drop-in file name.
    pub name: String,
    /// Drop-in contents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
}

/// Parses a 3.0 document.
pub(crate) fn parse(text: &str) -> Result<Config, ParseError> {
    let config: Config = parse_versioned(text, |declared| {
        matches!(declared, DeclaredVersion::Semver(version)
            if version.major == 3 && version.minor == 0 && version.pre.is_empty())
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
        let mut seen_paths = BTreeSet::new();
        let mut seen_units = BTreeSet::new();
        let mut duplicates = Vec::new();
        {
            let mut checks = Checks::new(&mut report);
            for file in &self.storage.files {
                checks.path(&file.path);
                checks.mode(&file.path, file.mode);
                if let Some(source) = file.contents.as_ref().and_then(|c| c.source.as_deref()) {
                    checks.source(&file.path, source);
                }
                if !seen_paths.insert(file.path.as_str()) {
                    duplicates.push(format!("duplicate file entry for {}", file.path));
                }
            }
            for unit in &self.systemd.units {
                checks.unit(&unit.name);
                for dropin in &unit.dropins {
                    checks.dropin(&unit.name, &dropin.name);
                }
                if !seen_units.insert(unit.name.as_str()) {
                    duplicates.push(format!("duplicate unit entry for {}", unit.name));
                }
            }
        }
        for entry in duplicates {
            report.push(entry);
        }
        report
    }

    /// Merges `fragment` into this document following the 3.0 merge rules.
    pub fn merge_fragment(&mut self, fragment: &Self) {
        merge_extra(&mut self.ignition.other, &fragment.ignition.other);
        merge_extra(&mut self.storage.other, &fragment.storage.other);
        merge_extra(&mut self.passwd.other, &fragment.passwd.other);
        merge_extra(&mut self.other, &fragment.other);
        merge_keyed(
            &mut self.storage.files,
            &fragment.storage.files,
            |file| &file.path,
            merge_file,
        );
        merge_keyed(
            &mut self.systemd.units,
            &fragment.systemd.units,
            |unit| &unit.name,
            merge_unit,
        );
        merge_keyed(
            &mut self.passwd.users,
            &fragment.passwd.users,
            |user| &user.name,
            merge_user,
        );
    }

    fn fragment() -> Self {
        Self::default()
    }
}

fn merge_keyed<T, K, M>(parent: &mut Vec<T>, child: &[T], key: K, merge: M)
where
    T: Clone,
    K: Fn(&T) -> &String,
    M: Fn(&mut T, &T),
{
    for entry in child {
        if let Some(existing) = parent.iter_mut().find(|item| key(item) == key(entry)) {
            merge(existing, entry);
        } else {
            parent.push(entry.clone());
        }
    }
}

fn merge_extra(parent: &mut Extra, child: &Extra) {
    for (key, value) in child {
        parent.insert(key.clone(), value.clone());
    }
}

fn override_with<T: Clone>(parent: &mut Option<T>, child: Option<&T>) {
    if let Some(value) = child {
        *parent = Some(value.clone());
    }
}

fn merge_file(parent: &mut File, child: &File) {
    override_with(&mut parent.overwrite, child.overwrite.as_ref());
    override_with(&mut parent.mode, child.mode.as_ref());
    if let Some(contents) = &child.contents {
        let target = parent.contents.get_or_insert_with(FileContents::default);
        override_with(&mut target.source, contents.source.as_ref());
        merge_extra(&mut target.other, &contents.other);
    }
    merge_extra(&mut parent.other, &child.other);
}

fn merge_unit(parent: &mut Unit, child: &Unit) {
    override_with(&mut parent.enabled, child.enabled.as_ref());
    override_with(&mut parent.mask, child.mask.as_ref());
    override_with(&mut parent.contents, child.contents.as_ref());
    merge_keyed(
        &mut parent.dropins,
        &child.dropins,
        |dropin| &dropin.name,
        |existing, incoming| override_with(&mut existing.contents, incoming.contents.as_ref()),
    );
}

fn merge_user(parent: &mut PasswdUser, child: &PasswdUser) {
    parent
        .ssh_authorized_keys
        .extend(child.ssh_authorized_keys.iter().cloned());
    merge_extra(&mut parent.other, &child.other);
}

impl ConfigMutator for Config {
    fn variant(&self) -> Variant {
        Variant::IgnitionV3_0
    }

    fn capabilities(&self) -> &'static [Operation] {
        MERGEABLE_OPERATIONS
    }

    fn add_file(
        &mut self,
        path: &str,
        _filesystem: &str,
        contents: &str,
        mode: u32,
    ) -> Result<(), ConfError> {
        let mut fragment = Self::fragment();
        fragment.storage.files.push(File {
            path: path.to_owned(),
            contents: Some(FileContents {
                source: Some(dataurl::encode(contents.as_bytes())),
                other: Extra::new(),
            }),
            mode: Some(mode),
            ..File::default()
        });
        self.merge_fragment(&fragment);
        Ok(())
    }

    fn add_systemd_unit(
        &mut self,
        name: &str,
        contents: &str,
        enabled: bool,
    ) -> Result<(), ConfError> {
        let mut fragment = Self::fragment();
        fragment.systemd.units.push(Unit {
            name: name.to_owned(),
            enabled: Some(enabled),
            contents: Some(contents.to_owned()),
            ..Unit::default()
        });
        self.merge_fragment(&fragment);
        Ok(())
    }

    fn add_systemd_unit_dropin(
        &mut self,
        unit: &str,
        name: &str,
        contents: &str,
    ) -> Result<(), ConfError> {
        let mut fragment = Self::fragment();
        fragment.systemd.units.push(Unit {
            name: unit.to_owned(),
            dropins: vec![Dropin {
                name: name.to_owned(),
                contents: Some(contents.to_owned()),
            }],
            ..Unit::default()
        });
        self.merge_fragment(&fragment);
        Ok(())
    }

    fn copy_keys(&mut self, keys: &[AuthorizedKey]) -> Result<(), ConfError> {
        let mut fragment = Self::fragment();
        fragment.passwd.users.push(PasswdUser {
            name: CORE_USER.to_owned(),
            ssh_authorized_keys: key_lines(keys),
            other: Extra::new(),
        });
        self.merge_fragment(&fragment);
        Ok(())
    }

    fn merge(&mut self, fragment: &Self) -> Result<(), ConfError> {
        self.merge_fragment(fragment);
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
                    contents: file
                        .contents
                        .as_ref()
                        .and_then(|contents| contents.source.as_deref())
                        .map(decode_source)
                        .unwrap_or_default(),
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
                    dropins: unit
                        .dropins
                        .iter()
                        .map(|dropin| DropinView {
                            name: dropin.name.clone(),
                            contents: dropin.contents.clone().unwrap_or_default(),
                        })
                        .collect(),
                })
                .collect(),
            authorized_keys: self.passwd.core_keys(),
        }
    }
}

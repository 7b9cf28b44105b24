//! Mutation contract shared by every rendered configuration variant.

use std::fmt;

use super::ConfError;
use super::ignition::v3_0;
use super::keys::AuthorizedKey;

/// Mutation operations a configuration variant may support.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Operation {
    /// Append a file entry.
    AddFile,
    /// Append a systemd unit.
    AddSystemdUnit,
    /// Attach a drop-in to a systemd unit.
    AddSystemdUnitDropin,
    /// Append SSH keys for the `core` user.
    CopyKeys,
    /// Merge an Ignition v3.0 fragment.
    Merge,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AddFile => "add_file",
            Self::AddSystemdUnit => "add_systemd_unit",
            Self::AddSystemdUnitDropin => "add_systemd_unit_dropin",
            Self::CopyKeys => "copy_keys",
            Self::Merge => "merge",
        };
        f.write_str(name)
    }
}

/// Concrete schema populated in a rendered configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Variant {
    /// Nothing was rendered.
    Empty,
    /// Ignition config version 1.
    IgnitionV1,
    /// Ignition spec 2.0.
    IgnitionV2_0,
    /// Ignition spec 2.1.
    IgnitionV2_1,
    /// Ignition spec 2.2.
    IgnitionV2_2,
    /// Ignition spec 2.3.
    IgnitionV2_3,
    /// Ignition spec 3.0.
    IgnitionV3_0,
    /// Legacy `#cloud-config` document.
    CloudConfig,
    /// Free-form shell script.
    Script,
}

impl Variant {
    /// Returns `true` for the versioned Ignition schemas.
    #[must_use]
    pub const fn is_ignition(self) -> bool {
        matches!(
            self,
            Self::IgnitionV1
                | Self::IgnitionV2_0
                | Self::IgnitionV2_1
                | Self::IgnitionV2_2
                | Self::IgnitionV2_3
                | Self::IgnitionV3_0
        )
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Empty => "empty",
            Self::IgnitionV1 => "Ignition v1",
            Self::IgnitionV2_0 => "Ignition v2.0",
            Self::IgnitionV2_1 => "Ignition v2.1",
            Self::IgnitionV2_2 => "Ignition v2.2",
            Self::IgnitionV2_3 => "Ignition v2.3",
            Self::IgnitionV3_0 => "Ignition v3.0",
            Self::CloudConfig => "cloud-config",
            Self::Script => "script",
        };
        f.write_str(name)
    }
}

/// Operations supported by every declarative variant except Ignition v3.0.
pub(crate) const DECLARATIVE_OPERATIONS: &[Operation] = &[
    Operation::AddFile,
    Operation::AddSystemdUnit,
    Operation::AddSystemdUnitDropin,
    Operation::CopyKeys,
];

/// Operations supported by Ignition v3.0.
pub(crate) const MERGEABLE_OPERATIONS: &[Operation] = &[
    Operation::AddFile,
    Operation::AddSystemdUnit,
    Operation::AddSystemdUnitDropin,
    Operation::CopyKeys,
    Operation::Merge,
];

/// Operations supported by free-form scripts.
pub(crate) const SCRIPT_OPERATIONS: &[Operation] = &[Operation::CopyKeys];

/// Mutations implemented once per configuration variant.
///
/// Each implementation translates the operation into its own schema. The
/// defaults reject the operation so a variant only overrides what its
/// capability table lists.
pub trait ConfigMutator {
    /// Variant implemented by this configuration.
    fn variant(&self) -> Variant;

    /// Operations this variant supports.
    fn capabilities(&self) -> &'static [Operation];

    /// Appends a file with the given contents and POSIX mode.
    ///
    /// # Errors
    ///
    /// Returns [`ConfError::Unsupported`] unless overridden.
    fn add_file(
        &mut self,
        _path: &str,
        _filesystem: &str,
        _contents: &str,
        _mode: u32,
    ) -> Result<(), ConfError> {
        Err(self.unsupported(Operation::AddFile))
    }

    /// Appends a systemd unit. Duplicate names are not collapsed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfError::Unsupported`] unless overridden.
    fn add_systemd_unit(
        &mut self,
        _name: &str,
        _contents: &str,
        _enabled: bool,
    ) -> Result<(), ConfError> {
        Err(self.unsupported(Operation::AddSystemdUnit))
    }

    /// Attaches a drop-in to the first unit named `unit`, creating a bare
    /// unit entry when none exists.
    ///
    /// # Errors
    ///
    /// Returns [`ConfError::Unsupported`] unless overridden.
    fn add_systemd_unit_dropin(
        &mut self,
        _unit: &str,
        _name: &str,
        _contents: &str,
    ) -> Result<(), ConfError> {
        Err(self.unsupported(Operation::AddSystemdUnitDropin))
    }

    /// Appends keys to the `core` user's authorized keys.
    ///
    /// # Errors
    ///
    /// Returns [`ConfError::Unsupported`] unless overridden.
    fn copy_keys(&mut self, _keys: &[AuthorizedKey]) -> Result<(), ConfError> {
        Err(self.unsupported(Operation::CopyKeys))
    }

    /// Merges an Ignition v3.0 fragment into this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfError::Unsupported`] unless overridden.
    fn merge(&mut self, _fragment: &v3_0::Config) -> Result<(), ConfError> {
        Err(self.unsupported(Operation::Merge))
    }

    /// Returns the variant-independent view of the configuration.
    fn summary(&self) -> ConfigSummary;

    /// Builds the error returned for an operation outside the capability set.
    fn unsupported(&self, operation: Operation) -> ConfError {
        ConfError::Unsupported {
            operation,
            variant: self.variant(),
        }
    }
}

/// Variant-independent view of a rendered configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConfigSummary {
    /// Declared files in document order.
    pub files: Vec<FileView>,
    /// Declared systemd units in document order.
    pub units: Vec<UnitView>,
    /// Authorized keys for the `core` user.
    pub authorized_keys: Vec<String>,
}

impl ConfigSummary {
    /// Returns every file declared at `path`.
    #[must_use]
    pub fn files_at(&self, path: &str) -> Vec<&FileView> {
        self.files.iter().filter(|file| file.path == path).collect()
    }

    /// Returns every unit named `name`.
    #[must_use]
    pub fn units_named(&self, name: &str) -> Vec<&UnitView> {
        self.units.iter().filter(|unit| unit.name == name).collect()
    }
}

/// A file entry with decoded contents.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileView {
    /// Absolute path on the target filesystem.
    pub path: String,
    /// Decoded file contents.
    pub contents: Vec<u8>,
    /// POSIX mode, when declared.
    pub mode: Option<u32>,
}

/// A systemd unit entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnitView {
    /// Unit name including its suffix.
    pub name: String,
    /// Unit file contents; `None` for drop-in-only entries.
    pub contents: Option<String>,
    /// Whether the unit is enabled.
    pub enabled: bool,
    /// Attached drop-ins in document order.
    pub dropins: Vec<DropinView>,
}

/// A systemd drop-in.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DropinView {
    /// Drop-in file name.
    pub name: String,
    /// Drop-in contents.
    pub contents: String,
}

/// Normalises empty unit contents to `None`.
pub(crate) fn non_empty(contents: &str) -> Option<String> {
    if contents.is_empty() {
        None
    } else {
        Some(contents.to_owned())
    }
}

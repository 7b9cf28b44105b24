//! Schema-resolved configuration holding exactly one populated variant.

use camino::Utf8Path;
use cap_std::fs_utf8::Dir;

use super::ConfError;
use super::cloud_config::CloudConfig;
use super::ignition::{self, v1, v2_0, v2_1, v2_2, v2_3, v3_0};
use super::keys::AuthorizedKey;
use super::mutator::{ConfigMutator, ConfigSummary, Operation, Variant};
use super::script::Script;

/// A rendered boot configuration.
///
/// The enum makes the "at most one populated schema" rule structural: a value
/// is either [`RenderedConfig::Empty`] or carries exactly one document.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum RenderedConfig {
    /// Nothing to hand to the machine.
    #[default]
    Empty,
    /// Ignition config version 1.
    IgnitionV1(v1::Config),
    /// Ignition spec 2.0.
    IgnitionV2_0(v2_0::Config),
    /// Ignition spec 2.1.
    IgnitionV2_1(v2_1::Config),
    /// Ignition spec 2.2.
    IgnitionV2_2(v2_2::Config),
    /// Ignition spec 2.3.
    IgnitionV2_3(v2_3::Config),
    /// Ignition spec 3.0.
    IgnitionV3_0(v3_0::Config),
    /// Legacy cloud-config.
    CloudConfig(CloudConfig),
    /// Free-form script.
    Script(Script),
}

impl RenderedConfig {
    fn mutator(&self) -> Option<&dyn ConfigMutator> {
        match self {
            Self::Empty => None,
            Self::IgnitionV1(config) => Some(config),
            Self::IgnitionV2_0(config) => Some(config),
            Self::IgnitionV2_1(config) => Some(config),
            Self::IgnitionV2_2(config) => Some(config),
            Self::IgnitionV2_3(config) => Some(config),
            Self::IgnitionV3_0(config) => Some(config),
            Self::CloudConfig(config) => Some(config),
            Self::Script(script) => Some(script),
        }
    }

    fn mutator_mut(&mut self) -> Option<&mut dyn ConfigMutator> {
        match self {
            Self::Empty => None,
            Self::IgnitionV1(config) => Some(config),
            Self::IgnitionV2_0(config) => Some(config),
            Self::IgnitionV2_1(config) => Some(config),
            Self::IgnitionV2_2(config) => Some(config),
            Self::IgnitionV2_3(config) => Some(config),
            Self::IgnitionV3_0(config) => Some(config),
            Self::CloudConfig(config) => Some(config),
            Self::Script(script) => Some(script),
        }
    }

    /// Resolves the populated variant and checks its capability table.
    fn dispatch(&mut self, operation: Operation) -> Result<&mut dyn ConfigMutator, ConfError> {
        let mutator = self.mutator_mut().ok_or(ConfError::Unrendered)?;
        if !mutator.capabilities().contains(&operation) {
            return Err(mutator.unsupported(operation));
        }
        Ok(mutator)
    }

    /// Variant currently populated.
    #[must_use]
    pub fn variant(&self) -> Variant {
        self.mutator()
            .map_or(Variant::Empty, ConfigMutator::variant)
    }

    /// Operations the populated variant supports; empty when unrendered.
    #[must_use]
    pub fn capabilities(&self) -> &'static [Operation] {
        match self.mutator() {
            Some(mutator) => mutator.capabilities(),
            None => &[],
        }
    }

    /// Returns `true` when an Ignition variant is populated.
    #[must_use]
    pub fn is_native(&self) -> bool {
        self.variant().is_ignition()
    }

    /// Returns `true` when no variant is populated.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Appends a file. `filesystem` is ignored by variants that only write to
    /// the root filesystem.
    ///
    /// # Errors
    ///
    /// Returns [`ConfError::Unrendered`] for an empty config,
    /// [`ConfError::Unsupported`] for scripts and
    /// [`ConfError::UnexpectedFilesystem`] when an Ignition v1 config already
    /// targets a non-root device.
    pub fn add_file(
        &mut self,
        path: &str,
        filesystem: &str,
        contents: &str,
        mode: u32,
    ) -> Result<(), ConfError> {
        self.dispatch(Operation::AddFile)?
            .add_file(path, filesystem, contents, mode)
    }

    /// Appends a systemd unit without checking for existing entries.
    ///
    /// # Errors
    ///
    /// Returns [`ConfError::Unrendered`] or [`ConfError::Unsupported`].
    pub fn add_systemd_unit(
        &mut self,
        name: &str,
        contents: &str,
        enabled: bool,
    ) -> Result<(), ConfError> {
        self.dispatch(Operation::AddSystemdUnit)?
            .add_systemd_unit(name, contents, enabled)
    }

    /// Attaches a drop-in to `unit`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfError::Unrendered`] or [`ConfError::Unsupported`].
    pub fn add_systemd_unit_dropin(
        &mut self,
        unit: &str,
        name: &str,
        contents: &str,
    ) -> Result<(), ConfError> {
        self.dispatch(Operation::AddSystemdUnitDropin)?
            .add_systemd_unit_dropin(unit, name, contents)
    }

    /// Appends keys for the `core` user, or substitutes them into a script.
    ///
    /// # Errors
    ///
    /// Returns [`ConfError::Unrendered`] for an empty config.
    pub fn copy_keys(&mut self, keys: &[AuthorizedKey]) -> Result<(), ConfError> {
        self.dispatch(Operation::CopyKeys)?.copy_keys(keys)
    }

    /// Merges an Ignition v3.0 fragment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfError::Unsupported`] unless Ignition v3.0 is populated.
    pub fn merge(&mut self, fragment: &v3_0::Config) -> Result<(), ConfError> {
        self.dispatch(Operation::Merge)?.merge(fragment)
    }

    /// Variant-independent view of files, units and keys.
    #[must_use]
    pub fn summary(&self) -> ConfigSummary {
        self.mutator()
            .map(ConfigMutator::summary)
            .unwrap_or_default()
    }

    /// Runs the Ignition validator for the populated schema.
    ///
    /// Cloud-configs, scripts and empty configs have no validator and pass.
    ///
    /// # Errors
    ///
    /// Returns [`ConfError::Invalid`] with the validator report.
    pub fn validate(&self) -> Result<(), ConfError> {
        let report = match self {
            Self::IgnitionV1(config) => config.validate(),
            Self::IgnitionV2_0(config) => config.validate(),
            Self::IgnitionV2_1(config) => config.validate(),
            Self::IgnitionV2_2(config) => config.validate(),
            Self::IgnitionV2_3(config) => config.validate(),
            Self::IgnitionV3_0(config) => config.validate(),
            Self::Empty | Self::CloudConfig(_) | Self::Script(_) => return Ok(()),
        };
        report.into_result(self.variant())
    }

    /// Returns `true` for an Ignition config that passes validation.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.is_native() && self.validate().is_ok()
    }

    /// Serializes the populated variant: JSON for Ignition, a headed YAML
    /// document for cloud-config, the raw text for scripts.
    ///
    /// # Errors
    ///
    /// Returns [`ConfError::Serialize`] when encoding fails.
    pub fn serialize(&self) -> Result<String, ConfError> {
        let variant = self.variant();
        match self {
            Self::Empty => Ok(String::new()),
            Self::IgnitionV1(config) => ignition::to_json(config, variant),
            Self::IgnitionV2_0(config) => ignition::to_json(config, variant),
            Self::IgnitionV2_1(config) => ignition::to_json(config, variant),
            Self::IgnitionV2_2(config) => ignition::to_json(config, variant),
            Self::IgnitionV2_3(config) => ignition::to_json(config, variant),
            Self::IgnitionV3_0(config) => ignition::to_json(config, variant),
            Self::CloudConfig(config) => config.to_text(),
            Self::Script(script) => Ok(script.text().to_owned()),
        }
    }

    /// Serialized bytes handed to a backend.
    ///
    /// # Errors
    ///
    /// Propagates [`RenderedConfig::serialize`] failures.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ConfError> {
        self.serialize().map(String::into_bytes)
    }

    /// Writes the serialized config to `name` inside `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfError::Write`] when the file cannot be written.
    pub fn write_to(&self, dir: &Dir, name: &Utf8Path) -> Result<(), ConfError> {
        let bytes = self.to_bytes()?;
        dir.write(name, bytes).map_err(|err| ConfError::Write {
            path: name.to_string(),
            message: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn empty_config_rejects_mutation_as_unrendered() {
        let mut config = RenderedConfig::Empty;
        assert_eq!(
            config.add_systemd_unit("a.service", "", true),
            Err(ConfError::Unrendered)
        );
        assert_eq!(config.copy_keys(&[]), Err(ConfError::Unrendered));
        assert!(
            config
                .add_file("/a", "root", "", 0o644)
                .is_err_and(|err| err.is_programming_error())
        );
    }

    #[rstest]
    #[case(RenderedConfig::IgnitionV1(v1::Config::default()))]
    #[case(RenderedConfig::IgnitionV2_3(v2_3::Config::default()))]
    #[case(RenderedConfig::CloudConfig(CloudConfig::default()))]
    #[case(RenderedConfig::Script(Script::new("#!/bin/sh")))]
    fn merge_is_limited_to_v3(#[case] mut config: RenderedConfig) {
        let variant = config.variant();
        assert_eq!(
            config.merge(&v3_0::Config::default()),
            Err(ConfError::Unsupported {
                operation: Operation::Merge,
                variant,
            })
        );
    }

    #[rstest]
    fn v3_merge_is_dispatched() {
        let mut config = RenderedConfig::IgnitionV3_0(v3_0::Config::default());
        let mut fragment = v3_0::Config::default();
        fragment
            .add_file("/etc/motd", "root", "hi", 0o644)
            .expect("fragment file");
        config.merge(&fragment).expect("merge");
        assert_eq!(config.summary().files_at("/etc/motd").len(), 1);
    }

    #[rstest]
    fn empty_serializes_to_nothing() {
        assert_eq!(RenderedConfig::Empty.serialize().expect("serialize"), "");
        assert!(!RenderedConfig::Empty.is_valid());
    }

    #[rstest]
    fn writes_serialized_bytes() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = Dir::open_ambient_dir(
            Utf8Path::from_path(tmp.path()).expect("utf8 path"),
            cap_std::ambient_authority(),
        )
        .expect("open dir");
        let config = RenderedConfig::Script(Script::new("#!/bin/sh\necho hi\n"));
        config
            .write_to(&dir, Utf8Path::new("user-data"))
            .expect("write");
        assert_eq!(
            dir.read_to_string("user-data").expect("read"),
            "#!/bin/sh\necho hi\n"
        );
    }
}

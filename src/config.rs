//! Layered settings for the harness and the Scaleway backend.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Harness-wide settings derived from configuration files and environment
/// variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "HARRIER",
    discovery(
        app_name = "harrier",
        env_var = "HARRIER_CONFIG_PATH",
        config_file_name = "harrier.toml",
        dotfile_name = ".harrier.toml",
        project_file_name = "harrier.toml"
    )
)]
pub struct HarnessConfig {
    /// Directory receiving per-machine console, journal and user-data files.
    #[ortho_config(default = "_harrier".to_owned())]
    pub output_dir: String,
    /// Platform hint used when transpiling Container Linux Configs.
    #[ortho_config(default = String::new())]
    pub platform: String,
    /// Provisioning attempts per machine before giving up.
    #[ortho_config(default = 3)]
    pub max_attempts: u32,
    /// Seconds to wait for a machine to accept remote commands.
    #[ortho_config(default = 300)]
    pub boot_timeout_secs: u64,
    /// Seconds between readiness checks.
    #[ortho_config(default = 5)]
    pub poll_interval_secs: u64,
    /// `authorized_keys` lines injected into every machine.
    #[ortho_config(default = Vec::new())]
    pub ssh_public_keys: Vec<String>,
}

/// Credentials and server defaults for [`crate::ScalewayBackend`].
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "SCW")]
pub struct ScalewayConfig {
    /// API access key. Unused; accepted so a standard `SCW_*` environment
    /// loads cleanly.
    pub access_key: Option<String>,
    /// API secret key, sent as `X-Auth-Token`.
    pub secret_key: String,
    /// Organisation scoping image lookups, when set.
    pub default_organization_id: Option<String>,
    /// Project owning created servers.
    pub default_project_id: String,
    /// Zone servers are created in.
    #[ortho_config(default = "fr-par-1".to_owned())]
    pub default_zone: String,
    /// Commercial type for new instances.
    #[ortho_config(default = "DEV1-S".to_owned())]
    pub default_instance_type: String,
    /// Image label, for example `Fedora CoreOS`.
    #[ortho_config(default = "Fedora CoreOS".to_owned())]
    pub default_image: String,
    /// Architecture the image must be built for.
    #[ortho_config(default = "x86_64".to_owned())]
    pub default_architecture: String,
}

/// Names where a table of settings comes from, so validation errors can
/// point at the environment variable and the `harrier.toml` table.
struct Section {
    env_prefix: &'static str,
    table: &'static str,
}

const HARNESS: Section = Section {
    env_prefix: "HARRIER",
    table: "harrier",
};

const SCALEWAY: Section = Section {
    env_prefix: "SCW",
    table: "scaleway",
};

impl Section {
    fn sources(&self, key: &str) -> String {
        format!(
            "set {}_{} or add {key} to [{}] in harrier.toml",
            self.env_prefix,
            key.to_ascii_uppercase(),
            self.table
        )
    }

    fn require_text(&self, fields: &[(&str, &str, &str)]) -> Result<(), ConfigError> {
        match fields.iter().find(|(value, _, _)| value.trim().is_empty()) {
            Some((_, label, key)) => Err(ConfigError::MissingField(format!(
                "missing {label}: {}",
                self.sources(key)
            ))),
            None => Ok(()),
        }
    }

    fn require_nonzero(&self, fields: &[(u64, &str)]) -> Result<(), ConfigError> {
        match fields.iter().find(|(value, _)| *value == 0) {
            Some((_, key)) => Err(ConfigError::InvalidValue(format!(
                "{key} must be greater than zero: {}",
                self.sources(key)
            ))),
            None => Ok(()),
        }
    }
}

impl HarnessConfig {
    /// Merges defaults, configuration files and `HARRIER_*` variables. The
    /// process arguments are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("harrier")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Rejects a blank output directory and zero counts or durations.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the first offending field and where it
    /// can be set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        HARNESS.require_text(&[(self.output_dir.as_str(), "output directory", "output_dir")])?;
        HARNESS.require_nonzero(&[
            (u64::from(self.max_attempts), "max_attempts"),
            (self.boot_timeout_secs, "boot_timeout_secs"),
            (self.poll_interval_secs, "poll_interval_secs"),
        ])
    }
}

impl ScalewayConfig {
    /// Merges defaults, configuration files and `SCW_*` variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("harrier")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks that every setting the backend needs to create a server is
    /// present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] for the first blank setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        SCALEWAY.require_text(&[
            (self.secret_key.as_str(), "Scaleway API secret key", "secret_key"),
            (self.default_project_id.as_str(), "Scaleway project ID", "default_project_id"),
            (self.default_image.as_str(), "image label", "default_image"),
            (self.default_instance_type.as_str(), "instance type", "default_instance_type"),
            (self.default_zone.as_str(), "availability zone", "default_zone"),
            (self.default_architecture.as_str(), "CPU architecture", "default_architecture"),
        ])
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// A required setting is blank.
    #[error("{0}")]
    MissingField(String),
    /// A setting is present but unusable.
    #[error("invalid setting: {0}")]
    InvalidValue(String),
    /// Sources could not be merged.
    #[error("cannot load configuration: {0}")]
    Parse(String),
}

//! SSH client settings and remote execution errors.
//!
//! [`SshConfig`] is loaded via `ortho-config`, which merges defaults,
//! configuration files and environment variables.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::conf::ignition::CORE_USER;

/// Default SSH connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// SSH client settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "HARRIER_SSH",
    discovery(
        app_name = "harrier",
        env_var = "HARRIER_CONFIG_PATH",
        config_file_name = "harrier.toml",
        dotfile_name = ".harrier.toml",
        project_file_name = "harrier.toml"
    )
)]
pub struct SshConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `sshpass` executable used for password logins.
    #[ortho_config(default = "sshpass".to_owned())]
    pub sshpass_bin: String,
    /// Default remote user.
    #[ortho_config(default = CORE_USER.to_owned())]
    pub ssh_user: String,
    /// Whether to force batch mode for key logins to avoid password prompts.
    #[ortho_config(default = true)]
    pub ssh_batch_mode: bool,
    /// Whether to enforce host key checking. Test machines are short-lived, so
    /// this defaults to off.
    #[ortho_config(default = false)]
    pub ssh_strict_host_key_checking: bool,
    /// Known hosts file override; defaults to `/dev/null`.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub ssh_known_hosts_file: String,
    /// Private key used for key logins. Supports `~/` expansion. When unset,
    /// the client falls back to its default identities and agent.
    pub ssh_identity_file: Option<String>,
    /// Seconds the client waits for a TCP connection.
    #[ortho_config(default = DEFAULT_CONNECT_TIMEOUT_SECS)]
    pub connect_timeout_secs: u64,
    /// Port used when the backend does not report one.
    #[ortho_config(default = crate::backend::DEFAULT_SSH_PORT)]
    pub port: u16,
}

impl SshConfig {
    /// Ensures required values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidConfig`] naming the first empty field.
    pub fn validate(&self) -> Result<(), RemoteError> {
        Self::require_value(&self.ssh_bin, "ssh_bin")?;
        Self::require_value(&self.sshpass_bin, "sshpass_bin")?;
        Self::require_value(&self.ssh_user, "ssh_user")?;
        Self::require_optional_value(self.ssh_identity_file.as_deref(), "ssh_identity_file")?;
        if self.connect_timeout_secs == 0 {
            return Err(RemoteError::InvalidConfig {
                field: String::from("connect_timeout_secs"),
            });
        }
        Ok(())
    }

    /// Loads configuration from defaults, configuration files and environment
    /// variables without parsing command-line arguments.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::ConfigLoad`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, RemoteError> {
        Self::load_from_iter([std::ffi::OsString::from("harrier")]).map_err(|err| {
            RemoteError::ConfigLoad {
                message: err.to_string(),
            }
        })
    }

    fn require_optional_value(value: Option<&str>, field: &str) -> Result<(), RemoteError> {
        match value {
            Some(v) if v.trim().is_empty() => Err(RemoteError::InvalidConfig {
                field: field.to_owned(),
            }),
            _ => Ok(()),
        }
    }

    fn require_value(value: &str, field: &str) -> Result<(), RemoteError> {
        Self::require_optional_value(Some(value), field)
    }
}

/// Errors surfaced while running commands on machines.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RemoteError {
    /// Raised when configuration is missing required values.
    #[error("missing {field}: set HARRIER_SSH_{env_suffix} or add {field} to harrier.toml", env_suffix = field.to_uppercase())]
    InvalidConfig {
        /// Configuration field that failed validation.
        field: String,
    },
    /// Raised when layered configuration cannot be merged.
    #[error("ssh configuration parsing failed: {message}")]
    ConfigLoad {
        /// Loader diagnostic.
        message: String,
    },
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the blocking worker running a command is lost.
    #[error("remote command worker failed: {message}")]
    Worker {
        /// Join error description.
        message: String,
    },
    /// Raised when the target has no address to connect to.
    #[error("machine {machine} has no public address")]
    NoAddress {
        /// Machine that could not be reached.
        machine: String,
    },
}

//! Remote command execution on provisioned machines.
//!
//! [`SshExecutor`] shells out to the system `ssh` client. Password logins go
//! through `sshpass -e`, which reads the password from `SSHPASS` so it never
//! appears on a command line.

use std::ffi::OsString;
use std::fmt;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;

mod config;
mod types;
mod util;

pub use config::{DEFAULT_CONNECT_TIMEOUT_SECS, RemoteError, SshConfig};
pub use types::{CommandOutput, CommandRunner, ProcessCommandRunner, RemoteCommandOutput};
pub use util::expand_tilde;

const SSHPASS_ENV: &str = "SSHPASS";

/// Future returned by remote executors.
pub type RemoteFuture<'a> =
    Pin<Box<dyn Future<Output = Result<RemoteCommandOutput, RemoteError>> + Send + 'a>>;

/// Network endpoint of a machine's SSH daemon.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SshTarget {
    /// Address to connect to.
    pub host: IpAddr,
    /// TCP port.
    pub port: u16,
}

/// Login used for a remote command.
#[derive(Clone, Eq, PartialEq)]
pub struct SshCredentials {
    /// Remote user.
    pub user: String,
    /// Password for password logins; `None` uses key authentication.
    pub password: Option<String>,
}

impl SshCredentials {
    /// Key-based login as `user`.
    #[must_use]
    pub fn key(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: None,
        }
    }

    /// Password login as `user`.
    #[must_use]
    pub fn password(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: Some(password.into()),
        }
    }
}

impl fmt::Debug for SshCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshCredentials")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Runs commands on machines.
pub trait RemoteExecutor: Send + Sync {
    /// Runs `command` on `target` and reports its exit code and output.
    /// A non-zero exit is not an error at this layer.
    fn run<'a>(
        &'a self,
        target: SshTarget,
        credentials: &'a SshCredentials,
        command: &'a str,
    ) -> RemoteFuture<'a>;
}

impl<X: RemoteExecutor + ?Sized> RemoteExecutor for Arc<X> {
    fn run<'a>(
        &'a self,
        target: SshTarget,
        credentials: &'a SshCredentials,
        command: &'a str,
    ) -> RemoteFuture<'a> {
        (**self).run(target, credentials, command)
    }
}

/// Executes commands through the system SSH client.
#[derive(Clone, Debug)]
pub struct SshExecutor<R: CommandRunner> {
    config: SshConfig,
    runner: R,
}

impl SshExecutor<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidConfig`] when validation fails.
    pub fn with_process_runner(config: SshConfig) -> Result<Self, RemoteError> {
        Self::new(config, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> SshExecutor<R> {
    /// Creates an executor using the provided runner and configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidConfig`] when configuration validation
    /// fails.
    pub fn new(config: SshConfig, runner: R) -> Result<Self, RemoteError> {
        config.validate()?;
        Ok(Self { config, runner })
    }

    /// Returns the configuration in use.
    #[must_use]
    pub const fn config(&self) -> &SshConfig {
        &self.config
    }

    /// Runs `command` synchronously.
    ///
    /// # Errors
    ///
    /// Propagates spawn failures from the configured [`CommandRunner`].
    ///
    /// # Security
    ///
    /// `command` is passed verbatim to the remote shell; callers must quote
    /// untrusted input.
    pub fn run_blocking(
        &self,
        target: SshTarget,
        credentials: &SshCredentials,
        command: &str,
    ) -> Result<RemoteCommandOutput, RemoteError> {
        let output = match credentials.password.as_deref() {
            None => {
                let args = self.build_ssh_args(target, credentials, command);
                self.runner.run(&self.config.ssh_bin, &args)?
            }
            Some(password) => {
                let mut args = vec![OsString::from("-e"), OsString::from(&self.config.ssh_bin)];
                args.extend(self.build_ssh_args(target, credentials, command));
                let env = [(SSHPASS_ENV.to_owned(), password.to_owned())];
                self.runner
                    .run_with_env(&self.config.sshpass_bin, &args, &env)?
            }
        };
        Ok(output.into())
    }

    fn build_ssh_args(
        &self,
        target: SshTarget,
        credentials: &SshCredentials,
        command: &str,
    ) -> Vec<OsString> {
        let mut args = self.common_ssh_options(target.port, credentials.password.is_some());
        args.push(OsString::from(format!("{}@{}", credentials.user, target.host)));
        args.push(OsString::from(command));
        args
    }

    fn common_ssh_options(&self, port: u16, password_login: bool) -> Vec<OsString> {
        let mut args = vec![OsString::from("-p"), OsString::from(port.to_string())];
        let mut option = |value: String| {
            args.push(OsString::from("-o"));
            args.push(OsString::from(value));
        };

        option(format!("ConnectTimeout={}", self.config.connect_timeout_secs));
        if password_login {
            option(String::from("PubkeyAuthentication=no"));
        } else if self.config.ssh_batch_mode {
            option(String::from("BatchMode=yes"));
        }
        if !self.config.ssh_strict_host_key_checking {
            option(String::from("StrictHostKeyChecking=no"));
        }
        if !self.config.ssh_known_hosts_file.trim().is_empty() {
            option(format!(
                "UserKnownHostsFile={}",
                self.config.ssh_known_hosts_file
            ));
        }

        if !password_login && let Some(ref identity_file) = self.config.ssh_identity_file {
            args.push(OsString::from("-i"));
            args.push(OsString::from(expand_tilde(identity_file)));
        }
        args
    }
}

impl<R> RemoteExecutor for SshExecutor<R>
where
    R: CommandRunner + Clone + Send + Sync + 'static,
{
    fn run<'a>(
        &'a self,
        target: SshTarget,
        credentials: &'a SshCredentials,
        command: &'a str,
    ) -> RemoteFuture<'a> {
        let executor = self.clone();
        let credentials = credentials.clone();
        let command = command.to_owned();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                executor.run_blocking(target, &credentials, &command)
            })
            .await
            .map_err(|err| RemoteError::Worker {
                message: err.to_string(),
            })?
        })
    }
}

#[cfg(test)]
mod tests;

//! Runtime settings shared by every provisioning session of a cluster.

use std::time::Duration;

use camino::Utf8PathBuf;
use tracing::Span;

use crate::conf::{AuthorizedKey, Platform};
use crate::config::{ConfigError, HarnessConfig};
use crate::remote::{SshConfig, SshCredentials};

/// Provisioning attempts per machine unless configured otherwise.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Time allowed for a machine to accept remote commands.
pub const DEFAULT_BOOT_TIMEOUT: Duration = Duration::from_secs(300);
/// Delay between readiness checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Explicit context passed to clusters in place of process-wide settings.
#[derive(Clone, Debug)]
pub struct RuntimeContext {
    /// Directory receiving console, journal and user-data files.
    pub output_dir: Utf8PathBuf,
    /// Platform hint used when rendering user data.
    pub platform: Platform,
    /// Provisioning attempts per machine; zero is treated as one.
    pub max_attempts: u32,
    /// Upper bound on the readiness wait of one attempt.
    pub boot_timeout: Duration,
    /// Delay between readiness checks.
    pub poll_interval: Duration,
    /// Keys injected into every machine's user data.
    pub ssh_keys: Vec<AuthorizedKey>,
    /// Login used for remote commands.
    pub credentials: SshCredentials,
    /// Parent span for provisioning and teardown logs.
    pub span: Span,
}

impl RuntimeContext {
    /// Creates a context writing into `output_dir` with default settings and
    /// key-based login as `core`.
    #[must_use]
    pub fn new(output_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            platform: Platform::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            boot_timeout: DEFAULT_BOOT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            ssh_keys: Vec::new(),
            credentials: SshCredentials::key(crate::conf::ignition::CORE_USER),
            span: Span::none(),
        }
    }

    /// Builds a context from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails, the platform is unknown
    /// or a public key line cannot be parsed.
    pub fn from_config(harness: &HarnessConfig, ssh: &SshConfig) -> Result<Self, ConfigError> {
        harness.validate()?;
        let platform = harness
            .platform
            .parse::<Platform>()
            .map_err(|err| ConfigError::InvalidValue(format!("{err}: set HARRIER_PLATFORM")))?;
        let ssh_keys = harness
            .ssh_public_keys
            .iter()
            .map(|line| {
                line.parse::<AuthorizedKey>().map_err(|err| {
                    ConfigError::InvalidValue(format!("{err}: check HARRIER_SSH_PUBLIC_KEYS"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(harness.output_dir.as_str())
            .with_platform(platform)
            .with_max_attempts(harness.max_attempts)
            .with_boot_timeout(Duration::from_secs(harness.boot_timeout_secs))
            .with_poll_interval(Duration::from_secs(harness.poll_interval_secs))
            .with_ssh_keys(ssh_keys)
            .with_credentials(SshCredentials::key(ssh.ssh_user.as_str())))
    }

    /// Sets the platform hint.
    #[must_use]
    pub const fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Sets the attempt bound.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the readiness timeout.
    #[must_use]
    pub const fn with_boot_timeout(mut self, boot_timeout: Duration) -> Self {
        self.boot_timeout = boot_timeout;
        self
    }

    /// Sets the readiness poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Replaces the injected keys.
    #[must_use]
    pub fn with_ssh_keys(mut self, keys: impl IntoIterator<Item = AuthorizedKey>) -> Self {
        self.ssh_keys = keys.into_iter().collect();
        self
    }

    /// Replaces the login used for remote commands.
    #[must_use]
    pub fn with_credentials(mut self, credentials: SshCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Sets the parent span.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Attempt bound with zero promoted to one.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

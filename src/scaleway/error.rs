//! Failures reported by the Scaleway backend.

use crate::config::ConfigError;
use scaleway_rs::ScalewayError;
use thiserror::Error;

/// Errors raised by the Scaleway backend.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScalewayBackendError {
    /// Credentials or defaults are missing from the configuration.
    #[error("scaleway configuration: {0}")]
    Config(String),
    /// The rendered boot configuration cannot be sent as cloud-init data.
    #[error("user data rejected: {0}")]
    InvalidUserData(String),
    /// No public image matches the configured label and architecture.
    #[error("no {arch} image labelled '{label}' in zone {zone}")]
    ImageNotFound {
        /// Configured image label.
        label: String,
        /// Configured architecture.
        arch: String,
        /// Zone searched.
        zone: String,
    },
    /// The commercial type is not offered in the zone.
    #[error("instance type '{instance_type}' is not offered in zone {zone}")]
    InstanceTypeUnavailable {
        /// Configured commercial type.
        instance_type: String,
        /// Zone targeted by the create call.
        zone: String,
    },
    /// The server did not reach the running state in time.
    #[error("server {server_id} was not running before the wait timed out")]
    AddressTimeout {
        /// Scaleway server id.
        server_id: String,
    },
    /// The server is running without a routable address.
    #[error("server {server_id} is running without a public address")]
    NoPublicAddress {
        /// Scaleway server id.
        server_id: String,
    },
    /// The server was still listed after teardown.
    #[error("server {server_id} is still listed after teardown")]
    StillPresent {
        /// Scaleway server id.
        server_id: String,
    },
    /// The server's allowed actions do not include `poweron`.
    #[error("server {server_id} cannot be powered on from state {state}")]
    CannotPowerOn {
        /// Scaleway server id.
        server_id: String,
        /// State reported by the API.
        state: String,
    },
    /// The API or the HTTP client failed.
    #[error("scaleway api{}: {message}", http_suffix(.status.as_ref()))]
    Api {
        /// HTTP status, when the API answered.
        status: Option<u16>,
        /// Error text from the API or the client.
        message: String,
    },
}

fn http_suffix(status: Option<&u16>) -> String {
    status.map(|code| format!(" (HTTP {code})")).unwrap_or_default()
}

impl ScalewayBackendError {
    pub(crate) fn api(err: impl std::fmt::Display) -> Self {
        Self::Api {
            status: None,
            message: err.to_string(),
        }
    }

    pub(crate) fn http(status: reqwest::StatusCode, body: &[u8]) -> Self {
        Self::Api {
            status: Some(status.as_u16()),
            message: String::from_utf8_lossy(body).into_owned(),
        }
    }
}

impl From<ScalewayError> for ScalewayBackendError {
    fn from(value: ScalewayError) -> Self {
        Self::api(value)
    }
}

impl From<ConfigError> for ScalewayBackendError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}

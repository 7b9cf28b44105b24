//! Server lifecycle helpers for the Scaleway backend.

use std::net::IpAddr;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use serde::Deserialize;

mod create;
mod image;
mod servers;
mod wait;

use crate::backend::MachineAddresses;
use crate::config::ScalewayConfig;
use crate::scaleway::types::{Action, InstanceId, InstanceState};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const SCALEWAY_INSTANCE_API_BASE: &str = "https://api.scaleway.com/instance/v1";

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Server placement and image selection derived from configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ServerSpec {
    pub(crate) image_label: String,
    pub(crate) instance_type: String,
    pub(crate) zone: String,
    pub(crate) project_id: String,
    pub(crate) organisation_id: Option<String>,
    pub(crate) architecture: String,
}

impl From<&ScalewayConfig> for ServerSpec {
    fn from(config: &ScalewayConfig) -> Self {
        Self {
            image_label: config.default_image.clone(),
            instance_type: config.default_instance_type.clone(),
            zone: config.default_zone.clone(),
            project_id: config.default_project_id.clone(),
            organisation_id: config.default_organization_id.clone(),
            architecture: config.default_architecture.clone(),
        }
    }
}

/// Server fields as returned by the Instances API.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct ServerRecord {
    id: String,
    name: String,
    state: String,
    #[serde(default)]
    allowed_actions: Vec<String>,
    #[serde(default)]
    public_ip: Option<AddressRecord>,
    #[serde(default)]
    public_ips: Vec<AddressRecord>,
    #[serde(default)]
    private_ip: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
struct AddressRecord {
    address: String,
}

/// Point-in-time view of a server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct InstanceSnapshot {
    pub(crate) id: InstanceId,
    pub(crate) name: String,
    pub(crate) state: InstanceState,
    pub(crate) allowed_actions: Vec<Action>,
    pub(crate) public_ip: Option<IpAddr>,
    pub(crate) private_ip: Option<IpAddr>,
}

impl From<ServerRecord> for InstanceSnapshot {
    fn from(record: ServerRecord) -> Self {
        let parse = |address: &str| IpAddr::from_str(address).ok();
        let public_ip = record
            .public_ip
            .iter()
            .chain(record.public_ips.iter())
            .find_map(|ip| parse(&ip.address));
        Self {
            id: record.id.into(),
            name: record.name,
            state: record.state.into(),
            allowed_actions: record.allowed_actions.into_iter().map(Action::from).collect(),
            public_ip,
            private_ip: record.private_ip.as_deref().and_then(parse),
        }
    }
}

impl InstanceSnapshot {
    /// Addresses in backend terms. Servers on routed IPs have no private
    /// address, so the public one stands in for it.
    pub(crate) fn addresses(&self, ssh_port: u16) -> MachineAddresses {
        MachineAddresses {
            public: self.public_ip,
            private: self.private_ip.or(self.public_ip),
            ssh_port,
        }
    }

    pub(crate) fn allows(&self, action: &str) -> bool {
        self.allowed_actions
            .iter()
            .any(|allowed| allowed.as_str() == action)
    }
}

#[cfg(test)]
mod tests;

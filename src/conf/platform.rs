//! Platform hints used when transpiling Container Linux Configs.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Dynamic values a Container Linux Config may reference.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DynamicValue {
    /// `{HOSTNAME}`
    Hostname,
    /// `{PRIVATE_IPV4}`
    PrivateIpv4,
    /// `{PUBLIC_IPV4}`
    PublicIpv4,
}

impl DynamicValue {
    /// All dynamic values in substitution order.
    pub const ALL: [Self; 3] = [Self::Hostname, Self::PrivateIpv4, Self::PublicIpv4];

    /// Placeholder token as written in a config.
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::Hostname => "{HOSTNAME}",
            Self::PrivateIpv4 => "{PRIVATE_IPV4}",
            Self::PublicIpv4 => "{PUBLIC_IPV4}",
        }
    }
}

/// Platform the transpiled config is rendered for.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Platform {
    /// No platform hint; dynamic data is rejected.
    #[default]
    Unspecified,
    /// Microsoft Azure.
    Azure,
    /// CloudStack config drive.
    CloudstackConfigdrive,
    /// User-provided metadata agent.
    Custom,
    /// DigitalOcean.
    DigitalOcean,
    /// Amazon EC2.
    Ec2,
    /// Google Compute Engine.
    Gce,
    /// OpenStack metadata service.
    OpenstackMetadata,
    /// Equinix Metal (formerly Packet).
    Packet,
    /// Vagrant with VirtualBox.
    VagrantVirtualbox,
}

impl Platform {
    /// Canonical platform name understood by the metadata agent.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unspecified => "",
            Self::Azure => "azure",
            Self::CloudstackConfigdrive => "cloudstack-configdrive",
            Self::Custom => "custom",
            Self::DigitalOcean => "digitalocean",
            Self::Ec2 => "ec2",
            Self::Gce => "gce",
            Self::OpenstackMetadata => "openstack-metadata",
            Self::Packet => "packet",
            Self::VagrantVirtualbox => "vagrant-virtualbox",
        }
    }

    /// Metadata environment variable providing `value`, if the platform has one.
    #[must_use]
    pub const fn metadata_variable(self, value: DynamicValue) -> Option<&'static str> {
        use DynamicValue::{Hostname, PrivateIpv4, PublicIpv4};
        match (self, value) {
            (Self::Azure, PrivateIpv4) => Some("COREOS_AZURE_IPV4_DYNAMIC"),
            (Self::Azure, PublicIpv4) => Some("COREOS_AZURE_IPV4_VIRTUAL"),
            (Self::CloudstackConfigdrive, Hostname) => {
                Some("COREOS_CLOUDSTACK_CONFIGDRIVE_LOCAL_HOSTNAME")
            }
            (Self::CloudstackConfigdrive, PrivateIpv4) => {
                Some("COREOS_CLOUDSTACK_CONFIGDRIVE_LOCAL_IPV4")
            }
            (Self::CloudstackConfigdrive, PublicIpv4) => {
                Some("COREOS_CLOUDSTACK_CONFIGDRIVE_PUBLIC_IPV4")
            }
            (Self::Custom, Hostname) => Some("COREOS_CUSTOM_HOSTNAME"),
            (Self::Custom, PrivateIpv4) => Some("COREOS_CUSTOM_PRIVATE_IPV4"),
            (Self::Custom, PublicIpv4) => Some("COREOS_CUSTOM_PUBLIC_IPV4"),
            (Self::DigitalOcean, Hostname) => Some("COREOS_DIGITALOCEAN_HOSTNAME"),
            (Self::DigitalOcean, PrivateIpv4) => Some("COREOS_DIGITALOCEAN_IPV4_PRIVATE_0"),
            (Self::DigitalOcean, PublicIpv4) => Some("COREOS_DIGITALOCEAN_IPV4_PUBLIC_0"),
            (Self::Ec2, Hostname) => Some("COREOS_EC2_HOSTNAME"),
            (Self::Ec2, PrivateIpv4) => Some("COREOS_EC2_IPV4_LOCAL"),
            (Self::Ec2, PublicIpv4) => Some("COREOS_EC2_IPV4_PUBLIC"),
            (Self::Gce, Hostname) => Some("COREOS_GCE_HOSTNAME"),
            (Self::Gce, PrivateIpv4) => Some("COREOS_GCE_IP_LOCAL_0"),
            (Self::Gce, PublicIpv4) => Some("COREOS_GCE_IP_EXTERNAL_0"),
            (Self::OpenstackMetadata, Hostname) => Some("COREOS_OPENSTACK_HOSTNAME"),
            (Self::OpenstackMetadata, PrivateIpv4) => Some("COREOS_OPENSTACK_IPV4_LOCAL"),
            (Self::OpenstackMetadata, PublicIpv4) => Some("COREOS_OPENSTACK_IPV4_PUBLIC"),
            (Self::Packet, Hostname) => Some("COREOS_PACKET_HOSTNAME"),
            (Self::Packet, PrivateIpv4) => Some("COREOS_PACKET_IPV4_PRIVATE_0"),
            (Self::Packet, PublicIpv4) => Some("COREOS_PACKET_IPV4_PUBLIC_0"),
            (Self::VagrantVirtualbox, Hostname) => Some("COREOS_VAGRANT_VIRTUALBOX_HOSTNAME"),
            (Self::VagrantVirtualbox, PrivateIpv4) => {
                Some("COREOS_VAGRANT_VIRTUALBOX_PRIVATE_IPV4")
            }
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a platform name is not recognised.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unknown platform `{0}`")]
pub struct UnknownPlatformError(pub String);

impl FromStr for Platform {
    type Err = UnknownPlatformError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let platform = match value.trim() {
            "" | "qemu" | "scaleway" => Self::Unspecified,
            "azure" => Self::Azure,
            "cloudstack-configdrive" => Self::CloudstackConfigdrive,
            "custom" => Self::Custom,
            "digitalocean" | "do" => Self::DigitalOcean,
            "ec2" | "aws" => Self::Ec2,
            "gce" => Self::Gce,
            "openstack-metadata" | "openstack" => Self::OpenstackMetadata,
            "packet" | "equinixmetal" => Self::Packet,
            "vagrant-virtualbox" => Self::VagrantVirtualbox,
            other => return Err(UnknownPlatformError(other.to_owned())),
        };
        Ok(platform)
    }
}

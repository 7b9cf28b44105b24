//! Backend abstraction for provisioning disposable test machines.

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

use crate::console::ConsoleSink;

/// Default SSH port reported by backends that do not remap it.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Parameters for creating one machine.
#[derive(Clone, Debug)]
pub struct CreateRequest {
    /// Unique machine name chosen by the cluster.
    pub name: String,
    /// Serialized boot configuration handed to the machine.
    pub user_data: Vec<u8>,
    /// Console sink the backend may stream serial output into. `None` when the
    /// backend does not capture consoles.
    pub console: Option<ConsoleSink>,
}

/// Network addresses of a machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MachineAddresses {
    /// Address reachable from the harness.
    pub public: Option<IpAddr>,
    /// Address reachable from other machines in the cluster.
    pub private: Option<IpAddr>,
    /// TCP port for SSH.
    pub ssh_port: u16,
}

impl Default for MachineAddresses {
    fn default() -> Self {
        Self {
            public: None,
            private: None,
            ssh_port: DEFAULT_SSH_PORT,
        }
    }
}

/// A machine created by a backend.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Device {
    /// Provider identifier, used as the machine id.
    pub id: String,
    /// Name passed in [`CreateRequest::name`].
    pub name: String,
    /// Addresses known so far; may be incomplete straight after creation.
    pub addresses: MachineAddresses,
}

/// Future returned by backend operations.
pub type BackendFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Interface implemented by compute providers.
pub trait Backend: Send + Sync {
    /// Provider specific error type returned by the backend.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Creates a machine booting with `request.user_data`.
    fn create(&self, request: CreateRequest) -> BackendFuture<'_, Device, Self::Error>;

    /// Fills in addresses a provider only reports after creation. The default
    /// returns the device unchanged.
    fn resolve_addresses(&self, device: Device) -> BackendFuture<'_, Device, Self::Error> {
        Box::pin(async move { Ok(device) })
    }

    /// Destroys a machine. Destroying a machine that no longer exists
    /// succeeds.
    fn destroy<'a>(&'a self, device: &'a Device) -> BackendFuture<'a, (), Self::Error>;

    /// Destroys whatever machine carries `name`. Used to clean up after a
    /// create call that failed without returning a device.
    fn destroy_by_name<'a>(&'a self, name: &'a str) -> BackendFuture<'a, (), Self::Error>;

    /// Releases session-level resources once every machine is gone.
    fn release(&self) -> BackendFuture<'_, (), Self::Error> {
        Box::pin(async { Ok(()) })
    }

    /// Returns `true` when the backend writes serial output to
    /// [`CreateRequest::console`].
    fn supports_console(&self) -> bool {
        false
    }

    /// Literal replacements applied to raw user data before rendering, such
    /// as provider metadata variables for address placeholders.
    fn user_data_substitutions(&self) -> &[(&'static str, &'static str)] {
        &[]
    }
}

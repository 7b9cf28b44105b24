//! Scaleway backend implementation of the machine lifecycle.

mod error;
mod lifecycle;
mod types;

use std::time::Duration;

use tracing::{debug, info};

use crate::backend::{Backend, BackendFuture, CreateRequest, DEFAULT_SSH_PORT, Device};
use crate::config::ScalewayConfig;
use lifecycle::ServerSpec;
use scaleway_rs::ScalewayApi;
use types::Zone;

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const WAIT_TIMEOUT: Duration = Duration::from_secs(300);

pub use error::ScalewayBackendError;

/// Backend that provisions machines through the Scaleway Instances API.
///
/// User data is passed as the server's cloud-init payload. Serial console
/// capture is not available.
#[derive(Clone)]
pub struct ScalewayBackend {
    api: ScalewayApi,
    config: ScalewayConfig,
    ssh_port: u16,
    poll_interval: Duration,
    wait_timeout: Duration,
}

impl std::fmt::Debug for ScalewayBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScalewayBackend")
            .field("zone", &self.config.default_zone)
            .field("instance_type", &self.config.default_instance_type)
            .field("image", &self.config.default_image)
            .finish_non_exhaustive()
    }
}

impl ScalewayBackend {
    /// Constructs a new backend from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayBackendError::Config`] when the provided configuration
    /// fails validation.
    pub fn new(config: ScalewayConfig) -> Result<Self, ScalewayBackendError> {
        config.validate()?;
        Ok(Self {
            api: ScalewayApi::new(&config.secret_key),
            config,
            ssh_port: DEFAULT_SSH_PORT,
            poll_interval: POLL_INTERVAL,
            wait_timeout: WAIT_TIMEOUT,
        })
    }

    fn zone(&self) -> Zone {
        Zone::from(self.config.default_zone.as_str())
    }
}

impl Backend for ScalewayBackend {
    type Error = ScalewayBackendError;

    fn create(&self, request: CreateRequest) -> BackendFuture<'_, Device, Self::Error> {
        Box::pin(async move {
            let spec = ServerSpec::from(&self.config);
            let user_data = std::str::from_utf8(&request.user_data).map_err(|err| {
                ScalewayBackendError::InvalidUserData(format!("user data is not UTF-8: {err}"))
            })?;
            let cloud_init = (!user_data.is_empty()).then_some(user_data);
            let image_id = self.resolve_image_id(&spec).await?;

            let server = self
                .create_server_stopped(&spec, &image_id, &request.name, cloud_init)
                .await?;
            info!(id = %server.id, name = %request.name, "created scaleway server");
            self.power_on_if_needed(&self.zone(), &server).await?;

            Ok(Device {
                id: server.id.as_str().to_owned(),
                name: request.name,
                addresses: server.addresses(self.ssh_port),
            })
        })
    }

    fn resolve_addresses(&self, device: Device) -> BackendFuture<'_, Device, Self::Error> {
        Box::pin(async move {
            let addresses = self.wait_for_addresses(&self.zone(), &device.id).await?;
            Ok(Device {
                addresses,
                ..device
            })
        })
    }

    fn destroy<'a>(&'a self, device: &'a Device) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let zone = self.zone();
            let Some(server) = self.fetch_server(&zone, &device.id).await? else {
                debug!(id = %device.id, "server already gone");
                return Ok(());
            };
            self.remove_server(&zone, &server).await?;
            self.wait_until_gone(&zone, &device.id).await
        })
    }

    fn destroy_by_name<'a>(&'a self, name: &'a str) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let zone = self.zone();
            for server in self.servers_named(&zone, name).await? {
                self.remove_server(&zone, &server).await?;
                self.wait_until_gone(&zone, server.id.as_str()).await?;
            }
            Ok(())
        })
    }
}

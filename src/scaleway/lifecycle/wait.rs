//! Readiness and teardown wait helpers for the Scaleway backend.

use std::future::Future;
use std::time::Instant;

use tokio::time::sleep;

use crate::backend::MachineAddresses;
use crate::scaleway::types::Zone;

use super::super::{ScalewayBackend, ScalewayBackendError};
use super::InstanceSnapshot;

impl ScalewayBackend {
    pub(in crate::scaleway) async fn wait_for_addresses(
        &self,
        zone: &Zone,
        id: &str,
    ) -> Result<MachineAddresses, ScalewayBackendError> {
        self.wait_for_addresses_with(id, || self.fetch_server(zone, id))
            .await
    }

    /// Polls until the server is running with a public address.
    pub(in crate::scaleway) async fn wait_for_addresses_with<F, Fut>(
        &self,
        id: &str,
        mut fetch: F,
    ) -> Result<MachineAddresses, ScalewayBackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<InstanceSnapshot>, ScalewayBackendError>>,
    {
        let deadline = Instant::now() + self.wait_timeout;
        let mut saw_running = false;

        while Instant::now() <= deadline {
            let Some(server) = fetch().await? else {
                sleep(self.poll_interval).await;
                continue;
            };

            if !server.state.is_running() {
                sleep(self.poll_interval).await;
                continue;
            }

            saw_running = true;

            if server.public_ip.is_some() {
                return Ok(server.addresses(self.ssh_port));
            }

            sleep(self.poll_interval).await;
        }

        if saw_running {
            return Err(ScalewayBackendError::NoPublicAddress {
                server_id: id.to_owned(),
            });
        }

        Err(ScalewayBackendError::AddressTimeout {
            server_id: id.to_owned(),
        })
    }

    pub(in crate::scaleway) async fn wait_until_gone(
        &self,
        zone: &Zone,
        id: &str,
    ) -> Result<(), ScalewayBackendError> {
        self.wait_until_gone_with(id, || self.fetch_server(zone, id))
            .await
    }

    /// Polls until the server disappears from the API.
    pub(in crate::scaleway) async fn wait_until_gone_with<F, Fut>(
        &self,
        id: &str,
        mut fetch: F,
    ) -> Result<(), ScalewayBackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<InstanceSnapshot>, ScalewayBackendError>>,
    {
        let deadline = Instant::now() + self.wait_timeout;
        while Instant::now() <= deadline {
            if fetch().await?.is_none() {
                return Ok(());
            }
            sleep(self.poll_interval).await;
        }

        Err(ScalewayBackendError::StillPresent {
            server_id: id.to_owned(),
        })
    }
}

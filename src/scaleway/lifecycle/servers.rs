//! Server lookup and removal against the Instances API.

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::scaleway::types::Zone;

use super::super::{ScalewayBackend, ScalewayBackendError};
use super::{HTTP_CLIENT, InstanceSnapshot, SCALEWAY_INSTANCE_API_BASE, ServerRecord};

#[derive(Deserialize)]
struct ServerEnvelope {
    server: ServerRecord,
}

#[derive(Deserialize)]
struct ServerList {
    #[serde(default)]
    servers: Vec<ServerRecord>,
}

impl ScalewayBackend {
    /// GETs `url`, mapping `404 Not Found` to `None`.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>, ScalewayBackendError> {
        let response = HTTP_CLIENT
            .get(url)
            .header("X-Auth-Token", &self.config.secret_key)
            .query(query)
            .send()
            .await
            .map_err(ScalewayBackendError::api)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response
            .bytes()
            .await
            .map_err(ScalewayBackendError::api)?;
        if !status.is_success() {
            return Err(ScalewayBackendError::http(status, &body));
        }
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(ScalewayBackendError::api)
    }

    pub(in crate::scaleway) async fn fetch_server(
        &self,
        zone: &Zone,
        id: &str,
    ) -> Result<Option<InstanceSnapshot>, ScalewayBackendError> {
        let url = format!("{SCALEWAY_INSTANCE_API_BASE}/zones/{}/servers/{id}", zone.as_str());
        let envelope: Option<ServerEnvelope> = self.get_json(&url, &[]).await?;
        Ok(envelope.map(|found| found.server.into()))
    }

    /// Servers whose name is exactly `name`. The API filter matches
    /// substrings, so results are narrowed locally.
    pub(in crate::scaleway) async fn servers_named(
        &self,
        zone: &Zone,
        name: &str,
    ) -> Result<Vec<InstanceSnapshot>, ScalewayBackendError> {
        let url = format!("{SCALEWAY_INSTANCE_API_BASE}/zones/{}/servers", zone.as_str());
        let list: Option<ServerList> = self.get_json(&url, &[("name", name)]).await?;
        Ok(list
            .map(|found| found.servers)
            .unwrap_or_default()
            .into_iter()
            .map(InstanceSnapshot::from)
            .filter(|server| server.name == name)
            .collect())
    }

    /// Terminates a running server together with its volumes, or deletes a
    /// server that never started.
    pub(in crate::scaleway) async fn remove_server(
        &self,
        zone: &Zone,
        snapshot: &InstanceSnapshot,
    ) -> Result<(), ScalewayBackendError> {
        if snapshot.allows("terminate") {
            self.api
                .perform_instance_action_async(zone.as_str(), snapshot.id.as_str(), "terminate")
                .await?;
        } else {
            self.api
                .delete_instance_async(zone.as_str(), snapshot.id.as_str())
                .await?;
        }
        Ok(())
    }
}

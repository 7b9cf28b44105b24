//! Server creation helpers for the Scaleway backend.
//!
//! Scaleway servers must receive cloud-init user-data before first boot.
//! The creation request sets `stopped: true` so the payload is available when
//! the server is powered on.

use serde::{Deserialize, Serialize};

use crate::scaleway::types::Zone;

use super::super::{ScalewayBackend, ScalewayBackendError};
use super::{InstanceSnapshot, ServerRecord, ServerSpec};

/// Tag applied to every server created by the harness.
pub(crate) const HARNESS_TAG: &str = "harrier";

#[derive(Serialize)]
struct CreateServerRequest<'a> {
    name: &'a str,
    commercial_type: &'a str,
    image: &'a str,
    project: &'a str,
    routed_ip_enabled: bool,
    dynamic_ip_required: bool,
    tags: Vec<String>,
    stopped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    cloud_init: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization: Option<&'a str>,
}

#[derive(Deserialize)]
struct CreateServerResponse {
    server: ServerRecord,
}

impl ScalewayBackend {
    fn is_instance_type_error(api_err: &scaleway_rs::ScalewayApiError, spec: &ServerSpec) -> bool {
        matches!(api_err.resource.as_deref(), Some("commercial_type"))
            || api_err
                .resource_id
                .as_deref()
                .is_some_and(|id| id == spec.instance_type)
            || (api_err.etype == "invalid_arguments"
                && api_err
                    .message
                    .to_ascii_lowercase()
                    .contains("commercial_type"))
    }

    pub(in crate::scaleway) async fn power_on_if_needed(
        &self,
        zone: &Zone,
        snapshot: &InstanceSnapshot,
    ) -> Result<(), ScalewayBackendError> {
        if snapshot.state.is_running() {
            return Ok(());
        }

        if snapshot.allows("poweron") {
            self.api
                .perform_instance_action_async(zone.as_str(), snapshot.id.as_str(), "poweron")
                .await?;
            return Ok(());
        }

        Err(ScalewayBackendError::CannotPowerOn {
            server_id: snapshot.id.as_str().to_owned(),
            state: snapshot.state.as_str().to_owned(),
        })
    }

    /// Creates a stopped server named `name`, tagged with the harness tag and
    /// its own name so it can be found again if the caller loses track of it.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayBackendError`] when the Scaleway API request fails or
    /// the provider rejects the requested instance type or image.
    pub(in crate::scaleway) async fn create_server_stopped(
        &self,
        spec: &ServerSpec,
        image_id: &str,
        name: &str,
        cloud_init: Option<&str>,
    ) -> Result<InstanceSnapshot, ScalewayBackendError> {
        let url = format!(
            "{}/zones/{}/servers",
            super::SCALEWAY_INSTANCE_API_BASE,
            spec.zone
        );
        let payload = CreateServerRequest {
            name,
            commercial_type: &spec.instance_type,
            image: image_id,
            project: &spec.project_id,
            routed_ip_enabled: true,
            dynamic_ip_required: true,
            tags: vec![HARNESS_TAG.to_owned(), name.to_owned()],
            stopped: true,
            cloud_init,
            organization: spec.organisation_id.as_deref(),
        };

        let response = super::HTTP_CLIENT
            .post(&url)
            .header("X-Auth-Token", &self.config.secret_key)
            .json(&payload)
            .send()
            .await
            .map_err(ScalewayBackendError::api)?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(ScalewayBackendError::api)?;

        if status.is_success() {
            let parsed: CreateServerResponse =
                serde_json::from_slice(&body).map_err(ScalewayBackendError::api)?;
            return Ok(parsed.server.into());
        }

        if let Ok(api_err) = serde_json::from_slice::<scaleway_rs::ScalewayApiError>(&body)
            && Self::is_instance_type_error(&api_err, spec)
        {
            return Err(ScalewayBackendError::InstanceTypeUnavailable {
                instance_type: spec.instance_type.clone(),
                zone: spec.zone.clone(),
            });
        }

        Err(ScalewayBackendError::http(status, &body))
    }
}

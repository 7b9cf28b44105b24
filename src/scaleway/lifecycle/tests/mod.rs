//! Unit tests for Scaleway lifecycle helpers.

use std::collections::HashMap;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use scaleway_rs::{ScalewayApi, ScalewayImage};

use super::{InstanceSnapshot, ServerRecord, ServerSpec};
use crate::backend::DEFAULT_SSH_PORT;
use crate::config::ScalewayConfig;
use crate::scaleway::types::{Action, InstanceId, InstanceState, Zone};
use crate::scaleway::{ScalewayBackend, ScalewayBackendError};

fn ip(text: &str) -> IpAddr {
    IpAddr::from_str(text).unwrap_or_else(|err| panic!("parse {text}: {err}"))
}

fn snapshot(
    id: impl Into<InstanceId>,
    state: impl Into<InstanceState>,
    allowed: impl IntoIterator<Item = impl Into<Action>>,
    public_ip: Option<&str>,
) -> InstanceSnapshot {
    InstanceSnapshot {
        id: id.into(),
        name: String::from("harrier-test"),
        state: state.into(),
        allowed_actions: allowed.into_iter().map(Into::into).collect(),
        public_ip: public_ip.map(ip),
        private_ip: None,
    }
}

fn image(id: &str, arch: &str, state: &str, creation_date: &str) -> ScalewayImage {
    ScalewayImage {
        id: id.to_owned(),
        name: String::new(),
        arch: arch.to_owned(),
        creation_date: creation_date.to_owned(),
        modification_date: String::new(),
        from_server: None,
        organization: String::new(),
        public: true,
        state: state.to_owned(),
        project: String::new(),
        tags: vec![],
        zone: String::new(),
        root_volume: scaleway_rs::ScalewayImageRootVolume {
            id: String::new(),
            name: String::new(),
            size: 0,
            volume_type: String::new(),
        },
        default_bootscript: None,
        extra_volumes: scaleway_rs::ScalewayImageExtraVolumes {
            volumes: HashMap::new(),
        },
    }
}

fn dummy_config() -> ScalewayConfig {
    ScalewayConfig {
        access_key: None,
        secret_key: String::from("dummy"),
        default_organization_id: None,
        default_project_id: String::from("proj"),
        default_zone: String::from("zone"),
        default_instance_type: String::from("type"),
        default_image: String::from("label"),
        default_architecture: String::from("x86_64"),
    }
}

fn base_spec() -> ServerSpec {
    ServerSpec::from(&dummy_config())
}

fn backend_fixture() -> ScalewayBackend {
    ScalewayBackend {
        api: ScalewayApi::new("dummy"),
        config: dummy_config(),
        ssh_port: DEFAULT_SSH_PORT,
        poll_interval: Duration::from_millis(1),
        wait_timeout: Duration::from_millis(5),
    }
}

#[test]
fn spec_mirrors_configuration() {
    let spec = base_spec();
    assert_eq!(spec.image_label, "label");
    assert_eq!(spec.instance_type, "type");
    assert_eq!(spec.zone, "zone");
    assert_eq!(spec.project_id, "proj");
    assert_eq!(spec.architecture, "x86_64");
}

#[test]
fn server_record_prefers_legacy_public_ip_and_parses_private() {
    let record: ServerRecord = serde_json::from_str(
        r#"{
            "id": "srv-1",
            "name": "harrier-test",
            "state": "running",
            "allowed_actions": ["poweroff", "terminate"],
            "public_ip": {"address": "51.15.0.1"},
            "public_ips": [{"address": "51.15.0.2"}],
            "private_ip": "10.1.2.3",
            "unrelated": true
        }"#,
    )
    .expect("server record");

    let snap = InstanceSnapshot::from(record);
    assert_eq!(snap.public_ip, Some(ip("51.15.0.1")));
    assert_eq!(snap.private_ip, Some(ip("10.1.2.3")));
    assert!(snap.allows("terminate"));
    assert!(!snap.allows("poweron"));
}

#[test]
fn routed_server_uses_public_address_as_private() {
    let record: ServerRecord = serde_json::from_str(
        r#"{"id": "srv-2", "name": "n", "state": "running",
            "public_ip": null, "public_ips": [{"address": "51.15.0.9"}]}"#,
    )
    .expect("server record");

    let addresses = InstanceSnapshot::from(record).addresses(2222);
    assert_eq!(addresses.public, Some(ip("51.15.0.9")));
    assert_eq!(addresses.private, Some(ip("51.15.0.9")));
    assert_eq!(addresses.ssh_port, 2222);
}

#[tokio::test]
async fn power_on_if_needed_returns_ok_for_running() {
    let snap = snapshot("id", "running", [Action::from("poweron")], Some("1.1.1.1"));
    let zone = Zone::from("zone");
    let result = backend_fixture().power_on_if_needed(&zone, &snap).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn power_on_if_needed_errors_when_not_allowed() {
    let snap = snapshot("id", "stopped", Vec::<Action>::new(), None);
    let zone = Zone::from("zone");
    let result = backend_fixture().power_on_if_needed(&zone, &snap).await;
    assert!(matches!(
        result,
        Err(ScalewayBackendError::CannotPowerOn { .. })
    ));
}

mod wait;

//! Tests for Scaleway readiness and teardown wait loops.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::scaleway::types::Action;
use crate::scaleway::{ScalewayBackend, ScalewayBackendError};

use super::InstanceSnapshot;

/// Serves scripted snapshots in order, then repeats the last one.
struct Script {
    snapshots: Mutex<VecDeque<Option<InstanceSnapshot>>>,
    last: Mutex<Option<InstanceSnapshot>>,
}

impl Script {
    fn new(snapshots: impl IntoIterator<Item = Option<InstanceSnapshot>>) -> Self {
        Self {
            snapshots: Mutex::new(snapshots.into_iter().collect()),
            last: Mutex::new(None),
        }
    }

    fn next(&self) -> Option<InstanceSnapshot> {
        let mut queue = self.snapshots.lock().expect("script lock");
        let mut last = self.last.lock().expect("last lock");
        if let Some(next) = queue.pop_front() {
            last.clone_from(&next);
        }
        last.clone()
    }

    async fn fetch(&self) -> Result<Option<InstanceSnapshot>, ScalewayBackendError> {
        Ok(self.next())
    }
}

fn backend(wait_timeout: Duration) -> ScalewayBackend {
    ScalewayBackend {
        wait_timeout,
        ..super::backend_fixture()
    }
}

#[tokio::test]
async fn wait_for_addresses_returns_once_running_with_ip() {
    let script = Script::new([
        None,
        Some(super::snapshot("id", "starting", Vec::<Action>::new(), None)),
        Some(super::snapshot("id", "running", Vec::<Action>::new(), Some("51.15.0.3"))),
    ]);

    let addresses = backend(Duration::from_millis(200))
        .wait_for_addresses_with("id", || script.fetch())
        .await
        .expect("addresses");

    assert_eq!(addresses.public, Some(super::ip("51.15.0.3")));
    assert_eq!(addresses.private, addresses.public);
}

#[tokio::test]
async fn wait_for_addresses_reports_missing_ip() {
    let script = Script::new([Some(super::snapshot(
        "id",
        "running",
        Vec::<Action>::new(),
        None,
    ))]);

    let result = backend(Duration::from_millis(5))
        .wait_for_addresses_with("id", || script.fetch())
        .await;

    assert!(
        matches!(result, Err(ScalewayBackendError::NoPublicAddress { .. })),
        "unexpected wait_for_addresses outcome: {result:?}"
    );
}

#[tokio::test]
async fn wait_for_addresses_times_out_when_never_running() {
    let script = Script::new([Some(super::snapshot(
        "id",
        "stopped",
        Vec::<Action>::new(),
        None,
    ))]);

    let result = backend(Duration::from_millis(5))
        .wait_for_addresses_with("id", || script.fetch())
        .await;

    assert!(matches!(result, Err(ScalewayBackendError::AddressTimeout { .. })));
}

#[tokio::test]
async fn wait_until_gone_succeeds_after_disappearance() {
    let script = Script::new([
        Some(super::snapshot("id", "stopping", Vec::<Action>::new(), None)),
        None,
    ]);

    backend(Duration::from_millis(200))
        .wait_until_gone_with("id", || script.fetch())
        .await
        .expect("server gone");
}

#[tokio::test]
async fn wait_until_gone_times_out_on_residual() {
    let script = Script::new([Some(super::snapshot(
        "id",
        "running",
        Vec::<Action>::new(),
        None,
    ))]);

    let result = backend(Duration::from_millis(2))
        .wait_until_gone_with("id", || script.fetch())
        .await;

    assert!(matches!(
        result,
        Err(ScalewayBackendError::StillPresent { .. })
    ));
}

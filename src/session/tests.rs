//! Unit tests for the provisioning state machine.

use std::time::Duration;

use camino::Utf8Path;
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use rstest::{fixture, rstest};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::journal::JOURNAL_FILE;
use crate::test_support::{CreateScript, FAKE_CONSOLE_BANNER, FakeBackend, FakeExecutor};

struct Output {
    _tmp: TempDir,
    dir: Dir,
}

impl Output {
    fn entries(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .dir
            .entries()
            .expect("list output")
            .map(|entry| entry.expect("entry").file_name().expect("utf8 name"))
            .collect();
        names.sort();
        names
    }
}

#[fixture]
fn output() -> Output {
    let tmp = tempfile::tempdir().expect("tempdir");
    let dir = Dir::open_ambient_dir(
        Utf8Path::from_path(tmp.path()).expect("utf8 tempdir"),
        ambient_authority(),
    )
    .expect("open output dir");
    Output { _tmp: tmp, dir }
}

#[fixture]
fn ctx() -> RuntimeContext {
    RuntimeContext::new("unused")
        .with_max_attempts(2)
        .with_boot_timeout(Duration::from_millis(50))
        .with_poll_interval(Duration::from_millis(1))
}

#[rstest]
#[tokio::test]
async fn first_attempt_lays_out_machine_directory(output: Output, ctx: RuntimeContext) {
    let backend = FakeBackend::new().with_console();
    let executor = FakeExecutor::new();

    let machine = ProvisioningSession::new(
        &backend,
        &executor,
        &ctx,
        &output.dir,
        "node-a",
        b"#!/bin/sh\n".to_vec(),
    )
    .run()
    .await
    .expect("provisioned");

    assert_eq!(machine.device.id, "fake-1");
    assert_eq!(output.entries(), vec![String::from("fake-1")]);
    assert_eq!(
        machine.dir.read_to_string(USER_DATA_FILE).expect("user-data"),
        "#!/bin/sh\n"
    );
    assert_eq!(machine.dir.read_to_string(JOURNAL_FILE).expect("journal"), "");
    let console = machine.console.expect("console sink");
    assert_eq!(console.read_back().expect("console"), FAKE_CONSOLE_BANNER);
    assert_eq!(executor.commands(), vec![String::from("true")]);
}

#[rstest]
#[tokio::test]
async fn failed_create_is_cleaned_up_by_name_then_retried(output: Output, ctx: RuntimeContext) {
    let backend = FakeBackend::new().with_console();
    backend.script([CreateScript::Fail(String::from("quota"))]);
    let executor = FakeExecutor::new();

    let machine = ProvisioningSession::new(&backend, &executor, &ctx, &output.dir, "node-b", vec![])
        .run()
        .await
        .expect("second attempt succeeds");

    let calls = backend.calls();
    assert_eq!(calls.created, vec!["node-b", "node-b"]);
    assert_eq!(calls.destroyed_by_name, vec!["node-b"]);
    assert_eq!(backend.live(), vec![machine.device.id.clone()]);
    assert_eq!(output.entries(), vec![machine.device.id]);
}

#[rstest]
#[tokio::test]
async fn missing_address_exhausts_retries_without_leaks(output: Output, ctx: RuntimeContext) {
    let backend = FakeBackend::new().with_console();
    backend.script([
        CreateScript::MissingPublicAddress,
        CreateScript::MissingPublicAddress,
    ]);
    let executor = FakeExecutor::new();

    let err = ProvisioningSession::new(&backend, &executor, &ctx, &output.dir, "node-c", vec![])
        .run()
        .await
        .expect_err("no public address");

    let ProvisionError::RetriesExhausted { attempts, last } = err else {
        panic!("expected RetriesExhausted, got {err:?}");
    };
    assert_eq!(attempts, 2);
    assert!(
        matches!(*last, ProvisionError::MissingAddress { which: "public", .. }),
        "{last:?}"
    );
    assert!(backend.live().is_empty());
    assert_eq!(backend.calls().destroyed, vec!["fake-1", "fake-2"]);
    assert!(output.entries().is_empty(), "{:?}", output.entries());
}

#[rstest]
#[tokio::test]
async fn unreachable_machine_times_out(output: Output, ctx: RuntimeContext) {
    let backend = FakeBackend::new();
    let executor = FakeExecutor::unreachable();

    let err = ProvisioningSession::new(&backend, &executor, &ctx, &output.dir, "node-d", vec![])
        .run()
        .await
        .expect_err("never ready");

    let ProvisionError::RetriesExhausted { last, .. } = err else {
        panic!("expected RetriesExhausted, got {err:?}");
    };
    assert!(matches!(*last, ProvisionError::BootTimeout { .. }), "{last:?}");
    assert!(backend.live().is_empty());
    assert!(executor.commands().len() >= 2);
}

#[rstest]
#[tokio::test]
async fn existing_console_file_is_fatal(output: Output, ctx: RuntimeContext) {
    output
        .dir
        .write(temporary_name("node-e"), b"stale")
        .expect("seed console file");
    let backend = FakeBackend::new().with_console();
    let executor = FakeExecutor::new();

    let err = ProvisioningSession::new(&backend, &executor, &ctx, &output.dir, "node-e", vec![])
        .run()
        .await
        .expect_err("console collision");

    assert!(matches!(err, ProvisionError::Console { .. }), "{err:?}");
    assert!(!err.is_retryable());
    assert!(backend.calls().created.is_empty());
}

#[rstest]
#[tokio::test]
async fn cancelled_token_stops_before_create(output: Output, ctx: RuntimeContext) {
    let backend = FakeBackend::new().with_console();
    let executor = FakeExecutor::new();
    let token = CancellationToken::new();
    token.cancel();

    let err = ProvisioningSession::new(&backend, &executor, &ctx, &output.dir, "node-f", vec![])
        .with_cancellation(token)
        .run()
        .await
        .expect_err("cancelled");

    assert!(matches!(err, ProvisionError::Cancelled), "{err:?}");
    assert!(backend.calls().created.is_empty());
    assert!(output.entries().is_empty());
}

#[rstest]
#[tokio::test]
async fn cancellation_during_boot_wait_rolls_back(output: Output) {
    let ctx = RuntimeContext::new("unused")
        .with_boot_timeout(Duration::from_secs(30))
        .with_poll_interval(Duration::from_millis(5));
    let backend = FakeBackend::new().with_console();
    let executor = FakeExecutor::unreachable();
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let err = ProvisioningSession::new(&backend, &executor, &ctx, &output.dir, "node-g", vec![])
        .with_cancellation(token)
        .run()
        .await
        .expect_err("cancelled");

    assert!(matches!(err, ProvisionError::Cancelled), "{err:?}");
    assert_eq!(backend.calls().destroyed, vec!["fake-1"]);
    assert!(backend.live().is_empty());
}

#[rstest]
#[tokio::test]
async fn cancellation_during_address_lookup_rolls_back(output: Output, ctx: RuntimeContext) {
    let backend = FakeBackend::new().with_console().with_stalled_address_lookup();
    let executor = FakeExecutor::new();
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        ProvisioningSession::new(&backend, &executor, &ctx, &output.dir, "node-h", vec![])
            .with_cancellation(token)
            .run(),
    )
    .await
    .expect("cancellation interrupts the address lookup")
    .expect_err("cancelled");

    assert!(matches!(err, ProvisionError::Cancelled), "{err:?}");
    assert_eq!(backend.calls().created, vec!["node-h"]);
    assert_eq!(backend.calls().destroyed, vec!["fake-1"]);
    assert!(backend.live().is_empty());
    assert!(executor.commands().is_empty());
    assert!(output.entries().is_empty());
}

#[rstest]
fn retry_classification() {
    let create: ProvisionError<std::io::Error> = ProvisionError::Create {
        name: String::from("n"),
        source: std::io::Error::other("boom"),
    };
    let config: ProvisionError<std::io::Error> = ProvisionError::Config(ConfError::Unrendered);
    assert!(create.is_retryable());
    assert!(!config.is_retryable());
    assert!(!ProvisionError::<std::io::Error>::Cancelled.is_retryable());
}

//! End-to-end lifecycle coverage against the in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use harrier::conf::AuthorizedKey;
use harrier::console::CONSOLE_FILE;
use harrier::journal::JOURNAL_FILE;
use harrier::session::USER_DATA_FILE;
use harrier::test_support::{CreateScript, FAKE_CONSOLE_BANNER, FakeBackend, FakeExecutor};
use harrier::{Cluster, ConfigDocument, ProvisionError, RuntimeContext};
use rstest::{fixture, rstest};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct Workspace {
    _tmp: TempDir,
    out: Utf8PathBuf,
}

impl Workspace {
    fn files(&self, relative: &str) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.out.join(relative))
            .unwrap_or_else(|err| panic!("list {relative}: {err}"))
            .map(|entry| {
                entry
                    .unwrap_or_else(|err| panic!("dir entry: {err}"))
                    .file_name()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        names.sort();
        names
    }

    fn read(&self, relative: impl AsRef<Utf8Path>) -> String {
        let path = self.out.join(relative);
        std::fs::read_to_string(&path).unwrap_or_else(|err| panic!("read {path}: {err}"))
    }
}

#[fixture]
fn workspace() -> Workspace {
    let tmp = tempfile::tempdir().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let out = Utf8PathBuf::from_path_buf(tmp.path().join("_harrier"))
        .unwrap_or_else(|path| panic!("non UTF-8 temp path {}", path.display()));
    Workspace { _tmp: tmp, out }
}

fn context(workspace: &Workspace) -> RuntimeContext {
    RuntimeContext::new(workspace.out.clone())
        .with_max_attempts(3)
        .with_boot_timeout(Duration::from_millis(100))
        .with_poll_interval(Duration::from_millis(1))
}

fn cluster(
    workspace: &Workspace,
    backend: &FakeBackend,
    ctx: RuntimeContext,
) -> Cluster<FakeBackend, FakeExecutor> {
    Cluster::new(
        "lifecycle",
        Arc::new(backend.clone()),
        Arc::new(FakeExecutor::new()),
        ctx,
    )
    .unwrap_or_else(|err| panic!("cluster: {err}"))
}

#[rstest]
#[tokio::test]
async fn machine_leaves_console_journal_and_user_data(workspace: Workspace) {
    let backend = FakeBackend::new().with_console();
    let key = AuthorizedKey::new("ssh-ed25519", b"key1".to_vec(), "harness");
    let ctx = context(&workspace).with_ssh_keys([key.clone()]);
    let cluster = cluster(&workspace, &backend, ctx);

    let machine = cluster
        .new_machine(&ConfigDocument::unknown(
            r#"{"ignition": {"version": "2.2.0"}}"#,
        ))
        .await
        .unwrap_or_else(|err| panic!("provision: {err}"));
    let id = machine.id().to_owned();

    assert!(machine.name().starts_with("lifecycle-"), "{}", machine.name());
    assert_eq!(
        workspace.files(&id),
        vec![CONSOLE_FILE, JOURNAL_FILE, USER_DATA_FILE]
    );
    let user_data = workspace.read(format!("{id}/{USER_DATA_FILE}"));
    assert!(user_data.contains("\"2.2.0\""), "{user_data}");
    assert!(user_data.contains(&key.to_line()), "{user_data}");

    let summary = cluster
        .destroy()
        .await
        .unwrap_or_else(|err| panic!("teardown: {err}"));

    assert_eq!(summary.destroyed, vec![id.clone()]);
    assert_eq!(machine.console_output(), FAKE_CONSOLE_BANNER);
    assert_eq!(workspace.read(format!("{id}/{CONSOLE_FILE}")), FAKE_CONSOLE_BANNER);
    assert_eq!(workspace.files(""), vec![id]);
}

#[rstest]
#[tokio::test]
async fn exhausted_retries_leak_nothing(workspace: Workspace) {
    let backend = FakeBackend::new().with_console();
    backend.script([
        CreateScript::Fail(String::from("capacity")),
        CreateScript::MissingPublicAddress,
        CreateScript::Fail(String::from("capacity")),
    ]);
    let cluster = cluster(&workspace, &backend, context(&workspace));

    let err = cluster
        .new_machine(&ConfigDocument::empty())
        .await
        .map(|machine| machine.id().to_owned())
        .expect_err("every attempt fails");

    let ProvisionError::RetriesExhausted { attempts, last } = err else {
        panic!("expected RetriesExhausted, got {err:?}");
    };
    assert_eq!(attempts, 3);
    assert!(matches!(*last, ProvisionError::Create { .. }), "{last:?}");
    assert!(cluster.is_empty());
    assert!(backend.live().is_empty());
    let calls = backend.calls();
    assert_eq!(calls.created.len(), 3);
    assert_eq!(calls.destroyed, vec!["fake-1"]);
    assert_eq!(calls.destroyed_by_name.len(), 2);
    assert!(workspace.files("").is_empty(), "{:?}", workspace.files(""));
}

#[rstest]
#[tokio::test]
async fn destroy_is_idempotent_across_machine_and_cluster(workspace: Workspace) {
    let backend = FakeBackend::new();
    let cluster = cluster(&workspace, &backend, context(&workspace));
    let machine = cluster
        .new_machine(&ConfigDocument::script("#!/bin/sh\ntrue\n"))
        .await
        .unwrap_or_else(|err| panic!("provision: {err}"));

    machine
        .destroy()
        .await
        .unwrap_or_else(|err| panic!("destroy: {err}"));
    machine
        .destroy()
        .await
        .unwrap_or_else(|err| panic!("second destroy: {err}"));
    let summary = cluster
        .destroy()
        .await
        .unwrap_or_else(|err| panic!("teardown: {err}"));

    assert!(summary.destroyed.is_empty());
    assert_eq!(backend.calls().destroyed, vec![machine.id()]);
    assert_eq!(backend.calls().released, 1);
    assert_eq!(machine.console_output(), "");
}

#[rstest]
#[tokio::test]
async fn cancelled_provisioning_registers_nothing(workspace: Workspace) {
    let backend = FakeBackend::new().with_console();
    let cluster = cluster(&workspace, &backend, context(&workspace));
    let token = CancellationToken::new();
    token.cancel();

    let err = cluster
        .new_machine_with_cancel(&ConfigDocument::empty(), token)
        .await
        .map(|machine| machine.id().to_owned())
        .expect_err("cancelled");

    assert!(matches!(err, ProvisionError::Cancelled), "{err:?}");
    assert!(cluster.is_empty());
    assert!(backend.calls().created.is_empty());
}

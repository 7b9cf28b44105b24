//! Unit tests for SSH argument construction and execution.

use super::*;
use crate::test_support::ScriptedRunner;
use rstest::{fixture, rstest};
use std::net::Ipv4Addr;

fn assert_validation_rejects_field<F>(mut cfg: SshConfig, field_name: &str, set_field: F)
where
    F: Fn(&mut SshConfig, String),
{
    for invalid in ["", "  "] {
        set_field(&mut cfg, invalid.to_owned());
        let Err(err) = cfg.validate() else {
            panic!("{field_name} '{invalid}' should fail");
        };
        let RemoteError::InvalidConfig { ref field } = err else {
            panic!("expected InvalidConfig for {field_name}, got {err:?}");
        };
        assert_eq!(field, field_name, "expected invalid field {field_name}");
    }
}

#[fixture]
fn base_config() -> SshConfig {
    SshConfig {
        ssh_bin: String::from("ssh"),
        sshpass_bin: String::from("sshpass"),
        ssh_user: String::from("core"),
        ssh_batch_mode: true,
        ssh_strict_host_key_checking: false,
        ssh_known_hosts_file: String::from("/dev/null"),
        ssh_identity_file: None,
        connect_timeout_secs: 10,
        port: 22,
    }
}

#[fixture]
fn target() -> SshTarget {
    SshTarget {
        host: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)),
        port: 2222,
    }
}

fn args_of(runner: &ScriptedRunner) -> Vec<String> {
    let invocations = runner.invocations();
    assert_eq!(invocations.len(), 1, "expected a single invocation");
    invocations[0]
        .args
        .iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect()
}

#[rstest]
fn ssh_config_validate_accepts_defaults(base_config: SshConfig) {
    assert!(base_config.validate().is_ok());
}

#[rstest]
fn ssh_config_validation_rejects_ssh_bin(base_config: SshConfig) {
    assert_validation_rejects_field(base_config, "ssh_bin", |cfg, val| cfg.ssh_bin = val);
}

#[rstest]
fn ssh_config_validation_rejects_ssh_user(base_config: SshConfig) {
    assert_validation_rejects_field(base_config, "ssh_user", |cfg, val| cfg.ssh_user = val);
}

#[rstest]
fn ssh_config_validation_rejects_blank_identity(base_config: SshConfig) {
    assert_validation_rejects_field(base_config, "ssh_identity_file", |cfg, val| {
        cfg.ssh_identity_file = Some(val);
    });
}

#[rstest]
fn invalid_config_message_names_env_var() {
    let err = RemoteError::InvalidConfig {
        field: String::from("ssh_bin"),
    };
    assert_eq!(
        err.to_string(),
        "missing ssh_bin: set HARRIER_SSH_SSH_BIN or add ssh_bin to harrier.toml"
    );
}

#[rstest]
fn key_login_uses_batch_mode_and_identity(base_config: SshConfig, target: SshTarget) {
    let cfg = SshConfig {
        ssh_identity_file: Some(String::from("/keys/id_ed25519")),
        ..base_config
    };
    let runner = ScriptedRunner::new();
    runner.push_output(Some(0), "ok\n", "");
    let executor = SshExecutor::new(cfg, runner.clone()).expect("config should validate");

    let output = executor
        .run_blocking(target, &SshCredentials::key("core"), "uptime")
        .expect("run");
    assert_eq!(output.exit_code, Some(0));
    assert_eq!(output.stdout, "ok\n");

    let invocation = &runner.invocations()[0];
    assert_eq!(invocation.program, "ssh");
    assert!(invocation.env.is_empty());
    let args = args_of(&runner);
    for expected in [
        "-p",
        "2222",
        "BatchMode=yes",
        "ConnectTimeout=10",
        "StrictHostKeyChecking=no",
        "UserKnownHostsFile=/dev/null",
        "-i",
        "/keys/id_ed25519",
    ] {
        assert!(args.iter().any(|arg| arg == expected), "missing {expected}: {args:?}");
    }
    assert_eq!(
        args.iter().rev().take(2).cloned().collect::<Vec<_>>(),
        vec![String::from("uptime"), String::from("core@10.0.0.7")]
    );
}

#[rstest]
fn password_login_goes_through_sshpass(base_config: SshConfig, target: SshTarget) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let executor = SshExecutor::new(base_config, runner.clone()).expect("config should validate");

    executor
        .run_blocking(target, &SshCredentials::password("tester", "hunter2"), "id")
        .expect("run");

    let invocation = &runner.invocations()[0];
    assert_eq!(invocation.program, "sshpass");
    assert_eq!(
        invocation.env,
        vec![(String::from("SSHPASS"), String::from("hunter2"))]
    );
    let args = args_of(&runner);
    assert_eq!(args[0], "-e");
    assert_eq!(args[1], "ssh");
    assert!(args.iter().any(|arg| arg == "PubkeyAuthentication=no"));
    assert!(!args.iter().any(|arg| arg == "BatchMode=yes"));
    assert!(!args.iter().any(|arg| arg.contains("hunter2")));
    assert!(args.iter().any(|arg| arg == "tester@10.0.0.7"));
}

#[rstest]
#[case(None)]
#[case(Some(255))]
fn non_zero_exit_is_reported_not_raised(
    base_config: SshConfig,
    target: SshTarget,
    #[case] code: Option<i32>,
) {
    let runner = ScriptedRunner::new();
    runner.push_output(code, "", "connection refused");
    let executor = SshExecutor::new(base_config, runner).expect("config should validate");

    let output = executor
        .run_blocking(target, &SshCredentials::key("core"), "true")
        .expect("run");
    assert_eq!(output.exit_code, code);
    assert!(!output.is_success());
}

#[rstest]
#[tokio::test]
async fn async_run_executes_on_blocking_pool(base_config: SshConfig, target: SshTarget) {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(0), "boot-id\n", "");
    let executor = SshExecutor::new(base_config, runner).expect("config should validate");

    let output = RemoteExecutor::run(&executor, target, &SshCredentials::key("core"), "cat x")
        .await
        .expect("run");
    assert_eq!(output.stdout, "boot-id\n");
}

#[rstest]
fn debug_output_hides_password() {
    let credentials = SshCredentials::password("core", "hunter2");
    let rendered = format!("{credentials:?}");
    assert!(!rendered.contains("hunter2"), "{rendered}");
}

//! Handles on provisioned machines.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use cap_std::fs_utf8::Dir;
use thiserror::Error;
use tokio::time::{Instant, sleep};
use tracing::{Span, debug, info, warn};

use crate::backend::{Backend, Device, MachineAddresses};
use crate::cluster::Registry;
use crate::console::ConsoleSink;
use crate::context::RuntimeContext;
use crate::journal::{Journal, JournalError};
use crate::remote::{
    RemoteCommandOutput, RemoteError, RemoteExecutor, SshCredentials, SshTarget,
};
use crate::session::ProvisionedMachine;

const BOOT_ID_COMMAND: &str = "cat /proc/sys/kernel/random/boot_id";
const REBOOT_COMMAND: &str = "sudo systemctl reboot";

/// Shared handle on a registered machine.
pub type MachineHandle<B, X> = Arc<Machine<B, X>>;

/// Errors raised by machine operations.
#[derive(Debug, Error)]
pub enum MachineError<E>
where
    E: std::error::Error + 'static,
{
    /// The remote command could not run.
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// The remote command ran and exited unsuccessfully.
    #[error("command `{command}` exited with status {status:?}: {stderr}")]
    CommandFailed {
        /// Command passed to the machine.
        command: String,
        /// Exit status, if any.
        status: Option<i32>,
        /// Captured stderr.
        stderr: String,
    },
    /// Journal capture failed.
    #[error(transparent)]
    Journal(#[from] JournalError),
    /// The machine did not report a new boot id in time.
    #[error("machine {id} did not come back from reboot within {timeout:?}")]
    RebootTimeout {
        /// Machine id.
        id: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },
    /// The backend failed to destroy the machine.
    #[error("backend failed to destroy {id}")]
    Destroy {
        /// Machine id.
        id: String,
        /// Backend error.
        #[source]
        source: E,
    },
}

/// A machine that reached readiness and is registered with its cluster.
#[derive(Debug)]
pub struct Machine<B, X> {
    device: Device,
    dir: Dir,
    backend: Arc<B>,
    executor: Arc<X>,
    credentials: SshCredentials,
    registry: Weak<Registry<B, X>>,
    console: Option<ConsoleSink>,
    journal: Journal,
    console_output: OnceLock<String>,
    destroyed: AtomicBool,
    boot_timeout: Duration,
    poll_interval: Duration,
    span: Span,
}

impl<B, X> Machine<B, X>
where
    B: Backend,
    X: RemoteExecutor,
{
    pub(crate) fn new(
        provisioned: ProvisionedMachine,
        backend: Arc<B>,
        executor: Arc<X>,
        ctx: &RuntimeContext,
        registry: Weak<Registry<B, X>>,
    ) -> Self {
        let ProvisionedMachine {
            device,
            dir,
            console,
            journal,
        } = provisioned;
        Self {
            device,
            dir,
            backend,
            executor,
            credentials: ctx.credentials.clone(),
            registry,
            console,
            journal,
            console_output: OnceLock::new(),
            destroyed: AtomicBool::new(false),
            boot_timeout: ctx.boot_timeout,
            poll_interval: ctx.poll_interval,
            span: ctx.span.clone(),
        }
    }

    /// Provider identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.device.id
    }

    /// Name chosen by the cluster.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.device.name
    }

    /// Address reachable from the harness.
    #[must_use]
    pub const fn public_ip(&self) -> Option<IpAddr> {
        self.device.addresses.public
    }

    /// Address reachable from other machines of the cluster.
    #[must_use]
    pub const fn private_ip(&self) -> Option<IpAddr> {
        self.device.addresses.private
    }

    /// Both addresses and the SSH port.
    #[must_use]
    pub const fn addresses(&self) -> MachineAddresses {
        self.device.addresses
    }

    /// Handle on `<output>/<id>/`.
    #[must_use]
    pub const fn dir(&self) -> &Dir {
        &self.dir
    }

    fn target(&self) -> Result<SshTarget, RemoteError> {
        let host = self.device.addresses.public.ok_or_else(|| RemoteError::NoAddress {
            machine: self.device.id.clone(),
        })?;
        Ok(SshTarget {
            host,
            port: self.device.addresses.ssh_port,
        })
    }

    /// Runs `command` as the cluster's login user and returns its raw output.
    /// A non-zero exit status is reported in the output, not as an error.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::Remote`] when the command cannot run.
    pub async fn run(&self, command: &str) -> Result<RemoteCommandOutput, MachineError<B::Error>> {
        let target = self.target()?;
        Ok(self.executor.run(target, &self.credentials, command).await?)
    }

    /// Runs `command` and returns its stdout with surrounding whitespace
    /// trimmed.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::CommandFailed`] when the command exits
    /// unsuccessfully.
    pub async fn ssh(&self, command: &str) -> Result<String, MachineError<B::Error>> {
        let output = self.run(command).await?;
        if !output.is_success() {
            return Err(MachineError::CommandFailed {
                command: command.to_owned(),
                status: output.exit_code,
                stderr: output.stderr.trim().to_owned(),
            });
        }
        Ok(output.stdout.trim().to_owned())
    }

    /// Runs `command` as `user`, authenticating with `password`.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::Remote`] when the command cannot run.
    pub async fn run_with_password(
        &self,
        user: &str,
        password: &str,
        command: &str,
    ) -> Result<RemoteCommandOutput, MachineError<B::Error>> {
        let target = self.target()?;
        let credentials = SshCredentials::password(user, password);
        Ok(self.executor.run(target, &credentials, command).await?)
    }

    async fn collect_journal(&self) -> Result<usize, MachineError<B::Error>> {
        let target = self.target()?;
        Ok(self
            .journal
            .collect(self.executor.as_ref(), target, &self.credentials)
            .await?)
    }

    /// Reboots the machine and waits until it reports a new boot id.
    ///
    /// # Errors
    ///
    /// Returns the error raised while reading the current boot id, or
    /// [`MachineError::RebootTimeout`] when no new boot id shows up within
    /// the boot timeout.
    pub async fn reboot(&self) -> Result<(), MachineError<B::Error>> {
        let previous = self.ssh(BOOT_ID_COMMAND).await?;
        if let Err(err) = self.collect_journal().await {
            warn!(parent: &self.span, id = %self.id(), error = %err, "journal collection before reboot failed");
        }
        // The connection usually drops before the command reports back.
        match self.run(REBOOT_COMMAND).await {
            Ok(output) => debug!(code = ?output.exit_code, "reboot issued"),
            Err(err) => debug!(error = %err, "reboot command interrupted"),
        }

        let deadline = Instant::now() + self.boot_timeout;
        loop {
            sleep(self.poll_interval).await;
            match self.ssh(BOOT_ID_COMMAND).await {
                Ok(current) if current != previous => {
                    info!(parent: &self.span, id = %self.id(), boot_id = %current, "machine rebooted");
                    return Ok(());
                }
                Ok(_) => debug!("boot id unchanged"),
                Err(err) => debug!(error = %err, "machine not reachable yet"),
            }
            if Instant::now() >= deadline {
                return Err(MachineError::RebootTimeout {
                    id: self.device.id.clone(),
                    timeout: self.boot_timeout,
                });
            }
        }
    }

    /// Tears the machine down. Only the first call does any work; later calls
    /// return `Ok(())`.
    ///
    /// The journal is collected one last time, the backend destroys the
    /// machine, the journal is finalized, the console is read back and the
    /// machine leaves its cluster's registry.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::Destroy`] when the backend fails. The other
    /// steps still run and only log their failures.
    pub async fn destroy(&self) -> Result<(), MachineError<B::Error>> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(err) = self.collect_journal().await {
            warn!(parent: &self.span, id = %self.id(), error = %err, "final journal collection failed");
        }
        let destroyed = self.backend.destroy(&self.device).await;
        self.journal.finalize();
        if let Some(console) = &self.console {
            match console.read_back() {
                Ok(text) => {
                    if self.console_output.set(text).is_err() {
                        debug!("console output already recorded");
                    }
                }
                Err(err) => {
                    warn!(parent: &self.span, id = %self.id(), error = %err, "failed to read console output");
                }
            }
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.deregister(self.id());
        }
        destroyed.map_err(|source| MachineError::Destroy {
            id: self.device.id.clone(),
            source,
        })
    }

    /// Returns `true` once [`Machine::destroy`] has been called.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Console output captured during the machine's lifetime. Empty until the
    /// machine is destroyed, and for backends without console capture.
    #[must_use]
    pub fn console_output(&self) -> &str {
        self.console_output.get().map_or("", String::as_str)
    }

    /// Journal entries collected so far.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::Journal`] when `journal.txt` cannot be read.
    pub fn journal_output(&self) -> Result<String, MachineError<B::Error>> {
        Ok(self.journal.read()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Cluster;
    use crate::conf::ConfigDocument;
    use crate::test_support::{FAKE_CONSOLE_BANNER, FakeBackend, FakeExecutor};
    use camino::Utf8PathBuf;
    use rstest::rstest;
    use tempfile::TempDir;

    async fn single_machine(
        backend: FakeBackend,
        executor: FakeExecutor,
    ) -> (TempDir, Cluster<FakeBackend, FakeExecutor>, MachineHandle<FakeBackend, FakeExecutor>) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let out = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8 tempdir");
        let ctx = RuntimeContext::new(out)
            .with_boot_timeout(Duration::from_millis(200))
            .with_poll_interval(Duration::from_millis(1));
        let cluster = Cluster::new("machine-tests", Arc::new(backend), Arc::new(executor), ctx)
            .expect("cluster");
        let machine = cluster
            .new_machine(&ConfigDocument::empty())
            .await
            .expect("machine");
        (tmp, cluster, machine)
    }

    #[rstest]
    #[tokio::test]
    async fn ssh_trims_stdout_and_rejects_failures() {
        let executor = FakeExecutor::new();
        let (_tmp, _cluster, machine) = single_machine(FakeBackend::new(), executor.clone()).await;

        executor.push_stdout("  hello\n");
        assert_eq!(machine.ssh("echo hello").await.expect("ssh"), "hello");

        executor.push_output(RemoteCommandOutput {
            exit_code: Some(3),
            stdout: String::new(),
            stderr: String::from("nope\n"),
        });
        let err = machine.ssh("false").await.expect_err("non-zero exit");
        assert!(
            matches!(err, MachineError::CommandFailed { status: Some(3), ref stderr, .. } if stderr == "nope"),
            "{err:?}"
        );
    }

    #[rstest]
    #[tokio::test]
    async fn reboot_waits_for_new_boot_id() {
        let executor = FakeExecutor::new();
        let (_tmp, _cluster, machine) = single_machine(FakeBackend::new(), executor.clone()).await;
        for stdout in ["boot-a\n", "", "", "boot-a\n", "boot-b\n"] {
            executor.push_stdout(stdout);
        }

        machine.reboot().await.expect("reboot");

        let commands = executor.commands();
        assert!(commands.iter().any(|cmd| cmd == REBOOT_COMMAND), "{commands:?}");
        assert_eq!(
            commands.iter().filter(|cmd| *cmd == BOOT_ID_COMMAND).count(),
            3
        );
    }

    #[rstest]
    #[tokio::test]
    async fn destroy_runs_once_and_reads_console() {
        let backend = FakeBackend::new().with_console();
        let (_tmp, cluster, machine) = single_machine(backend.clone(), FakeExecutor::new()).await;

        assert_eq!(machine.console_output(), "");
        machine.destroy().await.expect("first destroy");
        machine.destroy().await.expect("second destroy");

        assert!(machine.is_destroyed());
        assert_eq!(machine.console_output(), FAKE_CONSOLE_BANNER);
        assert_eq!(backend.calls().destroyed, vec![machine.id()]);
        assert!(cluster.is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn failed_destroy_still_deregisters() {
        let backend = FakeBackend::new();
        let (_tmp, cluster, machine) = single_machine(backend.clone(), FakeExecutor::new()).await;
        backend.fail_destroy(machine.id());

        let err = machine.destroy().await.expect_err("backend refuses");
        assert!(matches!(err, MachineError::Destroy { .. }), "{err:?}");
        assert!(cluster.is_empty());
        assert_eq!(machine.journal_output().expect("journal"), "");
    }
}

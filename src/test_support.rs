//! Test support utilities shared across unit and integration tests.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

use crate::backend::{Backend, BackendFuture, CreateRequest, Device, MachineAddresses};
use crate::remote::{
    CommandOutput, CommandRunner, RemoteCommandOutput, RemoteError, RemoteExecutor, RemoteFuture,
    SshCredentials, SshTarget,
};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        locked(&self.invocations).clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        locked(&self.responses).push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run_with_env(
        &self,
        program: &str,
        args: &[OsString],
        env: &[(String, String)],
    ) -> Result<CommandOutput, RemoteError> {
        locked(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
            env: env.to_vec(),
        });
        locked(&self.responses)
            .pop_front()
            .ok_or_else(|| RemoteError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Remote executor that answers from a queue, then falls back to a default.
///
/// The default is a successful, silent command, so machines look reachable
/// unless a test says otherwise.
#[derive(Clone, Debug)]
pub struct FakeExecutor {
    responses: Arc<Mutex<VecDeque<Result<RemoteCommandOutput, RemoteError>>>>,
    fallback: Arc<Mutex<Result<RemoteCommandOutput, RemoteError>>>,
    commands: Arc<Mutex<Vec<String>>>,
}

impl Default for FakeExecutor {
    fn default() -> Self {
        Self {
            responses: Arc::default(),
            fallback: Arc::new(Mutex::new(Ok(RemoteCommandOutput {
                exit_code: Some(0),
                ..RemoteCommandOutput::default()
            }))),
            commands: Arc::default(),
        }
    }
}

impl FakeExecutor {
    /// Creates an executor where every command succeeds silently.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an executor where every command fails as if the SSH
    /// connection was refused.
    #[must_use]
    pub fn unreachable() -> Self {
        let executor = Self::default();
        executor.set_fallback(Ok(RemoteCommandOutput {
            exit_code: Some(255),
            stdout: String::new(),
            stderr: String::from("ssh: connect to host: Connection refused"),
        }));
        executor
    }

    /// Queues one response.
    pub fn push_output(&self, output: RemoteCommandOutput) {
        locked(&self.responses).push_back(Ok(output));
    }

    /// Queues a successful response with `stdout`.
    pub fn push_stdout(&self, stdout: impl Into<String>) {
        self.push_output(RemoteCommandOutput {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        });
    }

    /// Queues an execution error.
    pub fn push_error(&self, error: RemoteError) {
        locked(&self.responses).push_back(Err(error));
    }

    /// Replaces the response used once the queue is empty.
    pub fn set_fallback(&self, response: Result<RemoteCommandOutput, RemoteError>) {
        *locked(&self.fallback) = response;
    }

    /// Commands received so far, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        locked(&self.commands).clone()
    }
}

impl RemoteExecutor for FakeExecutor {
    fn run<'a>(
        &'a self,
        _target: SshTarget,
        _credentials: &'a SshCredentials,
        command: &'a str,
    ) -> RemoteFuture<'a> {
        locked(&self.commands).push(command.to_owned());
        let response = locked(&self.responses)
            .pop_front()
            .unwrap_or_else(|| locked(&self.fallback).clone());
        Box::pin(async move { response })
    }
}

/// Error returned by [`FakeBackend`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("fake backend: {0}")]
pub struct FakeBackendError(pub String);

/// Outcome of one scripted create call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CreateScript {
    /// Create succeeds with both addresses.
    Succeed,
    /// Create succeeds but reports no public address.
    MissingPublicAddress,
    /// Create fails with the given message.
    Fail(String),
}

/// Calls observed by [`FakeBackend`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BackendCalls {
    /// Names passed to `create`, in order.
    pub created: Vec<String>,
    /// Ids passed to `destroy`, in order.
    pub destroyed: Vec<String>,
    /// Names passed to `destroy_by_name`, in order.
    pub destroyed_by_name: Vec<String>,
    /// Number of `release` calls.
    pub released: usize,
    /// User data received by each create call.
    pub user_data: Vec<Vec<u8>>,
}

#[derive(Debug, Default)]
struct FakeBackendState {
    script: VecDeque<CreateScript>,
    calls: BackendCalls,
    live: Vec<String>,
    failing_destroys: Vec<String>,
    next_id: u32,
}

/// In-memory backend with scripted create outcomes.
///
/// Creates succeed unless a script entry says otherwise. Machines that
/// supported consoles get a boot banner written to their sink.
#[derive(Clone, Debug, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeBackendState>>,
    console: bool,
    stall_address_lookup: bool,
    substitutions: &'static [(&'static str, &'static str)],
}

/// Banner written to console sinks by [`FakeBackend`].
pub const FAKE_CONSOLE_BANNER: &str = "fake console: booting\n";

impl FakeBackend {
    /// Creates a backend without console capture.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables console capture.
    #[must_use]
    pub fn with_console(mut self) -> Self {
        self.console = true;
        self
    }

    /// Makes `resolve_addresses` wait forever, as a provider that never
    /// reports the machine's addresses would.
    #[must_use]
    pub fn with_stalled_address_lookup(mut self) -> Self {
        self.stall_address_lookup = true;
        self
    }

    /// Sets the user-data substitutions the backend advertises.
    #[must_use]
    pub fn with_substitutions(
        mut self,
        substitutions: &'static [(&'static str, &'static str)],
    ) -> Self {
        self.substitutions = substitutions;
        self
    }

    /// Queues create outcomes consumed in order.
    pub fn script(&self, outcomes: impl IntoIterator<Item = CreateScript>) {
        locked(&self.state).script.extend(outcomes);
    }

    /// Makes `destroy` fail for the machine with `id`.
    pub fn fail_destroy(&self, id: impl Into<String>) {
        locked(&self.state).failing_destroys.push(id.into());
    }

    /// Snapshot of the calls observed so far.
    #[must_use]
    pub fn calls(&self) -> BackendCalls {
        locked(&self.state).calls.clone()
    }

    /// Ids of machines created and not yet destroyed.
    #[must_use]
    pub fn live(&self) -> Vec<String> {
        locked(&self.state).live.clone()
    }

    fn create_now(&self, request: &CreateRequest) -> Result<Device, FakeBackendError> {
        let mut state = locked(&self.state);
        state.calls.created.push(request.name.clone());
        state.calls.user_data.push(request.user_data.clone());
        let outcome = state.script.pop_front().unwrap_or(CreateScript::Succeed);
        if let CreateScript::Fail(message) = outcome {
            return Err(FakeBackendError(message));
        }

        state.next_id += 1;
        let id = format!("fake-{}", state.next_id);
        state.live.push(id.clone());
        let octet = u8::try_from(state.next_id % 250).unwrap_or(1);
        let public = (outcome == CreateScript::Succeed)
            .then_some(IpAddr::V4(Ipv4Addr::new(203, 0, 113, octet)));
        Ok(Device {
            id,
            name: request.name.clone(),
            addresses: MachineAddresses {
                public,
                private: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, octet))),
                ..MachineAddresses::default()
            },
        })
    }
}

impl Backend for FakeBackend {
    type Error = FakeBackendError;

    fn create(&self, request: CreateRequest) -> BackendFuture<'_, Device, Self::Error> {
        Box::pin(async move {
            let device = self.create_now(&request)?;
            if let Some(console) = &request.console {
                console
                    .write_all(FAKE_CONSOLE_BANNER.as_bytes())
                    .map_err(|err| FakeBackendError(err.to_string()))?;
            }
            Ok(device)
        })
    }

    fn resolve_addresses(&self, device: Device) -> BackendFuture<'_, Device, Self::Error> {
        let stall = self.stall_address_lookup;
        Box::pin(async move {
            if stall {
                std::future::pending::<()>().await;
            }
            Ok(device)
        })
    }

    fn destroy<'a>(&'a self, device: &'a Device) -> BackendFuture<'a, (), Self::Error> {
        let result = {
            let mut state = locked(&self.state);
            state.calls.destroyed.push(device.id.clone());
            if state.failing_destroys.contains(&device.id) {
                Err(FakeBackendError(format!("cannot destroy {}", device.id)))
            } else {
                state.live.retain(|id| id != &device.id);
                Ok(())
            }
        };
        Box::pin(async move { result })
    }

    fn destroy_by_name<'a>(&'a self, name: &'a str) -> BackendFuture<'a, (), Self::Error> {
        locked(&self.state)
            .calls
            .destroyed_by_name
            .push(name.to_owned());
        Box::pin(async { Ok(()) })
    }

    fn release(&self) -> BackendFuture<'_, (), Self::Error> {
        locked(&self.state).calls.released += 1;
        Box::pin(async { Ok(()) })
    }

    fn supports_console(&self) -> bool {
        self.console
    }

    fn user_data_substitutions(&self) -> &[(&'static str, &'static str)] {
        self.substitutions
    }
}

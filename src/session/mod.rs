//! Provisioning of one machine with bounded retries.
//!
//! An attempt walks `Start → ConsoleOpen → Creating → AddressResolved →
//! BootWait → Ready`. Any failure rolls the attempt back before the next one
//! starts: the console sink is closed and its temporary file removed, and the
//! partially created machine is destroyed (by name when creation never
//! returned a device).

use std::time::Duration;

use camino::Utf8Path;
use cap_std::fs_utf8::Dir;
use thiserror::Error;
use tokio::time::{Instant, sleep, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::backend::{Backend, CreateRequest, Device};
use crate::conf::ConfError;
use crate::console::{CONSOLE_FILE, ConsoleSink, temporary_name};
use crate::context::RuntimeContext;
use crate::journal::{Journal, JournalError};
use crate::remote::{RemoteExecutor, SshTarget};

/// Name of the persisted user data inside a machine directory.
pub const USER_DATA_FILE: &str = "user-data";

const READINESS_COMMAND: &str = "true";

/// Position of a session in its current attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    /// Nothing has happened yet.
    Start,
    /// The console sink is open (or the backend captures no console).
    ConsoleOpen,
    /// The backend create call is in flight.
    Creating,
    /// The machine has both addresses and an output directory.
    AddressResolved,
    /// Waiting for the machine to accept remote commands.
    BootWait,
    /// The machine is usable.
    Ready,
    /// The given attempt failed and was rolled back.
    Failed {
        /// One-based attempt number.
        attempt: u32,
    },
}

/// Result of a single attempt.
#[derive(Debug)]
pub enum AttemptOutcome<T, E> {
    /// The machine is ready.
    Ready(T),
    /// The attempt failed transiently and was rolled back.
    Retry(E),
    /// The attempt failed in a way another attempt cannot fix.
    Fatal(E),
}

/// Errors raised while provisioning a machine.
#[derive(Debug, Error)]
pub enum ProvisionError<E>
where
    E: std::error::Error + 'static,
{
    /// The console capture file could not be opened.
    #[error("failed to open console capture for {name}: {message}")]
    Console {
        /// Machine name.
        name: String,
        /// Operating system error string.
        message: String,
    },
    /// The backend failed to create the machine.
    #[error("backend failed to create {name}")]
    Create {
        /// Machine name.
        name: String,
        /// Backend error.
        #[source]
        source: E,
    },
    /// The backend failed to report the machine's addresses.
    #[error("backend failed to resolve addresses of {id}")]
    Resolve {
        /// Machine id.
        id: String,
        /// Backend error.
        #[source]
        source: E,
    },
    /// The machine came up without a required address.
    #[error("machine {id} has no {which} address")]
    MissingAddress {
        /// Machine id.
        id: String,
        /// `public` or `private`.
        which: &'static str,
    },
    /// The machine never accepted a remote command.
    #[error("machine {id} not reachable after {timeout:?}")]
    BootTimeout {
        /// Machine id.
        id: String,
        /// Readiness timeout that elapsed.
        timeout: Duration,
    },
    /// Per-machine output files could not be written.
    #[error("failed to write output for {id}: {message}")]
    Output {
        /// Machine id.
        id: String,
        /// Operating system error string.
        message: String,
    },
    /// Journal capture could not start.
    #[error(transparent)]
    Journal(#[from] JournalError),
    /// User data could not be rendered.
    #[error(transparent)]
    Config(#[from] ConfError),
    /// Provisioning was cancelled.
    #[error("provisioning cancelled")]
    Cancelled,
    /// Every attempt failed; `last` is the final failure.
    #[error("provisioning failed after {attempts} attempts")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Failure of the final attempt.
        #[source]
        last: Box<ProvisionError<E>>,
    },
}

impl<E: std::error::Error + 'static> ProvisionError<E> {
    /// Returns `true` for transient failures worth another attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Create { .. }
                | Self::Resolve { .. }
                | Self::MissingAddress { .. }
                | Self::BootTimeout { .. }
        )
    }
}

/// Resources of a machine that reached [`SessionState::Ready`].
#[derive(Debug)]
pub struct ProvisionedMachine {
    /// Device as reported by the backend, with resolved addresses.
    pub device: Device,
    /// Handle on `<output>/<id>/`.
    pub dir: Dir,
    /// Console capture, present when the backend supports it.
    pub console: Option<ConsoleSink>,
    /// Journal recorder writing `journal.txt`.
    pub journal: Journal,
}

/// What an attempt has created so far, for rollback.
#[derive(Debug, Default)]
struct Partial {
    console: Option<ConsoleSink>,
    device: Option<Device>,
    create_started: bool,
}

/// Drives attempts for one machine.
#[derive(Debug)]
pub struct ProvisioningSession<'a, B, X: ?Sized> {
    backend: &'a B,
    executor: &'a X,
    ctx: &'a RuntimeContext,
    output: &'a Dir,
    name: String,
    user_data: Vec<u8>,
    cancel: CancellationToken,
    state: SessionState,
}

impl<'a, B, X> ProvisioningSession<'a, B, X>
where
    B: Backend,
    X: RemoteExecutor + ?Sized,
{
    /// Creates a session for machine `name` booting with `user_data`.
    #[must_use]
    pub fn new(
        backend: &'a B,
        executor: &'a X,
        ctx: &'a RuntimeContext,
        output: &'a Dir,
        name: impl Into<String>,
        user_data: Vec<u8>,
    ) -> Self {
        Self {
            backend,
            executor,
            ctx,
            output,
            name: name.into(),
            user_data,
            cancel: CancellationToken::new(),
            state: SessionState::Start,
        }
    }

    /// Observes `token` at every state transition and during the readiness
    /// wait.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Runs attempts until one succeeds, one fails fatally or the attempt
    /// bound is reached.
    ///
    /// # Errors
    ///
    /// Returns the fatal error, [`ProvisionError::Cancelled`], or
    /// [`ProvisionError::RetriesExhausted`] wrapping the last failure.
    pub async fn run(mut self) -> Result<ProvisionedMachine, ProvisionError<B::Error>> {
        let span = info_span!(parent: &self.ctx.span, "provision", machine = %self.name);
        async move {
            let attempts = self.ctx.attempts();
            let mut attempt = 1;
            loop {
                match self.attempt(attempt).await {
                    AttemptOutcome::Ready(machine) => {
                        info!(attempt, id = %machine.device.id, "machine ready");
                        return Ok(machine);
                    }
                    AttemptOutcome::Fatal(err) => return Err(err),
                    AttemptOutcome::Retry(err) if attempt >= attempts => {
                        return Err(ProvisionError::RetriesExhausted {
                            attempts,
                            last: Box::new(err),
                        });
                    }
                    AttemptOutcome::Retry(err) => {
                        warn!(attempt, error = %err, "provisioning attempt failed, retrying");
                        attempt += 1;
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn attempt(
        &mut self,
        attempt: u32,
    ) -> AttemptOutcome<ProvisionedMachine, ProvisionError<B::Error>> {
        self.state = SessionState::Start;
        let mut partial = Partial::default();
        match self.advance(&mut partial).await {
            Ok(machine) => AttemptOutcome::Ready(machine),
            Err(err) => {
                self.rollback(partial).await;
                self.state = SessionState::Failed { attempt };
                if err.is_retryable() {
                    AttemptOutcome::Retry(err)
                } else {
                    AttemptOutcome::Fatal(err)
                }
            }
        }
    }

    fn transition(&mut self, next: SessionState) -> Result<(), ProvisionError<B::Error>> {
        if self.cancel.is_cancelled() {
            return Err(ProvisionError::Cancelled);
        }
        debug!(from = ?self.state, to = ?next, "session transition");
        self.state = next;
        Ok(())
    }

    async fn advance(
        &mut self,
        partial: &mut Partial,
    ) -> Result<ProvisionedMachine, ProvisionError<B::Error>> {
        self.transition(SessionState::ConsoleOpen)?;
        if self.backend.supports_console() {
            let sink = ConsoleSink::create(self.output, &temporary_name(&self.name)).map_err(
                |err| ProvisionError::Console {
                    name: self.name.clone(),
                    message: err.to_string(),
                },
            )?;
            partial.console = Some(sink);
        }

        self.transition(SessionState::Creating)?;
        partial.create_started = true;
        let request = CreateRequest {
            name: self.name.clone(),
            user_data: self.user_data.clone(),
            console: partial.console.clone(),
        };
        let created = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(ProvisionError::Cancelled),
            created = self.backend.create(request) => created,
        };
        let device = created.map_err(|source| ProvisionError::Create {
            name: self.name.clone(),
            source,
        })?;
        partial.device = Some(device.clone());

        let id = device.id.clone();
        let resolved = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(ProvisionError::Cancelled),
            resolved = self.backend.resolve_addresses(device) => resolved,
        };
        let device = resolved.map_err(|source| ProvisionError::Resolve { id, source })?;
        partial.device = Some(device.clone());
        let Some(public) = device.addresses.public else {
            return Err(missing(&device, "public"));
        };
        if device.addresses.private.is_none() {
            return Err(missing(&device, "private"));
        }

        self.transition(SessionState::AddressResolved)?;
        let dir = self.prepare_dir(&device, partial.console.as_ref())?;
        let journal = Journal::start(&dir)?;

        self.transition(SessionState::BootWait)?;
        let target = SshTarget {
            host: public,
            port: device.addresses.ssh_port,
        };
        self.wait_ready(&device, target).await?;

        self.transition(SessionState::Ready)?;
        Ok(ProvisionedMachine {
            device,
            dir,
            console: partial.console.take(),
            journal,
        })
    }

    /// Creates `<output>/<id>/`, moves the console there and persists the
    /// user data.
    fn prepare_dir(
        &self,
        device: &Device,
        console: Option<&ConsoleSink>,
    ) -> Result<Dir, ProvisionError<B::Error>> {
        let output_err = |err: std::io::Error| ProvisionError::Output {
            id: device.id.clone(),
            message: err.to_string(),
        };
        self.output.create_dir_all(&device.id).map_err(output_err)?;
        let dir = self.output.open_dir(&device.id).map_err(output_err)?;
        if let Some(sink) = console {
            sink.relocate(&dir, Utf8Path::new(CONSOLE_FILE))
                .map_err(output_err)?;
        }
        dir.write(USER_DATA_FILE, &self.user_data)
            .map_err(output_err)?;
        Ok(dir)
    }

    async fn wait_ready(
        &self,
        device: &Device,
        target: SshTarget,
    ) -> Result<(), ProvisionError<B::Error>> {
        let deadline = Instant::now() + self.ctx.boot_timeout;
        let timed_out = || ProvisionError::BootTimeout {
            id: device.id.clone(),
            timeout: self.ctx.boot_timeout,
        };
        loop {
            let check = self
                .executor
                .run(target, &self.ctx.credentials, READINESS_COMMAND);
            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(ProvisionError::Cancelled),
                result = timeout_at(deadline, check) => result,
            };
            match result {
                Err(_) => return Err(timed_out()),
                Ok(Ok(output)) if output.is_success() => return Ok(()),
                Ok(Ok(output)) => debug!(code = ?output.exit_code, "machine not ready yet"),
                Ok(Err(err)) => debug!(error = %err, "readiness check failed"),
            }
            if Instant::now() + self.ctx.poll_interval >= deadline {
                return Err(timed_out());
            }
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(ProvisionError::Cancelled),
                () = sleep(self.ctx.poll_interval) => {}
            }
        }
    }

    async fn rollback(&self, partial: Partial) {
        if let Some(console) = partial.console
            && let Err(err) = console.discard()
        {
            warn!(error = %err, "failed to discard console capture");
        }
        let destroyed = match partial.device {
            Some(device) => self.backend.destroy(&device).await,
            None if partial.create_started => self.backend.destroy_by_name(&self.name).await,
            None => Ok(()),
        };
        if let Err(err) = destroyed {
            warn!(error = %err, "failed to destroy machine during rollback");
        }
    }
}

fn missing<E: std::error::Error + 'static>(
    device: &Device,
    which: &'static str,
) -> ProvisionError<E> {
    ProvisionError::MissingAddress {
        id: device.id.clone(),
        which,
    }
}

#[cfg(test)]
mod tests;

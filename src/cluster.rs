//! Clusters of machines sharing a backend, an executor and a runtime context.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::Backend;
use crate::conf::{ConfError, ConfigDocument, RenderedConfig};
use crate::context::RuntimeContext;
use crate::machine::{Machine, MachineHandle};
use crate::remote::RemoteExecutor;
use crate::session::{ProvisionError, ProvisioningSession};

const NAME_PREFIX_LEN: usize = 13;
const NAME_SUFFIX_BYTES: usize = 5;

/// Errors raised by cluster setup and teardown.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ClusterError {
    /// The output directory could not be created or opened.
    #[error("failed to prepare output directory {path}: {message}")]
    Output {
        /// Output directory.
        path: String,
        /// Operating system error string.
        message: String,
    },
    /// Teardown finished with failures.
    #[error("teardown incomplete: {}", describe_incomplete(.failures, .release.as_deref()))]
    Incomplete {
        /// `(machine id, error)` for every machine that failed to tear down.
        failures: Vec<(String, String)>,
        /// Error from [`Backend::release`], if it failed.
        release: Option<String>,
    },
}

/// Outcome of a successful teardown.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TeardownSummary {
    /// Ids of the machines destroyed, in registry order.
    pub destroyed: Vec<String>,
}

/// Machines registered with a cluster, keyed by id.
#[derive(Debug)]
pub(crate) struct Registry<B, X> {
    machines: Mutex<BTreeMap<String, MachineHandle<B, X>>>,
}

impl<B, X> Registry<B, X> {
    fn new() -> Self {
        Self {
            machines: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, MachineHandle<B, X>>> {
        self.machines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, id: String, machine: MachineHandle<B, X>) {
        self.lock().insert(id, machine);
    }

    pub(crate) fn deregister(&self, id: &str) {
        self.lock().remove(id);
    }

    fn snapshot(&self) -> Vec<MachineHandle<B, X>> {
        self.lock().values().cloned().collect()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

/// A set of machines provisioned through one backend.
#[derive(Debug)]
pub struct Cluster<B, X> {
    name: String,
    backend: Arc<B>,
    executor: Arc<X>,
    ctx: RuntimeContext,
    output: Dir,
    registry: Arc<Registry<B, X>>,
}

impl<B, X> Cluster<B, X>
where
    B: Backend,
    X: RemoteExecutor,
{
    /// Creates a cluster, creating `ctx.output_dir` if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Output`] when the output directory cannot be
    /// created or opened.
    pub fn new(
        name: impl Into<String>,
        backend: Arc<B>,
        executor: Arc<X>,
        ctx: RuntimeContext,
    ) -> Result<Self, ClusterError> {
        let output_err = |err: std::io::Error| ClusterError::Output {
            path: ctx.output_dir.to_string(),
            message: err.to_string(),
        };
        Dir::create_ambient_dir_all(&ctx.output_dir, ambient_authority()).map_err(output_err)?;
        let output =
            Dir::open_ambient_dir(&ctx.output_dir, ambient_authority()).map_err(output_err)?;
        Ok(Self {
            name: name.into(),
            backend,
            executor,
            ctx,
            output,
            registry: Arc::new(Registry::new()),
        })
    }

    /// Cluster name, used as the prefix of machine names.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runtime context shared by every machine.
    #[must_use]
    pub const fn context(&self) -> &RuntimeContext {
        &self.ctx
    }

    /// Backend used to create machines.
    #[must_use]
    pub const fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Applies the backend's user-data substitutions, queues the context's
    /// SSH keys and renders for the context's platform.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfError`] raised while rendering.
    pub fn render_user_data(&self, doc: &ConfigDocument) -> Result<RenderedConfig, ConfError> {
        let substituted = self
            .backend
            .user_data_substitutions()
            .iter()
            .fold(doc.clone(), |acc, (old, new)| acc.with_substitution(old, new));
        substituted
            .with_keys(self.ctx.ssh_keys.iter().cloned())
            .render(self.ctx.platform)
    }

    /// Provisions and registers a machine booting with `doc`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Config`] when `doc` cannot be rendered,
    /// otherwise whatever the provisioning session returns.
    pub async fn new_machine(
        &self,
        doc: &ConfigDocument,
    ) -> Result<MachineHandle<B, X>, ProvisionError<B::Error>> {
        self.new_machine_with_cancel(doc, CancellationToken::new())
            .await
    }

    /// Like [`Cluster::new_machine`], observing `cancel` while provisioning.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Cancelled`] when `cancel` fires, otherwise
    /// as [`Cluster::new_machine`].
    pub async fn new_machine_with_cancel(
        &self,
        doc: &ConfigDocument,
        cancel: CancellationToken,
    ) -> Result<MachineHandle<B, X>, ProvisionError<B::Error>> {
        let rendered = self.render_user_data(doc)?;
        let user_data = rendered.to_bytes()?;
        let name = self.machine_name();

        let provisioned = ProvisioningSession::new(
            self.backend.as_ref(),
            self.executor.as_ref(),
            &self.ctx,
            &self.output,
            name,
            user_data,
        )
        .with_cancellation(cancel)
        .run()
        .await?;

        let id = provisioned.device.id.clone();
        let machine = Arc::new(Machine::new(
            provisioned,
            Arc::clone(&self.backend),
            Arc::clone(&self.executor),
            &self.ctx,
            Arc::downgrade(&self.registry),
        ));
        self.registry.register(id, Arc::clone(&machine));
        Ok(machine)
    }

    /// Snapshot of the registered machines, ordered by id.
    #[must_use]
    pub fn machines(&self) -> Vec<MachineHandle<B, X>> {
        self.registry.snapshot()
    }

    /// Number of registered machines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// Returns `true` when no machine is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Destroys every registered machine, then releases backend resources.
    ///
    /// Every machine is attempted even when earlier ones fail.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Incomplete`] listing each failure.
    pub async fn destroy(&self) -> Result<TeardownSummary, ClusterError> {
        let mut summary = TeardownSummary::default();
        let mut failures = Vec::new();
        for machine in self.registry.snapshot() {
            match machine.destroy().await {
                Ok(()) => summary.destroyed.push(machine.id().to_owned()),
                Err(err) => {
                    warn!(parent: &self.ctx.span, id = %machine.id(), error = %err, "failed to destroy machine");
                    failures.push((machine.id().to_owned(), error_chain(&err)));
                }
            }
        }

        let release = match self.backend.release().await {
            Ok(()) => None,
            Err(err) => {
                warn!(parent: &self.ctx.span, error = %err, "failed to release backend resources");
                Some(error_chain(&err))
            }
        };

        if failures.is_empty() && release.is_none() {
            info!(parent: &self.ctx.span, cluster = %self.name, machines = summary.destroyed.len(), "cluster destroyed");
            return Ok(summary);
        }
        Err(ClusterError::Incomplete { failures, release })
    }

    /// `<first 13 chars of the cluster name>-<10 hex chars>`.
    fn machine_name(&self) -> String {
        let prefix: String = self.name.chars().take(NAME_PREFIX_LEN).collect();
        let suffix: String = Uuid::new_v4()
            .as_bytes()
            .iter()
            .take(NAME_SUFFIX_BYTES)
            .map(|byte| format!("{byte:02x}"))
            .collect();
        format!("{prefix}-{suffix}")
    }
}

fn describe_incomplete(failures: &[(String, String)], release: Option<&str>) -> String {
    let mut message = format!("{} machine(s) failed to tear down", failures.len());
    if let Some(err) = release {
        message.push_str(", release failed: ");
        message.push_str(err);
    }
    message
}

/// Renders an error with its sources, separated by `: `.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

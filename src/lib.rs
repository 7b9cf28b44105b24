//! Core library for the Harrier test-machine harness.
//!
//! The crate renders boot configurations (Ignition, cloud-config or shell
//! scripts) for disposable machines, provisions those machines through a
//! backend abstraction with bounded retries, and tears them down while
//! keeping their serial console and systemd journal on disk. A Scaleway
//! backend is included.

pub mod backend;
pub mod cluster;
pub mod conf;
pub mod config;
pub mod console;
pub mod context;
pub mod journal;
pub mod machine;
pub mod remote;
pub mod scaleway;
pub mod session;
pub mod test_support;

pub use backend::{Backend, BackendFuture, CreateRequest, Device, MachineAddresses};
pub use cluster::{Cluster, ClusterError, TeardownSummary};
pub use conf::{ConfError, ConfigDocument, ConfigKind, Platform, RenderedConfig};
pub use config::{ConfigError, HarnessConfig, ScalewayConfig};
pub use context::RuntimeContext;
pub use machine::{Machine, MachineError, MachineHandle};
pub use remote::{
    RemoteCommandOutput, RemoteError, RemoteExecutor, SshConfig, SshCredentials, SshExecutor,
};
pub use scaleway::{ScalewayBackend, ScalewayBackendError};
pub use session::{ProvisionError, ProvisionedMachine, ProvisioningSession, SessionState};

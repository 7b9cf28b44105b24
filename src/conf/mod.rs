//! Boot configuration documents, rendering and mutation.
//!
//! A [`ConfigDocument`] holds raw text of some [`ConfigKind`]. Rendering it
//! produces a [`RenderedConfig`] with exactly one schema populated, which can
//! then be mutated through a uniform set of operations before being handed to
//! a backend as user data.
//!
//! ```
//! use harrier::conf::{ConfigDocument, Platform, Variant};
//!
//! let document = ConfigDocument::unknown(r#"{"ignition": {"version": "2.2.0"}}"#);
//! let mut config = document.render(Platform::Unspecified)?;
//! config.add_file("/etc/hostname", "root", "worker", 0o644)?;
//! assert_eq!(config.variant(), Variant::IgnitionV2_2);
//! # Ok::<(), harrier::conf::ConfError>(())
//! ```

pub mod cloud_config;
pub mod dataurl;
mod document;
mod error;
pub mod ignition;
mod keys;
mod mutator;
mod platform;
mod render;
mod rendered;
pub mod script;
mod source;
mod transpile;

#[cfg(test)]
mod tests;

pub use cloud_config::CloudConfig;
pub use document::{ConfigDocument, ConfigKind};
pub use error::{ConfError, ValidationReport};
pub use keys::AuthorizedKey;
pub use mutator::{ConfigMutator, ConfigSummary, DropinView, FileView, Operation, UnitView, Variant};
pub use platform::{DynamicValue, Platform, UnknownPlatformError};
pub use render::render;
pub use rendered::RenderedConfig;
pub use script::Script;
pub use source::{UserDataSourceError, resolve_user_data};
pub use transpile::transpile;

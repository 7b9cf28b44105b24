//! Ignition spec 2.1.

use super::ParseError;
use super::v2x::{self, SpecMinor};
use crate::conf::mutator::Variant;

pub use super::v2x::{File, Storage, Systemd, Unit};

/// Marker selecting spec 2.1.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Spec;

impl SpecMinor for Spec {
    const MINOR: u64 = 1;
    const VERSION: &'static str = "2.1.0";
    const VARIANT: Variant = Variant::IgnitionV2_1;
}

/// Top-level 2.1 document.
pub type Config = v2x::Config<Spec>;

/// Parses a 2.x document with minor version up to 1.
pub(crate) fn parse(text: &str) -> Result<Config, ParseError> {
    v2x::parse(text)
}

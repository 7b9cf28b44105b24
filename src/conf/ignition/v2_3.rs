//! Ignition spec 2.3.

use super::ParseError;
use super::v2x::{self, SpecMinor};
use crate::conf::mutator::Variant;

pub use super::v2x::{File, Storage, Systemd, Unit};

/// Marker selecting spec 2.3.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Spec;

impl SpecMinor for Spec {
    const MINOR: u64 = 3;
    const VERSION: &'static str = "2.3.0";
    const VARIANT: Variant = Variant::IgnitionV2_3;
}

/// Top-level 2.3 document.
pub type Config = v2x::Config<Spec>;

/// Parses a 2.x document with minor version up to 3.
pub(crate) fn parse(text: &str) -> Result<Config, ParseError> {
    v2x::parse(text)
}

//! Kind detection and rendering of raw documents.

use serde_json::Value;
use tracing::debug;

use super::cloud_config;
use super::document::{ConfigDocument, ConfigKind};
use super::ignition::{self, ParseError, v1, v2_0, v2_1, v2_2, v2_3, v3_0};
use super::mutator::Variant;
use super::platform::Platform;
use super::rendered::RenderedConfig;
use super::script::Script;
use super::transpile::transpile;
use super::ConfError;

const SHEBANG: &str = "#!";

type NativeParser = fn(&str) -> Result<RenderedConfig, ParseError>;

/// Versioned parsers, oldest first. Later 2.x parsers also accept older 2.x
/// documents, so the order decides which variant a document lands in.
const NATIVE_PARSERS: [(Variant, NativeParser); 6] = [
    (Variant::IgnitionV1, |text| {
        v1::parse(text).map(RenderedConfig::IgnitionV1)
    }),
    (Variant::IgnitionV2_0, |text| {
        v2_0::parse(text).map(RenderedConfig::IgnitionV2_0)
    }),
    (Variant::IgnitionV2_1, |text| {
        v2_1::parse(text).map(RenderedConfig::IgnitionV2_1)
    }),
    (Variant::IgnitionV2_2, |text| {
        v2_2::parse(text).map(RenderedConfig::IgnitionV2_2)
    }),
    (Variant::IgnitionV2_3, |text| {
        v2_3::parse(text).map(RenderedConfig::IgnitionV2_3)
    }),
    (Variant::IgnitionV3_0, |text| {
        v3_0::parse(text).map(RenderedConfig::IgnitionV3_0)
    }),
];

/// Renders `document` for `platform` and injects its pending keys.
///
/// Keys are injected after parsing or transpiling. An empty result has nowhere
/// to put them, so injection is skipped.
///
/// # Errors
///
/// Returns the [`ConfError`] raised while detecting, parsing, transpiling or
/// injecting keys.
pub fn render(document: &ConfigDocument, platform: Platform) -> Result<RenderedConfig, ConfError> {
    let mut rendered = render_kind(document.kind(), document.data(), platform)?;
    let keys = document.pending_keys();
    if !rendered.is_empty() && !keys.is_empty() {
        rendered.copy_keys(keys)?;
    }
    debug!(
        kind = ?document.kind(),
        variant = %rendered.variant(),
        keys = keys.len(),
        "rendered boot configuration"
    );
    Ok(rendered)
}

fn render_kind(
    kind: ConfigKind,
    text: &str,
    platform: Platform,
) -> Result<RenderedConfig, ConfError> {
    match kind {
        ConfigKind::Empty => Ok(RenderedConfig::Empty),
        ConfigKind::Script => Ok(RenderedConfig::Script(Script::new(text))),
        ConfigKind::CloudConfig => cloud_config::parse(text).map(RenderedConfig::CloudConfig),
        ConfigKind::Transpiled => transpile(text, platform).map(RenderedConfig::IgnitionV3_0),
        ConfigKind::Native => render_native(text),
        ConfigKind::Unknown => detect(text, platform),
    }
}

fn detect(text: &str, platform: Platform) -> Result<RenderedConfig, ConfError> {
    if let Ok(value) = serde_json::from_str::<Value>(text)
        && ignition::has_version_marker(&value)
    {
        return render_native(text);
    }
    if text.trim().is_empty() {
        return Ok(RenderedConfig::Empty);
    }
    if cloud_config::has_header(text) {
        return cloud_config::parse(text).map(RenderedConfig::CloudConfig);
    }
    if text.starts_with(SHEBANG) {
        return Ok(RenderedConfig::Script(Script::new(text)));
    }
    transpile(text, platform).map(RenderedConfig::IgnitionV3_0)
}

/// Tries each versioned parser in order. A parser that recognises the version
/// but rejects the document ends the cascade.
fn render_native(text: &str) -> Result<RenderedConfig, ConfError> {
    for (variant, parse) in NATIVE_PARSERS {
        match parse(text) {
            Ok(rendered) => return Ok(rendered),
            Err(ParseError::UnknownVersion) => {}
            Err(err) => return Err(err.into_conf_error(variant)),
        }
    }
    Err(ConfError::UnknownVersion)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn render_unknown(text: &str) -> Result<RenderedConfig, ConfError> {
        render(&ConfigDocument::unknown(text), Platform::Unspecified)
    }

    #[rstest]
    #[case(r#"{"ignitionVersion": 1}"#, Variant::IgnitionV1)]
    #[case(r#"{"ignition": {"version": "2.0.0"}}"#, Variant::IgnitionV2_0)]
    #[case(r#"{"ignition": {"version": "2.1.0"}}"#, Variant::IgnitionV2_1)]
    #[case(r#"{"ignition": {"version": "2.2.0"}}"#, Variant::IgnitionV2_2)]
    #[case(r#"{"ignition": {"version": "2.3.0"}}"#, Variant::IgnitionV2_3)]
    #[case(r#"{"ignition": {"version": "3.0.0"}}"#, Variant::IgnitionV3_0)]
    #[case("", Variant::Empty)]
    #[case("  \n", Variant::Empty)]
    #[case("#cloud-config\nhostname: a\n", Variant::CloudConfig)]
    #[case("#!/bin/bash\necho hi\n", Variant::Script)]
    #[case("systemd:\n  units:\n    - name: a.service\n", Variant::IgnitionV3_0)]
    fn detects_kind_by_content(#[case] text: &str, #[case] expected: Variant) {
        let rendered = render_unknown(text).expect("render");
        assert_eq!(rendered.variant(), expected);
    }

    #[rstest]
    fn older_v2_document_keeps_its_version() {
        let rendered =
            render_unknown(r#"{"ignition": {"version": "2.1.0"}}"#).expect("render");
        let json = rendered.serialize().expect("serialize");
        assert!(json.contains(r#""version":"2.1.0""#), "{json}");
    }

    #[rstest]
    fn unknown_version_is_reported() {
        let err = render_unknown(r#"{"ignition": {"version": "9.0.0"}}"#).expect_err("unknown");
        assert_eq!(err, ConfError::UnknownVersion);
    }

    #[rstest]
    fn invalid_native_document_is_fatal() {
        let text = r#"{"ignition": {"version": "2.2.0"}, "storage": {"files": [{"filesystem": "root", "path": "relative", "contents": {"source": "data:,x"}}]}}"#;
        let err = render_unknown(text).expect_err("invalid");
        let ConfError::Invalid { variant, report } = err else {
            panic!("expected validation failure, got {err:?}");
        };
        assert_eq!(variant, Variant::IgnitionV2_2);
        assert!(!report.is_clean());
    }

    #[rstest]
    fn explicit_native_rejects_non_json() {
        let err = render(&ConfigDocument::native("#!/bin/sh"), Platform::Unspecified)
            .expect_err("not json");
        assert!(matches!(err, ConfError::Parse { .. }), "{err}");
    }

    #[rstest]
    fn explicit_cloud_config_requires_header() {
        let err = render(
            &ConfigDocument::cloud_config("hostname: a\n"),
            Platform::Unspecified,
        )
        .expect_err("missing header");
        assert!(matches!(err, ConfError::Parse { .. }), "{err}");
    }

    #[rstest]
    fn explicit_empty_ignores_text() {
        let rendered = render(
            &ConfigDocument::empty().with_substitution("", "ignored"),
            Platform::Unspecified,
        )
        .expect("render");
        assert!(rendered.is_empty());
    }

    #[rstest]
    fn keys_are_skipped_for_empty_result() {
        let key = "ssh-ed25519 AAAA a".parse().expect("key");
        let rendered = render(&ConfigDocument::unknown("").with_key(key), Platform::Unspecified)
            .expect("render");
        assert!(rendered.is_empty());
    }

    #[rstest]
    fn keys_land_in_transpiled_output() {
        let key = "ssh-ed25519 AAAA a".parse().expect("key");
        let document = ConfigDocument::transpiled("storage: {}\n").with_key(key);
        let rendered = render(&document, Platform::Unspecified).expect("render");
        assert_eq!(rendered.variant(), Variant::IgnitionV3_0);
        assert_eq!(rendered.summary().authorized_keys, vec!["ssh-ed25519 AAAA a"]);
    }
}

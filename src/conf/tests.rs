//! Behaviour shared by every configuration variant.

use rstest::{fixture, rstest};

use super::*;

const V1: &str = r#"{"ignitionVersion": 1}"#;
const V2_0: &str = r#"{"ignition": {"version": "2.0.0"}}"#;
const V2_1: &str = r#"{"ignition": {"version": "2.1.0"}}"#;
const V2_2: &str = r#"{"ignition": {"version": "2.2.0"}}"#;
const V2_3: &str = r#"{"ignition": {"version": "2.3.0"}}"#;
const V3_0: &str = r#"{"ignition": {"version": "3.0.0"}}"#;
const CLOUD_CONFIG: &str = "#cloud-config\n";
const CLC: &str = "passwd:\n  users:\n    - name: core\n";

fn key(comment: &str) -> AuthorizedKey {
    AuthorizedKey::new("ssh-ed25519", comment.as_bytes().to_vec(), comment)
}

#[fixture]
fn key1() -> AuthorizedKey {
    key("key1")
}

fn rendered(text: &str) -> RenderedConfig {
    ConfigDocument::unknown(text)
        .render(Platform::Unspecified)
        .expect("render")
}

#[rstest]
#[case(V1, Variant::IgnitionV1)]
#[case(V2_0, Variant::IgnitionV2_0)]
#[case(V2_1, Variant::IgnitionV2_1)]
#[case(V2_2, Variant::IgnitionV2_2)]
#[case(V2_3, Variant::IgnitionV2_3)]
#[case(V3_0, Variant::IgnitionV3_0)]
fn cascade_picks_the_oldest_accepting_parser(#[case] text: &str, #[case] expected: Variant) {
    for _ in 0..3 {
        assert_eq!(rendered(text).variant(), expected);
    }
}

#[rstest]
#[case(V1)]
#[case(V2_0)]
#[case(V2_1)]
#[case(V2_2)]
#[case(V2_3)]
#[case(V3_0)]
#[case(CLOUD_CONFIG)]
#[case(CLC)]
fn declarative_mutations_are_equivalent(#[case] text: &str) {
    let mut config = rendered(text);
    config
        .add_file("/etc/hostname", "root", "worker\n", 0o644)
        .expect("add file");
    config
        .add_systemd_unit("app.service", "[Service]\nExecStart=/bin/true\n", true)
        .expect("add unit");
    config
        .add_systemd_unit_dropin("app.service", "10-env.conf", "[Service]\nEnvironment=A=1\n")
        .expect("add drop-in");
    config
        .copy_keys(&[key("a"), key("b")])
        .expect("copy keys");

    let summary = config.summary();
    let files = summary.files_at("/etc/hostname");
    assert_eq!(files.len(), 1, "{summary:?}");
    assert_eq!(files[0].contents, b"worker\n");
    assert_eq!(files[0].mode, Some(0o644));

    let units = summary.units_named("app.service");
    assert_eq!(units.len(), 1, "{summary:?}");
    assert!(units[0].enabled);
    assert_eq!(
        units[0].contents.as_deref(),
        Some("[Service]\nExecStart=/bin/true\n")
    );
    assert_eq!(units[0].dropins.len(), 1);
    assert_eq!(units[0].dropins[0].name, "10-env.conf");

    assert_eq!(
        summary.authorized_keys,
        vec![key("a").to_line(), key("b").to_line()]
    );
}

#[rstest]
#[case(V1)]
#[case(V2_2)]
#[case(V3_0)]
#[case(CLOUD_CONFIG)]
fn copy_keys_appends_in_order(#[case] text: &str) {
    let mut config = rendered(text);
    config.copy_keys(&[key("a"), key("b")]).expect("first batch");
    config.copy_keys(&[key("c")]).expect("second batch");
    assert_eq!(
        config.summary().authorized_keys,
        vec![key("a").to_line(), key("b").to_line(), key("c").to_line()]
    );
}

#[rstest]
#[case::v1(V1, 2)]
#[case::v2_0(V2_0, 2)]
#[case::v2_2(V2_2, 2)]
#[case::cloud_config(CLOUD_CONFIG, 2)]
#[case::v3_0_merges_by_key(V3_0, 1)]
fn units_are_not_deduplicated(#[case] text: &str, #[case] expected: usize) {
    let mut config = rendered(text);
    config.add_systemd_unit("a.service", "one", true).expect("first");
    config.add_systemd_unit("a.service", "two", false).expect("second");
    config.add_file("/etc/x", "root", "one", 0o644).expect("first file");
    config.add_file("/etc/x", "root", "two", 0o600).expect("second file");

    let summary = config.summary();
    let units = summary.units_named("a.service");
    let files = summary.files_at("/etc/x");
    assert_eq!(units.len(), expected);
    assert_eq!(files.len(), expected);
    let last_unit = units.last().expect("unit");
    let last_file = files.last().expect("file");
    assert_eq!(last_unit.contents.as_deref(), Some("two"));
    assert!(!last_unit.enabled);
    assert_eq!(last_file.contents, b"two");
    assert_eq!(last_file.mode, Some(0o600));
}

#[rstest]
#[case::v1(V1)]
#[case::v2_0(V2_0)]
#[case::v2_3(V2_3)]
#[case::v3_0(V3_0)]
#[case::cloud_config(CLOUD_CONFIG)]
fn dropin_for_missing_unit_creates_bare_entry(#[case] text: &str) {
    let mut config = rendered(text);
    config
        .add_systemd_unit_dropin("b.service", "10.conf", "[Service]\n")
        .expect("add dropin");

    assert_eq!(
        config.summary().units_named("b.service"),
        vec![&UnitView {
            name: String::from("b.service"),
            contents: None,
            enabled: false,
            dropins: vec![DropinView {
                name: String::from("10.conf"),
                contents: String::from("[Service]\n"),
            }],
        }]
    );
}

#[rstest]
#[case::v1(V1)]
#[case::v2_0(V2_0)]
#[case::v2_3(V2_3)]
#[case::cloud_config(CLOUD_CONFIG)]
fn dropin_attaches_to_first_unit_with_the_name(#[case] text: &str) {
    let mut config = rendered(text);
    config.add_systemd_unit("a.service", "one", true).expect("first");
    config.add_systemd_unit("a.service", "two", true).expect("second");
    config
        .add_systemd_unit_dropin("a.service", "10.conf", "[Unit]\n")
        .expect("add dropin");

    let summary = config.summary();
    let units = summary.units_named("a.service");
    assert_eq!(units.len(), 2);
    assert_eq!(units[0].contents.as_deref(), Some("one"));
    assert_eq!(units[0].dropins.len(), 1);
    assert!(units[1].dropins.is_empty());
}

#[rstest]
#[case::newest_native(V3_0, Variant::IgnitionV3_0)]
#[case::v2_2(V2_2, Variant::IgnitionV2_2)]
fn hostname_and_key_survive_serialization(
    key1: AuthorizedKey,
    #[case] text: &str,
    #[case] variant: Variant,
) {
    let mut config = ConfigDocument::native(text)
        .render(Platform::Unspecified)
        .expect("render");
    config
        .add_file("/etc/hostname", "root", "worker-1", 0o644)
        .expect("add file");
    config.copy_keys(&[key1.clone()]).expect("copy keys");

    let json = config.serialize().expect("serialize");
    assert_eq!(json.matches("/etc/hostname").count(), 1, "{json}");
    let reparsed = rendered(&json);
    assert_eq!(reparsed.variant(), variant);
    let summary = reparsed.summary();
    let files = summary.files_at("/etc/hostname");
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].contents, b"worker-1");
    assert_eq!(files[0].mode, Some(0o644));
    assert_eq!(summary.authorized_keys, vec![key1.to_line()]);
    assert!(reparsed.is_valid());
}

#[rstest]
fn script_only_accepts_keys(key1: AuthorizedKey) {
    let mut config = ConfigDocument::unknown("#!/bin/sh\necho '@SSH_KEYS@'\n")
        .with_key(key1.clone())
        .render(Platform::Unspecified)
        .expect("render");
    assert_eq!(
        config.serialize().expect("serialize"),
        format!("#!/bin/sh\necho '{}'\n", key1.to_line())
    );
    for err in [
        config.add_file("/etc/motd", "root", "", 0o644),
        config.add_systemd_unit("a.service", "", true),
        config.add_systemd_unit_dropin("a.service", "a.conf", ""),
    ] {
        assert!(
            matches!(
                err,
                Err(ConfError::Unsupported {
                    variant: Variant::Script,
                    ..
                })
            ),
            "{err:?}"
        );
    }
}

#[rstest]
fn empty_config_is_unrendered() {
    let mut config = rendered("");
    let err = config
        .add_systemd_unit("a.service", "", true)
        .expect_err("unrendered");
    assert_eq!(err, ConfError::Unrendered);
    assert!(err.is_programming_error());
}

#[rstest]
fn v1_rejects_foreign_root_filesystem() {
    let text = r#"{"ignitionVersion": 1, "storage": {"filesystems": [{"device": "/dev/sdb1", "format": "xfs"}]}}"#;
    let mut config = rendered(text);
    let err = config
        .add_file("/etc/motd", "root", "hi", 0o644)
        .expect_err("foreign device");
    assert!(err.is_programming_error(), "{err}");
}

#[rstest]
fn capability_table_matches_dispatch() {
    let config = rendered(V3_0);
    assert!(config.capabilities().contains(&Operation::Merge));
    let config = rendered(V2_3);
    assert!(!config.capabilities().contains(&Operation::Merge));
    assert!(RenderedConfig::Empty.capabilities().is_empty());
}

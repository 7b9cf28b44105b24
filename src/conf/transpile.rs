//! Container Linux Config to Ignition v3.0 transpiler.
//!
//! Only the subset the harness relies on is converted: files on the root
//! filesystem, systemd units and drop-ins, networkd units and the users'
//! authorized keys. Everything else is reported and ignored.

use std::collections::BTreeMap;

use heck::ToLowerCamelCase;
use serde::{Deserialize, Deserializer};
use serde_yaml::Value;
use tracing::warn;

use super::ConfError;
use super::dataurl;
use super::ignition::v3_0::{self, Dropin, File, FileContents, Unit};
use super::ignition::{Extra, PasswdUser};
use super::platform::{DynamicValue, Platform};

const FORMAT: &str = "Container Linux Config";
const ROOT_FILESYSTEM: &str = "root";
const NETWORKD_DIR: &str = "/etc/systemd/network";
const NETWORKD_MODE: u32 = 0o644;
const METADATA_DROPIN: &str = "20-clct-metadata.conf";
const METADATA_DROPIN_CONTENTS: &str = "[Unit]\nRequires=coreos-metadata.service\nAfter=coreos-metadata.service\n\n[Service]\nEnvironmentFile=/run/metadata/coreos\n";

#[derive(Debug, Default, Deserialize)]
struct Document {
    #[serde(default)]
    storage: Storage,
    #[serde(default)]
    systemd: Systemd,
    #[serde(default)]
    networkd: Networkd,
    #[serde(default)]
    passwd: Passwd,
    #[serde(flatten)]
    other: BTreeMap<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct Storage {
    #[serde(default)]
    files: Vec<StorageFile>,
    #[serde(flatten)]
    other: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct StorageFile {
    path: String,
    #[serde(default)]
    filesystem: Option<String>,
    #[serde(default)]
    contents: Option<Contents>,
    #[serde(default, deserialize_with = "mode_from_yaml")]
    mode: Option<u32>,
    #[serde(default)]
    overwrite: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct Contents {
    #[serde(default)]
    inline: Option<String>,
    #[serde(default)]
    remote: Option<Remote>,
}

#[derive(Debug, Deserialize)]
struct Remote {
    url: String,
}

#[derive(Debug, Default, Deserialize)]
struct Systemd {
    #[serde(default)]
    units: Vec<SystemdUnit>,
}

#[derive(Debug, Deserialize)]
struct SystemdUnit {
    name: String,
    #[serde(default)]
    enable: Option<bool>,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    mask: Option<bool>,
    #[serde(default)]
    contents: Option<String>,
    #[serde(default)]
    dropins: Vec<SystemdDropin>,
}

#[derive(Debug, Deserialize)]
struct SystemdDropin {
    name: String,
    #[serde(default)]
    contents: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Networkd {
    #[serde(default)]
    units: Vec<NetworkdUnit>,
}

#[derive(Debug, Deserialize)]
struct NetworkdUnit {
    name: String,
    #[serde(default)]
    contents: String,
}

#[derive(Debug, Default, Deserialize)]
struct Passwd {
    #[serde(default)]
    users: Vec<User>,
}

#[derive(Debug, Deserialize)]
struct User {
    name: String,
    #[serde(default)]
    ssh_authorized_keys: Vec<String>,
    #[serde(flatten)]
    other: BTreeMap<String, Value>,
}

fn mode_from_yaml<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => number
            .as_u64()
            .and_then(|value| u32::try_from(value).ok())
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("invalid file mode {number}"))),
        Some(Value::String(text)) => {
            let digits = text.strip_prefix("0o").unwrap_or(&text);
            u32::from_str_radix(digits, 8)
                .map(Some)
                .map_err(|err| D::Error::custom(format!("invalid file mode {text:?}: {err}")))
        }
        Some(other) => Err(D::Error::custom(format!("invalid file mode {other:?}"))),
    }
}

/// Converts a Container Linux Config into an Ignition v3.0 document.
///
/// # Errors
///
/// Returns [`ConfError::Parse`] when the YAML is malformed and
/// [`ConfError::Transpile`] when the document uses features that cannot be
/// expressed for `platform`.
pub fn transpile(text: &str, platform: Platform) -> Result<v3_0::Config, ConfError> {
    let document = parse(text)?;
    Transpiler { platform }.convert(document)
}

fn parse(text: &str) -> Result<Document, ConfError> {
    let parse_error = |message: String| ConfError::Parse {
        format: FORMAT,
        message,
    };
    let value: Value = serde_yaml::from_str(text).map_err(|err| parse_error(err.to_string()))?;
    match value {
        Value::Null => Ok(Document::default()),
        Value::Mapping(_) => {
            serde_yaml::from_value(value).map_err(|err| parse_error(err.to_string()))
        }
        _ => Err(parse_error(String::from(
            "expected a mapping at the top level",
        ))),
    }
}

struct Transpiler {
    platform: Platform,
}

impl Transpiler {
    fn convert(&self, document: Document) -> Result<v3_0::Config, ConfError> {
        warn_ignored("", &document.other);
        warn_ignored("storage.", &document.storage.other);

        let mut config = v3_0::Config::default();
        for file in document.storage.files {
            config.storage.files.push(self.file(file)?);
        }
        for unit in document.networkd.units {
            config.storage.files.push(networkd_file(unit));
        }
        for unit in document.systemd.units {
            config.systemd.units.push(self.unit(unit)?);
        }
        for user in document.passwd.users {
            config.passwd.users.push(user_entry(user));
        }
        Ok(config)
    }

    fn file(&self, file: StorageFile) -> Result<File, ConfError> {
        if let Some(filesystem) = file.filesystem.as_deref()
            && filesystem != ROOT_FILESYSTEM
        {
            return Err(self.error(format!(
                "file {} targets filesystem {filesystem:?}; only {ROOT_FILESYSTEM:?} is supported",
                file.path
            )));
        }
        let source = match file.contents {
            None => None,
            Some(Contents {
                inline: Some(_),
                remote: Some(_),
            }) => {
                return Err(self.error(format!(
                    "file {} sets both inline and remote contents",
                    file.path
                )));
            }
            Some(Contents {
                inline: Some(inline),
                ..
            }) => Some(dataurl::encode(inline.as_bytes())),
            Some(Contents {
                remote: Some(remote),
                ..
            }) => Some(remote.url),
            Some(_) => None,
        };
        Ok(File {
            path: file.path,
            overwrite: file.overwrite,
            contents: source.map(|source| FileContents {
                source: Some(source),
                other: Extra::new(),
            }),
            mode: file.mode,
            other: Extra::new(),
        })
    }

    fn unit(&self, unit: SystemdUnit) -> Result<Unit, ConfError> {
        let mut uses_metadata = false;
        let contents = match unit.contents {
            Some(text) => Some(self.substitute(&text, &mut uses_metadata)?),
            None => None,
        };
        let mut dropins = Vec::with_capacity(unit.dropins.len() + 1);
        for dropin in unit.dropins {
            let contents = match dropin.contents {
                Some(text) => Some(self.substitute(&text, &mut uses_metadata)?),
                None => None,
            };
            dropins.push(Dropin {
                name: dropin.name,
                contents,
            });
        }
        if uses_metadata {
            dropins.push(Dropin {
                name: METADATA_DROPIN.to_owned(),
                contents: Some(METADATA_DROPIN_CONTENTS.to_owned()),
            });
        }
        Ok(Unit {
            name: unit.name,
            enabled: unit.enabled.or(unit.enable),
            mask: unit.mask,
            contents,
            dropins,
        })
    }

    fn substitute(&self, text: &str, uses_metadata: &mut bool) -> Result<String, ConfError> {
        let mut output = text.to_owned();
        for value in DynamicValue::ALL {
            if !output.contains(value.token()) {
                continue;
            }
            if self.platform == Platform::Unspecified {
                return Err(self.error(String::from(
                    "a platform must be specified to use dynamic data",
                )));
            }
            let variable = self.platform.metadata_variable(value).ok_or_else(|| {
                self.error(format!(
                    "platform {} does not provide {}",
                    self.platform,
                    value.token()
                ))
            })?;
            output = output.replace(value.token(), &format!("${{{variable}}}"));
            *uses_metadata = true;
        }
        Ok(output)
    }

    fn error(&self, message: String) -> ConfError {
        ConfError::Transpile {
            platform: self.platform.to_string(),
            message,
        }
    }
}

fn networkd_file(unit: NetworkdUnit) -> File {
    File {
        path: format!("{NETWORKD_DIR}/{}", unit.name),
        overwrite: None,
        contents: Some(FileContents {
            source: Some(dataurl::encode(unit.contents.as_bytes())),
            other: Extra::new(),
        }),
        mode: Some(NETWORKD_MODE),
        other: Extra::new(),
    }
}

fn user_entry(user: User) -> PasswdUser {
    let other = user
        .other
        .into_iter()
        .filter_map(|(key, value)| match serde_json::to_value(value) {
            Ok(json) => Some((key.to_lower_camel_case(), json)),
            Err(err) => {
                warn!(user = %user.name, key = %key, error = %err, "dropping user field");
                None
            }
        })
        .collect();
    PasswdUser {
        name: user.name,
        ssh_authorized_keys: user.ssh_authorized_keys,
        other,
    }
}

fn warn_ignored(prefix: &str, keys: &BTreeMap<String, Value>) {
    for key in keys.keys() {
        warn!(section = %format!("{prefix}{key}"), "ignoring unsupported Container Linux Config section");
    }
}

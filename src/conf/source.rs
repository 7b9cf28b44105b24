//! Loading raw user-data from an inline value or a file.
//!
//! Callers may hand the harness a document directly or point it at a file on
//! disk. Both paths end up as text fed to [`ConfigDocument::from_sources`].
//!
//! [`ConfigDocument::from_sources`]: super::ConfigDocument::from_sources

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

use crate::remote::expand_tilde;

/// Errors raised while loading user-data.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum UserDataSourceError {
    /// Raised when both inline and file sources are provided.
    #[error("user-data cannot be provided both inline and via file")]
    BothProvided,
    /// Raised when an inline payload is only whitespace.
    #[error("inline user-data must not be blank")]
    InlineEmpty,
    /// Raised when a file path is empty or only whitespace.
    #[error("user-data file path must not be empty")]
    FilePathEmpty,
    /// Raised when a file contains only whitespace.
    #[error("user-data file `{path}` must not be blank")]
    FileEmpty {
        /// Expanded path of the blank file.
        path: String,
    },
    /// Raised when reading the file source fails.
    #[error("failed to read user-data file `{path}`: {message}")]
    FileRead {
        /// Expanded path that failed to read.
        path: String,
        /// Underlying error message.
        message: String,
    },
}

/// Resolves user-data from either an inline value or a file.
///
/// Returns `Ok(None)` when neither source is given. The returned payload keeps
/// its original whitespace; only the emptiness check trims.
///
/// # Errors
///
/// Returns [`UserDataSourceError`] when both sources are set, either is blank
/// or the file cannot be read.
pub fn resolve_user_data(
    inline: Option<&str>,
    file: Option<&str>,
) -> Result<Option<String>, UserDataSourceError> {
    match (inline, file) {
        (Some(_), Some(_)) => Err(UserDataSourceError::BothProvided),
        (Some(payload), None) => {
            if payload.trim().is_empty() {
                return Err(UserDataSourceError::InlineEmpty);
            }
            Ok(Some(payload.to_owned()))
        }
        (None, Some(path)) => read_file(path).map(Some),
        (None, None) => Ok(None),
    }
}

fn read_file(path: &str) -> Result<String, UserDataSourceError> {
    if path.trim().is_empty() {
        return Err(UserDataSourceError::FilePathEmpty);
    }
    let expanded = expand_tilde(path);
    let content =
        read_to_string_ambient(&expanded).map_err(|message| UserDataSourceError::FileRead {
            path: expanded.clone(),
            message,
        })?;
    if content.trim().is_empty() {
        return Err(UserDataSourceError::FileEmpty { path: expanded });
    }
    Ok(content)
}

fn read_to_string_ambient(path: &str) -> Result<String, String> {
    let path_buf = Utf8Path::new(path);
    let (dir_path, file_path) = if path_buf.is_absolute() {
        let parent = path_buf
            .parent()
            .ok_or_else(|| format!("path has no parent directory: {path_buf}"))?;
        let file_name = path_buf
            .file_name()
            .ok_or_else(|| format!("path has no file name: {path_buf}"))?;
        (parent, Utf8Path::new(file_name))
    } else {
        (Utf8Path::new("."), path_buf)
    };

    let dir =
        Dir::open_ambient_dir(dir_path, ambient_authority()).map_err(|err| err.to_string())?;
    dir.read_to_string(file_path).map_err(|err| err.to_string())
}

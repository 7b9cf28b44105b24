//! Incremental systemd journal capture.
//!
//! Each collection asks the machine for entries after the last seen cursor
//! and appends them to `journal.txt`, so a machine that reboots or is torn
//! down still leaves a complete log behind.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use cap_std::fs::OpenOptions;
use cap_std::fs_utf8::Dir;
use shell_escape::unix::escape;
use thiserror::Error;
use tracing::debug;

use crate::remote::{RemoteError, RemoteExecutor, SshCredentials, SshTarget};

/// Journal file name inside a machine directory.
pub const JOURNAL_FILE: &str = "journal.txt";

const CURSOR_PREFIX: &str = "-- cursor: ";
const BASE_COMMAND: &str = "journalctl --no-pager --output=short-precise --show-cursor";

/// Errors raised while collecting a journal.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum JournalError {
    /// Raised when the remote command could not run.
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// Raised when `journalctl` exits unsuccessfully.
    #[error("journalctl exited with status {status:?}: {stderr}")]
    Command {
        /// Exit status, if any.
        status: Option<i32>,
        /// Captured stderr.
        stderr: String,
    },
    /// Raised when the local journal file cannot be written or read.
    #[error("journal file error: {message}")]
    Io {
        /// Operating system error string.
        message: String,
    },
}

impl From<io::Error> for JournalError {
    fn from(err: io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

/// Journal recorder for one machine.
#[derive(Debug)]
pub struct Journal {
    dir: Dir,
    cursor: Mutex<Option<String>>,
    finished: AtomicBool,
}

impl Journal {
    /// Creates an empty `journal.txt` in `machine_dir`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised while creating the file.
    pub fn start(machine_dir: &Dir) -> Result<Self, JournalError> {
        machine_dir.write(JOURNAL_FILE, b"")?;
        Ok(Self {
            dir: machine_dir.try_clone()?,
            cursor: Mutex::new(None),
            finished: AtomicBool::new(false),
        })
    }

    fn cursor(&self) -> Result<Option<String>, JournalError> {
        self.cursor
            .lock()
            .map(|cursor| cursor.clone())
            .map_err(|_| JournalError::Io {
                message: String::from("journal cursor lock poisoned"),
            })
    }

    fn set_cursor(&self, value: String) -> Result<(), JournalError> {
        let mut cursor = self.cursor.lock().map_err(|_| JournalError::Io {
            message: String::from("journal cursor lock poisoned"),
        })?;
        *cursor = Some(value);
        Ok(())
    }

    /// Builds the collection command for the current cursor.
    fn command(cursor: Option<&str>) -> String {
        match cursor {
            None => BASE_COMMAND.to_owned(),
            Some(cursor) => format!("{BASE_COMMAND} --after-cursor={}", escape(cursor.into())),
        }
    }

    /// Appends entries written since the previous collection. Returns the
    /// number of bytes appended; a finalized journal appends nothing.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError`] when the command fails or the file cannot be
    /// written.
    pub async fn collect<X>(
        &self,
        executor: &X,
        target: SshTarget,
        credentials: &SshCredentials,
    ) -> Result<usize, JournalError>
    where
        X: RemoteExecutor + ?Sized,
    {
        if self.finished.load(Ordering::Acquire) {
            return Ok(0);
        }
        let command = Self::command(self.cursor()?.as_deref());
        let output = executor.run(target, credentials, &command).await?;
        if !output.is_success() {
            return Err(JournalError::Command {
                status: output.exit_code,
                stderr: output.stderr,
            });
        }

        let (entries, cursor) = split_cursor(&output.stdout);
        if !entries.is_empty() {
            let mut options = OpenOptions::new();
            options.append(true);
            let mut file = self.dir.open_with(JOURNAL_FILE, &options)?;
            file.write_all(entries.as_bytes())?;
        }
        if let Some(cursor) = cursor {
            self.set_cursor(cursor.to_owned())?;
        }
        debug!(bytes = entries.len(), "collected journal entries");
        Ok(entries.len())
    }

    /// Stops further collection.
    pub fn finalize(&self) {
        self.finished.store(true, Ordering::Release);
    }

    /// Returns `true` once [`Journal::finalize`] has run.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Reads everything collected so far.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised while reading the file.
    pub fn read(&self) -> Result<String, JournalError> {
        Ok(self.dir.read_to_string(JOURNAL_FILE)?)
    }
}

/// Splits `journalctl --show-cursor` output into entries and the trailing
/// cursor line.
fn split_cursor(stdout: &str) -> (&str, Option<&str>) {
    let trimmed = stdout.trim_end_matches('\n');
    let (body, last) = match trimmed.rfind('\n') {
        Some(index) => trimmed.split_at(index + 1),
        None => ("", trimmed),
    };
    match last.strip_prefix(CURSOR_PREFIX) {
        Some(cursor) => (body, Some(cursor.trim())),
        None => (stdout, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteCommandOutput;
    use crate::test_support::FakeExecutor;
    use camino::Utf8Path;
    use cap_std::ambient_authority;
    use rstest::rstest;
    use std::net::{IpAddr, Ipv4Addr};

    fn target() -> SshTarget {
        SshTarget {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 22,
        }
    }

    fn output(stdout: &str) -> RemoteCommandOutput {
        RemoteCommandOutput {
            exit_code: Some(0),
            stdout: stdout.to_owned(),
            stderr: String::new(),
        }
    }

    #[rstest]
    #[case("a\nb\n-- cursor: s=1\n", "a\nb\n", Some("s=1"))]
    #[case("-- cursor: s=2", "", Some("s=2"))]
    #[case("a\nb\n", "a\nb\n", None)]
    #[case("", "", None)]
    fn splits_trailing_cursor(
        #[case] stdout: &str,
        #[case] entries: &str,
        #[case] cursor: Option<&str>,
    ) {
        assert_eq!(split_cursor(stdout), (entries, cursor));
    }

    #[rstest]
    fn quotes_cursor_argument() {
        assert_eq!(
            Journal::command(Some("s=ab;i=1")),
            format!("{BASE_COMMAND} --after-cursor='s=ab;i=1'")
        );
    }

    #[rstest]
    #[tokio::test]
    async fn collections_resume_from_cursor() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = Dir::open_ambient_dir(
            Utf8Path::from_path(tmp.path()).expect("utf8"),
            ambient_authority(),
        )
        .expect("open dir");
        let executor = FakeExecutor::new();
        executor.push_output(output("boot 1\n-- cursor: c1\n"));
        executor.push_output(output("boot 2\n-- cursor: c2\n"));
        let credentials = SshCredentials::key("core");

        let journal = Journal::start(&dir).expect("start");
        journal
            .collect(&executor, target(), &credentials)
            .await
            .expect("first collection");
        journal
            .collect(&executor, target(), &credentials)
            .await
            .expect("second collection");
        journal.finalize();
        let appended = journal
            .collect(&executor, target(), &credentials)
            .await
            .expect("finalized collection");

        assert_eq!(appended, 0);
        assert_eq!(journal.read().expect("read"), "boot 1\nboot 2\n");
        let commands = executor.commands();
        assert_eq!(commands.len(), 2);
        assert!(commands[1].ends_with("--after-cursor=c1"), "{commands:?}");
    }
}

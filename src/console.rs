//! Serial console capture files.
//!
//! A sink is opened as `console-<name>.txt` in the output directory before the
//! machine exists, then moved to `<id>/console.txt` once the machine id is
//! known. If the attempt fails first, the temporary file is removed.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::fs::OpenOptions;
use cap_std::fs_utf8::{Dir, File};

/// Final console file name inside a machine directory.
pub const CONSOLE_FILE: &str = "console.txt";

/// Temporary console file name for a machine that has no id yet.
#[must_use]
pub fn temporary_name(machine_name: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("console-{machine_name}.txt"))
}

#[derive(Debug)]
struct ConsoleState {
    file: Option<File>,
    dir: Dir,
    name: Utf8PathBuf,
    relocated: bool,
}

/// Shared handle to a console capture file.
///
/// Clones write to the same file. The session owning the attempt decides when
/// the file is relocated, discarded or read back.
#[derive(Clone, Debug)]
pub struct ConsoleSink {
    state: Arc<Mutex<ConsoleState>>,
}

impl ConsoleSink {
    /// Creates `name` inside `dir`, failing if it already exists.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised while creating the file.
    pub fn create(dir: &Dir, name: &Utf8Path) -> io::Result<Self> {
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        let file = dir.open_with(name, &options)?;
        Ok(Self {
            state: Arc::new(Mutex::new(ConsoleState {
                file: Some(file),
                dir: dir.try_clone()?,
                name: name.to_owned(),
                relocated: false,
            })),
        })
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, ConsoleState>> {
        self.state
            .lock()
            .map_err(|_| io::Error::other("console lock poisoned"))
    }

    /// Current file name relative to its directory.
    ///
    /// # Errors
    ///
    /// Fails only if the internal lock was poisoned.
    pub fn name(&self) -> io::Result<Utf8PathBuf> {
        Ok(self.lock()?.name.clone())
    }

    /// Appends console output. Writes after [`ConsoleSink::close`] are
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised while writing.
    pub fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.lock()?;
        match state.file.as_mut() {
            Some(file) => file.write_all(bytes),
            None => Ok(()),
        }
    }

    /// Moves the file to `name` inside `dir`. The open handle keeps writing to
    /// the moved file.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised by the rename.
    pub fn relocate(&self, dir: &Dir, name: &Utf8Path) -> io::Result<()> {
        let mut state = self.lock()?;
        state.dir.rename(&state.name, dir, name)?;
        state.dir = dir.try_clone()?;
        state.name = name.to_owned();
        state.relocated = true;
        Ok(())
    }

    /// Flushes and closes the file handle.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised while flushing.
    pub fn close(&self) -> io::Result<()> {
        let mut state = self.lock()?;
        if let Some(mut file) = state.file.take() {
            file.flush()?;
        }
        Ok(())
    }

    /// Closes the handle and removes the file unless it was relocated.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised while removing the file. A file that is
    /// already gone is not an error.
    pub fn discard(&self) -> io::Result<()> {
        self.close()?;
        let state = self.lock()?;
        if state.relocated {
            return Ok(());
        }
        match state.dir.remove_file(&state.name) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }

    /// Closes the handle and returns everything written.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised while reading the file.
    pub fn read_back(&self) -> io::Result<String> {
        self.close()?;
        let state = self.lock()?;
        state.dir.read_to_string(&state.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cap_std::ambient_authority;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn output() -> (TempDir, Dir) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = Utf8Path::from_path(tmp.path()).expect("utf8 tempdir");
        let dir = Dir::open_ambient_dir(path, ambient_authority()).expect("open dir");
        (tmp, dir)
    }

    #[rstest]
    fn refuses_to_reuse_an_existing_file(output: (TempDir, Dir)) {
        let (_tmp, dir) = output;
        let name = temporary_name("worker");
        let _first = ConsoleSink::create(&dir, &name).expect("first");
        let err = ConsoleSink::create(&dir, &name).expect_err("second");
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[rstest]
    fn relocated_console_keeps_every_write(output: (TempDir, Dir)) {
        let (_tmp, dir) = output;
        let sink = ConsoleSink::create(&dir, &temporary_name("worker")).expect("create");
        sink.write_all(b"boot\n").expect("write before move");

        dir.create_dir("machine-1").expect("machine dir");
        let machine_dir = dir.open_dir("machine-1").expect("open machine dir");
        sink.relocate(&machine_dir, Utf8Path::new(CONSOLE_FILE))
            .expect("relocate");
        sink.write_all(b"login:\n").expect("write after move");

        assert_eq!(sink.read_back().expect("read"), "boot\nlogin:\n");
        assert!(!dir.exists(temporary_name("worker")));
        sink.discard().expect("discard keeps relocated file");
        assert!(machine_dir.exists(CONSOLE_FILE));
    }

    #[rstest]
    fn discard_removes_unrelocated_file(output: (TempDir, Dir)) {
        let (_tmp, dir) = output;
        let name = temporary_name("worker");
        let sink = ConsoleSink::create(&dir, &name).expect("create");
        sink.discard().expect("discard");
        assert!(!dir.exists(&name));
        sink.discard().expect("second discard");
    }
}

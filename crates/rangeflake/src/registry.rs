//! Host-local registry of business labels.
//!
//! Two instances serving the same business label on one host would share a
//! worker id and issue colliding IDs. Before an allocator is handed out, its
//! label is checked against a shared file of `"<label> <pid>"` lines and then
//! appended to it. Lines left behind by processes that have since exited are
//! ignored, so a crashed instance can be restarted under the same label.

use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use crate::error::RegistrationError;

/// File name of the shared registry inside the temp directory.
pub const DEFAULT_REGISTRY_FILE: &str = "snowflake.txt";

/// Default registry location: `<temp dir>/snowflake.txt`.
pub fn default_registry_path() -> PathBuf {
    std::env::temp_dir().join(DEFAULT_REGISTRY_FILE)
}

/// Check-and-claim capability for business labels.
///
/// [`holder`](Self::holder) and [`claim`](Self::claim) are separate steps
/// and nothing locks the registry between them: two processes starting at
/// the same moment can both find a label free and both claim it.
pub trait Registrar {
    /// Returns the pid of a live process holding `label`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::Io`] if the registry cannot be read.
    fn holder(&self, label: &str) -> Result<Option<u32>, RegistrationError>;

    /// Returns `true` if a live process holds `label`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::Io`] if the registry cannot be read.
    fn is_claimed(&self, label: &str) -> Result<bool, RegistrationError> {
        Ok(self.holder(label)?.is_some())
    }

    /// Durably records `label` as held by `pid`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::Io`] if the registry cannot be written.
    fn claim(&self, label: &str, pid: u32) -> Result<(), RegistrationError>;
}

impl<R: Registrar + ?Sized> Registrar for &R {
    fn holder(&self, label: &str) -> Result<Option<u32>, RegistrationError> {
        (**self).holder(label)
    }

    fn claim(&self, label: &str, pid: u32) -> Result<(), RegistrationError> {
        (**self).claim(label, pid)
    }
}

/// Skips registration entirely. Every label is always free.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopRegistrar;

impl Registrar for NoopRegistrar {
    fn holder(&self, _label: &str) -> Result<Option<u32>, RegistrationError> {
        Ok(None)
    }

    fn claim(&self, _label: &str, _pid: u32) -> Result<(), RegistrationError> {
        Ok(())
    }
}

/// Liveness oracle for process ids.
pub trait ProcessTable {
    fn is_alive(&self, pid: u32) -> bool;
}

impl<P: ProcessTable + ?Sized> ProcessTable for &P {
    fn is_alive(&self, pid: u32) -> bool {
        (**self).is_alive(pid)
    }
}

/// The operating system's process table.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemProcesses;

#[cfg(unix)]
impl ProcessTable for SystemProcesses {
    fn is_alive(&self, pid: u32) -> bool {
        use nix::{errno::Errno, sys::signal::kill, unistd::Pid};

        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        if raw <= 0 {
            return false;
        }
        // Signal 0 probes for existence without delivering anything. EPERM
        // means the process exists but belongs to someone else.
        match kill(Pid::from_raw(raw), None) {
            Ok(()) | Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }
}

#[cfg(not(unix))]
impl ProcessTable for SystemProcesses {
    fn is_alive(&self, _pid: u32) -> bool {
        // No portable probe: treat every recorded holder as live.
        true
    }
}

/// A [`Registrar`] backed by a shared text file.
#[derive(Clone, Debug)]
pub struct FileRegistry<P = SystemProcesses> {
    path: PathBuf,
    processes: P,
}

impl FileRegistry<SystemProcesses> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_processes(path, SystemProcesses)
    }
}

impl<P: ProcessTable> FileRegistry<P> {
    pub fn with_processes(path: impl Into<PathBuf>, processes: P) -> Self {
        Self {
            path: path.into(),
            processes,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> io::Result<Vec<(String, u32)>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(contents.lines().filter_map(parse_entry).collect())
    }
}

fn parse_entry(line: &str) -> Option<(String, u32)> {
    let (label, pid) = line.trim().rsplit_once(char::is_whitespace)?;
    let label = label.trim();
    if label.is_empty() {
        return None;
    }
    Some((label.to_owned(), pid.parse().ok()?))
}

impl<P: ProcessTable> Registrar for FileRegistry<P> {
    fn holder(&self, label: &str) -> Result<Option<u32>, RegistrationError> {
        Ok(self
            .read_entries()?
            .into_iter()
            .find(|(l, pid)| l == label && self.processes.is_alive(*pid))
            .map(|(_, pid)| pid))
    }

    fn claim(&self, label: &str, pid: u32) -> Result<(), RegistrationError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&self.path)?;
        // Keep each entry on its own line even if a previous writer left the
        // last one unterminated.
        let len = file.metadata()?.len();
        let needs_newline = len > 0 && !fs::read(&self.path)?.ends_with(b"\n");
        let mut entry = String::new();
        if needs_newline {
            entry.push('\n');
        }
        entry.push_str(label);
        entry.push(' ');
        entry.push_str(&pid.to_string());
        entry.push('\n');
        file.write_all(entry.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }
}

//! # Fallback Memory Channel
//!
//! Reads target memory through `/proc/<pid>/mem` when a backend fails or
//! lies about succeeding.
//!
//! This path needs the same privileges as `ptrace` attach (root on Android)
//! and is slower than the drivers, but it does not depend on any kernel
//! module. It is read-only; there is no write fallback.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::types::{Address, ProcessId};

/// Default procfs mount point
pub const DEFAULT_PROC_ROOT: &str = "/proc";

/// A backend-independent way to read target memory
pub trait FallbackReader
{
    /// Fill `dst` with the bytes at `addr` in `pid`, or fail
    fn read_fallback(&self, pid: ProcessId, addr: Address, dst: &mut [u8]) -> io::Result<()>;
}

/// Reads `<proc_root>/<pid>/mem`
///
/// The file is opened per call and closed on return; the reader keeps no
/// state besides the proc root.
#[derive(Debug, Clone)]
pub struct ProcMemReader
{
    proc_root: PathBuf,
}

impl Default for ProcMemReader
{
    fn default() -> Self
    {
        Self::new(DEFAULT_PROC_ROOT)
    }
}

impl ProcMemReader
{
    /// Reader rooted at a custom procfs location
    pub fn new(proc_root: impl Into<PathBuf>) -> Self
    {
        Self {
            proc_root: proc_root.into(),
        }
    }

    /// Path of the memory pseudo-file for `pid`
    pub fn mem_path(&self, pid: ProcessId) -> PathBuf
    {
        self.proc_root.join(pid.to_string()).join("mem")
    }

    /// The procfs root this reader resolves against
    pub fn proc_root(&self) -> &Path
    {
        &self.proc_root
    }
}

impl FallbackReader for ProcMemReader
{
    fn read_fallback(&self, pid: ProcessId, addr: Address, dst: &mut [u8]) -> io::Result<()>
    {
        let path = self.mem_path(pid);
        let mut file = File::open(&path).map_err(|err| {
            error!(pid = pid.0, path = %path.display(), error = %err, "fallback: cannot open memory file");
            err
        })?;

        file.seek(SeekFrom::Start(addr.value())).map_err(|err| {
            error!(pid = pid.0, address = %addr, error = %err, "fallback: seek failed");
            err
        })?;

        file.read_exact(dst).map_err(|err| {
            error!(pid = pid.0, address = %addr, size = dst.len(), error = %err, "fallback: short read");
            err
        })?;

        info!(pid = pid.0, address = %addr, size = dst.len(), "fallback: read succeeded");
        Ok(())
    }
}

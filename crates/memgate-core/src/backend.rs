//! # Backends
//!
//! The two kernel channels behind one capability trait.
//!
//! [`PrimaryBackend`] owns the opened device node and issues plain `ioctl`
//! calls on it. [`SecondaryBackend`] holds the numeric target token handed
//! out by the support library during discovery and issues the same control
//! operations through a raw `SYS_ioctl` system call, with the token in place
//! of a file descriptor. Neither type knows about sentinels or fallbacks;
//! that policy lives in [`crate::session::Session`].
//!
//! Tests and alternative transports implement [`Backend`] directly.

use std::ffi::c_void;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use libc::c_int;
use tracing::{debug, error};

use crate::error::{MemgateError, MemgateResult};
use crate::protocol::{self, CopyMemory, KeyBuffer, ModuleBase, ModuleName, Opcodes};
use crate::types::{Address, ProcessId};

/// Which kernel channel a backend talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind
{
    /// Device node opened read/write, addressed with `ioctl`
    Primary,
    /// Token obtained from the support libraries, addressed with `syscall(SYS_ioctl)`
    Secondary,
}

impl fmt::Display for BackendKind
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            BackendKind::Primary => write!(f, "primary"),
            BackendKind::Secondary => write!(f, "secondary"),
        }
    }
}

/// Memory operations a kernel backend can perform
///
/// Every method is one device-control round trip. A returned error means the
/// call reported a non-zero status; `Ok` only means the driver *claimed*
/// success.
pub trait Backend
{
    /// Which channel this is, for logging and error context
    fn kind(&self) -> BackendKind;

    /// Copy `dst.len()` bytes at `addr` in `pid` into `dst`
    fn read(&self, pid: ProcessId, addr: Address, dst: &mut [u8]) -> io::Result<()>;

    /// Copy `src` to `addr` in `pid`
    fn write(&self, pid: ProcessId, addr: Address, src: &[u8]) -> io::Result<()>;

    /// Resolve the load address of `name` in `pid`; zero when not mapped
    fn module_base(&self, pid: ProcessId, name: &ModuleName) -> io::Result<Address>;
}

/// Backend reached through the primary device node
#[derive(Debug)]
pub struct PrimaryBackend
{
    device: File,
    path: PathBuf,
}

impl PrimaryBackend
{
    /// Open the device node read/write
    ///
    /// Fails with the OS error when the node does not exist or the caller
    /// may not open it; discovery treats either as "primary not present".
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self>
    {
        let path = path.as_ref();
        let device = OpenOptions::new().read(true).write(true).open(path)?;
        debug!(device = %path.display(), fd = device.as_raw_fd(), "opened primary device node");
        Ok(Self {
            device,
            path: path.to_path_buf(),
        })
    }

    /// Path of the opened device node
    pub fn path(&self) -> &Path
    {
        &self.path
    }

    /// Deliver the authentication key with the `init_key` opcode
    pub fn init_key(&self, key: &str) -> MemgateResult<()>
    {
        let mut buffer = KeyBuffer::new(key)?;
        self.control(protocol::PRIMARY_OPCODES.init_key, buffer.as_mut_ptr().cast())
            .map_err(|source| {
                error!(error = %source, "primary backend rejected the key");
                MemgateError::BackendFailure {
                    backend: BackendKind::Primary,
                    operation: "init_key",
                    source,
                }
            })
    }

    fn control(&self, op: u32, arg: *mut c_void) -> io::Result<()>
    {
        sys::device_ioctl(self.device.as_raw_fd(), op, arg)
    }
}

impl Backend for PrimaryBackend
{
    fn kind(&self) -> BackendKind
    {
        BackendKind::Primary
    }

    fn read(&self, pid: ProcessId, addr: Address, dst: &mut [u8]) -> io::Result<()>
    {
        let mut request = CopyMemory::read_into(pid, addr, dst)?;
        self.control(protocol::PRIMARY_OPCODES.read, (&mut request as *mut CopyMemory).cast())
    }

    fn write(&self, pid: ProcessId, addr: Address, src: &[u8]) -> io::Result<()>
    {
        let mut request = CopyMemory::write_from(pid, addr, src)?;
        self.control(protocol::PRIMARY_OPCODES.write, (&mut request as *mut CopyMemory).cast())
    }

    fn module_base(&self, pid: ProcessId, name: &ModuleName) -> io::Result<Address>
    {
        let mut request = ModuleBase::new(pid, name);
        self.control(
            protocol::PRIMARY_OPCODES.module_base,
            (&mut request as *mut ModuleBase).cast(),
        )?;
        Ok(Address::new(request.base as u64))
    }
}

/// Backend reached through the token handed out by the support libraries
#[derive(Debug, Clone)]
pub struct SecondaryBackend
{
    token: c_int,
    handshake_status: u8,
    opcodes: Opcodes,
}

impl SecondaryBackend
{
    /// Wrap a token produced by a completed handshake
    ///
    /// `handshake_status` is the byte the handshake entry point returned. It
    /// is recorded for diagnostics only.
    pub fn new(token: c_int, handshake_status: u8) -> MemgateResult<Self>
    {
        if token <= 0 {
            return Err(MemgateError::InvalidArgument(format!(
                "backend token must be positive, got {token}"
            )));
        }
        Ok(Self {
            token,
            handshake_status,
            opcodes: protocol::SECONDARY_OPCODES,
        })
    }

    /// The connection token used in place of a file descriptor
    pub fn token(&self) -> c_int
    {
        self.token
    }

    /// Status byte returned by the handshake entry point
    pub fn handshake_status(&self) -> u8
    {
        self.handshake_status
    }

    fn control(&self, op: u32, arg: *mut c_void) -> io::Result<()>
    {
        sys::token_ioctl(self.token, op, arg)
    }
}

impl Backend for SecondaryBackend
{
    fn kind(&self) -> BackendKind
    {
        BackendKind::Secondary
    }

    fn read(&self, pid: ProcessId, addr: Address, dst: &mut [u8]) -> io::Result<()>
    {
        let mut request = CopyMemory::read_into(pid, addr, dst)?;
        self.control(self.opcodes.read, (&mut request as *mut CopyMemory).cast())
    }

    fn write(&self, pid: ProcessId, addr: Address, src: &[u8]) -> io::Result<()>
    {
        let mut request = CopyMemory::write_from(pid, addr, src)?;
        self.control(self.opcodes.write, (&mut request as *mut CopyMemory).cast())
    }

    fn module_base(&self, pid: ProcessId, name: &ModuleName) -> io::Result<Address>
    {
        let mut request = ModuleBase::new(pid, name);
        self.control(self.opcodes.module_base, (&mut request as *mut ModuleBase).cast())?;
        Ok(Address::new(request.base as u64))
    }
}

/// Turn a device-control return value into an `io::Result`
///
/// The drivers signal success with exactly zero. `-1` carries `errno`; any
/// other value is a driver-private status with no `errno` behind it.
#[cfg_attr(not(any(target_os = "linux", target_os = "android")), allow(dead_code))]
fn status_to_result(ret: i64) -> io::Result<()>
{
    match ret {
        0 => Ok(()),
        -1 => Err(io::Error::last_os_error()),
        other => Err(io::Error::other(format!("driver returned status {other}"))),
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
mod sys
{
    use super::*;

    pub(super) fn device_ioctl(fd: RawFd, op: u32, arg: *mut c_void) -> io::Result<()>
    {
        // SAFETY: `arg` points to a live request structure owned by the caller
        // for the duration of the call.
        let ret = unsafe { libc::ioctl(fd, op as libc::Ioctl, arg) };
        status_to_result(i64::from(ret))
    }

    pub(super) fn token_ioctl(token: c_int, op: u32, arg: *mut c_void) -> io::Result<()>
    {
        // SAFETY: as above; the kernel interprets `token` in place of a descriptor.
        let ret = unsafe {
            libc::syscall(
                libc::SYS_ioctl,
                libc::c_long::from(token),
                libc::c_ulong::from(op),
                arg,
            )
        };
        status_to_result(ret as i64)
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
mod sys
{
    use super::*;

    pub(super) fn device_ioctl(_fd: RawFd, _op: u32, _arg: *mut c_void) -> io::Result<()>
    {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }

    pub(super) fn token_ioctl(_token: c_int, _op: u32, _arg: *mut c_void) -> io::Result<()>
    {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }
}

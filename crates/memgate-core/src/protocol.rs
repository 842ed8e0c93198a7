//! # Backend Protocol
//!
//! Wire encodings for the two kernel backends.
//!
//! Both backends take the same request layouts and differ only in their
//! operation codes and in how the request reaches the kernel:
//!
//! - **Primary**: `ioctl(fd, op, &request)` on the opened device node
//! - **Secondary**: `syscall(SYS_ioctl, token, op, &request)` where `token`
//!   is the number returned by the support library during discovery
//!
//! The layouts below are `#[repr(C)]` copies of what the drivers expect. They
//! are not versioned; a driver built with a different layout will simply
//! fail the request or return garbage.

use std::ffi::c_void;
use std::fmt;
use std::io;

use libc::{c_char, c_int, pid_t, size_t};

use crate::error::{MemgateError, MemgateResult};
use crate::types::{Address, ProcessId};

/// Byte written over a read buffer before dispatch
///
/// If it is still there after the backend reports success, the backend did
/// not copy anything.
pub const SENTINEL_BYTE: u8 = 0xAA;

/// Capacity of the name and key buffers handed to the drivers
pub const NAME_BUFFER_LEN: usize = 0x100;

/// Length of the `name` field in [`TargetDescriptor`]
pub const TARGET_NAME_LEN: usize = 15;

/// Operation codes understood by one backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcodes
{
    /// Deliver the authentication key
    pub init_key: u32,
    /// Copy memory out of the target
    pub read: u32,
    /// Copy memory into the target
    pub write: u32,
    /// Look up a module's load address
    pub module_base: u32,
}

/// Operation codes of the device-node backend
pub const PRIMARY_OPCODES: Opcodes = Opcodes {
    init_key: 0x600,
    read: 0x601,
    write: 0x602,
    module_base: 0x603,
};

/// Operation codes of the library-discovered backend
pub const SECONDARY_OPCODES: Opcodes = Opcodes {
    init_key: 0x800,
    read: 0x801,
    write: 0x802,
    module_base: 0x803,
};

/// Memory copy request
///
/// `buffer` points into the caller's slice for the duration of one
/// device-control call and is never retained by this crate.
#[repr(C)]
#[derive(Debug)]
pub struct CopyMemory
{
    pub pid: pid_t,
    pub addr: usize,
    pub buffer: *mut c_void,
    pub size: size_t,
}

impl CopyMemory
{
    /// Request that copies `dst.len()` bytes from `addr` into `dst`
    ///
    /// Fails with `InvalidInput` when `addr` does not fit a machine word.
    pub fn read_into(pid: ProcessId, addr: Address, dst: &mut [u8]) -> io::Result<Self>
    {
        Ok(Self {
            pid: pid.raw(),
            addr: machine_address(addr)?,
            buffer: dst.as_mut_ptr().cast(),
            size: dst.len(),
        })
    }

    /// Request that copies `src` to `addr`
    ///
    /// The drivers take a mutable pointer in both directions; they only read
    /// through it for writes.
    pub fn write_from(pid: ProcessId, addr: Address, src: &[u8]) -> io::Result<Self>
    {
        Ok(Self {
            pid: pid.raw(),
            addr: machine_address(addr)?,
            buffer: src.as_ptr().cast_mut().cast(),
            size: src.len(),
        })
    }
}

fn machine_address(addr: Address) -> io::Result<usize>
{
    addr.as_usize().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("address {addr} does not fit a machine word"),
        )
    })
}

/// Module base lookup request
///
/// The driver fills in `base`; zero means the module is not mapped.
#[repr(C)]
#[derive(Debug)]
pub struct ModuleBase
{
    pub pid: pid_t,
    pub name: *const c_char,
    pub base: usize,
}

impl ModuleBase
{
    pub fn new(pid: ProcessId, name: &ModuleName) -> Self
    {
        Self {
            pid: pid.raw(),
            name: name.as_ptr(),
            base: 0,
        }
    }
}

/// Out-parameter of the support library's "locate target" entry point
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TargetDescriptor
{
    pub target: c_int,
    pub name: [c_char; TARGET_NAME_LEN],
}

impl Default for TargetDescriptor
{
    fn default() -> Self
    {
        Self {
            target: 0,
            name: [0; TARGET_NAME_LEN],
        }
    }
}

/// NUL-terminated string in a fixed-size buffer
///
/// Input longer than `N - 1` bytes is truncated, matching what the drivers
/// accept. Empty input and interior NUL bytes are rejected up front.
#[derive(Clone)]
pub struct BoundedCString<const N: usize>
{
    bytes: [u8; N],
    len: usize,
}

/// Module name as sent in a [`ModuleBase`] request
pub type ModuleName = BoundedCString<NAME_BUFFER_LEN>;

/// Key buffer sent with the `init_key` opcode
pub type KeyBuffer = BoundedCString<NAME_BUFFER_LEN>;

impl<const N: usize> BoundedCString<N>
{
    pub fn new(value: &str) -> MemgateResult<Self>
    {
        if value.is_empty() {
            return Err(MemgateError::InvalidArgument("name must not be empty".to_string()));
        }
        if value.as_bytes().contains(&0) {
            return Err(MemgateError::InvalidArgument(format!(
                "name {value:?} contains a NUL byte"
            )));
        }

        let len = value.len().min(N - 1);
        let mut bytes = [0u8; N];
        bytes[..len].copy_from_slice(&value.as_bytes()[..len]);
        Ok(Self { bytes, len })
    }

    /// Bytes before the terminator
    pub fn as_bytes(&self) -> &[u8]
    {
        &self.bytes[..self.len]
    }

    /// Whether the input had to be shortened to fit
    pub fn was_truncated(&self, original: &str) -> bool
    {
        original.len() > self.len
    }

    pub fn as_ptr(&self) -> *const c_char
    {
        self.bytes.as_ptr().cast()
    }

    pub fn as_mut_ptr(&mut self) -> *mut c_char
    {
        self.bytes.as_mut_ptr().cast()
    }
}

impl<const N: usize> fmt::Debug for BoundedCString<N>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_tuple("BoundedCString")
            .field(&String::from_utf8_lossy(self.as_bytes()))
            .finish()
    }
}

/// Whether a buffer still carries the sentinel where the backend should have written
///
/// `window` bounds how many leading bytes are inspected; `None` checks the
/// whole buffer. Any sentinel byte in the window counts, so genuine data
/// containing `0xAA` also trips the check and costs one fallback read.
pub fn sentinel_untouched(buf: &[u8], window: Option<usize>) -> bool
{
    let end = window.map_or(buf.len(), |w| w.min(buf.len()));
    buf[..end].iter().any(|&b| b == SENTINEL_BYTE)
}

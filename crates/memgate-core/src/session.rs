//! # Memory Access Session
//!
//! The public facade: one selected backend, one target process and the
//! fallback policy that ties them together.
//!
//! ## Read Policy
//!
//! Drivers are known to return "success" without copying anything. Every
//! read therefore:
//!
//! 1. Fills the destination with [`SENTINEL_BYTE`]
//! 2. Dispatches to the backend
//! 3. Falls back to `/proc/<pid>/mem` if the call failed, or if sentinel
//!    bytes survived in the inspected window
//!
//! The check is heuristic. Memory that genuinely contains `0xAA` in the
//! window costs one extra fallback read and is otherwise harmless.
//!
//! Writes are dispatched once and not verified. There is no write fallback.

use dataview::Pod;
use tracing::{debug, error, info, warn};

use crate::backend::{Backend, BackendKind};
use crate::config::{DriverConfig, SentinelCheck};
use crate::discovery::Discovery;
use crate::error::{FallbackTrigger, MemgateError, MemgateResult};
use crate::fallback::{FallbackReader, ProcMemReader};
use crate::protocol::{sentinel_untouched, ModuleName, SENTINEL_BYTE};
use crate::types::{Address, ProcessId};

/// Which channel produced the bytes of a successful read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource
{
    Backend,
    Fallback(FallbackTrigger),
}

impl std::fmt::Display for ReadSource
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        match self {
            ReadSource::Backend => write!(f, "backend"),
            ReadSource::Fallback(trigger) => write!(f, "fallback ({trigger})"),
        }
    }
}

/// A target process bound to a working backend
///
/// Created once per target; [`Session::initialize`] runs discovery, while
/// [`Session::new`] takes an already selected backend.
pub struct Session
{
    pid: ProcessId,
    backend: Box<dyn Backend>,
    fallback: Box<dyn FallbackReader>,
    sentinel: SentinelCheck,
}

impl std::fmt::Debug for Session
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("Session")
            .field("pid", &self.pid)
            .field("backend", &self.backend.kind())
            .field("sentinel", &self.sentinel)
            .finish_non_exhaustive()
    }
}

impl Session
{
    /// Run discovery for `pid` and bind the result
    ///
    /// Discovery happens exactly once; a failed call leaves nothing behind.
    ///
    /// ## Errors
    ///
    /// Everything [`Discovery::run`] can return.
    pub fn initialize(pid: ProcessId, config: &DriverConfig) -> MemgateResult<Self>
    {
        let backend = Discovery::new(config).run(pid)?;
        let session = Self::new(pid, backend, Box::new(ProcMemReader::new(&config.proc_root)))?;
        Ok(session.with_sentinel_check(config.sentinel))
    }

    /// Bind an explicit backend and fallback reader
    pub fn new(
        pid: ProcessId,
        backend: Box<dyn Backend>,
        fallback: Box<dyn FallbackReader>,
    ) -> MemgateResult<Self>
    {
        let pid = pid.validate()?;
        info!(pid = pid.0, backend = %backend.kind(), "session ready");
        Ok(Self {
            pid,
            backend,
            fallback,
            sentinel: SentinelCheck::default(),
        })
    }

    /// Change how much of each read buffer is checked for sentinels
    pub fn with_sentinel_check(mut self, sentinel: SentinelCheck) -> Self
    {
        self.sentinel = sentinel;
        self
    }

    pub fn pid(&self) -> ProcessId
    {
        self.pid
    }

    pub fn backend_kind(&self) -> BackendKind
    {
        self.backend.kind()
    }

    /// Read `dst.len()` bytes at `addr` in the session's process
    ///
    /// Returns which channel delivered the bytes. On error the buffer
    /// contents are unspecified.
    ///
    /// ## Errors
    ///
    /// - `InvalidArgument`: `dst` is empty or `addr` does not fit a machine
    ///   word; the backend is not called
    /// - `FallbackFailed`: the backend failed (or lied) and the fallback
    ///   could not read either
    pub fn read(&self, addr: Address, dst: &mut [u8]) -> MemgateResult<ReadSource>
    {
        let size = dst.len();
        if size == 0 {
            error!(pid = self.pid.0, address = %addr, "read rejected: empty buffer");
            return Err(MemgateError::InvalidArgument("read buffer must not be empty".to_string()));
        }
        if addr.as_usize().is_none() {
            error!(pid = self.pid.0, address = %addr, "read rejected: address wider than a machine word");
            return Err(wide_address(addr));
        }

        let backend = self.backend.kind();
        dst.fill(SENTINEL_BYTE);
        debug!(pid = self.pid.0, address = %addr, size, %backend, "read");

        let trigger = match self.backend.read(self.pid, addr, dst) {
            Err(err) => {
                error!(pid = self.pid.0, address = %addr, size, %backend, error = %err, "backend read failed");
                FallbackTrigger::Status
            }
            Ok(()) if sentinel_untouched(dst, self.sentinel.window()) => {
                warn!(
                    pid = self.pid.0,
                    address = %addr,
                    size,
                    %backend,
                    "backend reported success but left the sentinel in place"
                );
                FallbackTrigger::Sentinel
            }
            Ok(()) => return Ok(ReadSource::Backend),
        };

        self.fallback
            .read_fallback(self.pid, addr, dst)
            .map_err(|source| MemgateError::FallbackFailed {
                trigger,
                pid: self.pid,
                address: addr,
                size,
                source,
            })?;

        Ok(ReadSource::Fallback(trigger))
    }

    /// Read one `T` at `addr`
    ///
    /// ## Errors
    ///
    /// Same as [`Session::read`].
    pub fn try_read_value<T: Pod>(&self, addr: Address) -> MemgateResult<T>
    {
        let mut value = T::zeroed();
        self.read(addr, value.as_bytes_mut())?;
        Ok(value)
    }

    /// Read one `T` at `addr`, or the all-zero `T` on any failure
    pub fn read_value<T: Pod>(&self, addr: Address) -> T
    {
        self.try_read_value(addr).unwrap_or_else(|_| T::zeroed())
    }

    /// Write `src` to `addr` in the session's process
    ///
    /// The backend's status is the only signal. Nothing is read back.
    ///
    /// ## Errors
    ///
    /// - `InvalidArgument`: `src` is empty or `addr` does not fit a machine
    ///   word; the backend is not called
    /// - `BackendFailure`: the backend returned a non-zero status
    pub fn write(&self, addr: Address, src: &[u8]) -> MemgateResult<()>
    {
        let size = src.len();
        if size == 0 {
            error!(pid = self.pid.0, address = %addr, "write rejected: empty buffer");
            return Err(MemgateError::InvalidArgument("write buffer must not be empty".to_string()));
        }
        if addr.as_usize().is_none() {
            error!(pid = self.pid.0, address = %addr, "write rejected: address wider than a machine word");
            return Err(wide_address(addr));
        }

        let backend = self.backend.kind();
        debug!(pid = self.pid.0, address = %addr, size, %backend, "write");

        self.backend
            .write(self.pid, addr, src)
            .map_err(|source| {
                error!(pid = self.pid.0, address = %addr, size, %backend, error = %source, "backend write failed");
                MemgateError::BackendFailure {
                    backend,
                    operation: "write",
                    source,
                }
            })
    }

    /// Write one `T` at `addr`
    pub fn write_value<T: Pod>(&self, addr: Address, value: &T) -> MemgateResult<()>
    {
        self.write(addr, value.as_bytes())
    }

    /// Load address of module `name` in `pid`
    ///
    /// `pid` is passed through as given, so the lookup can target a process
    /// other than the session's. Names longer than the driver's buffer are
    /// truncated. A zero result means the module is not mapped.
    ///
    /// ## Errors
    ///
    /// - `InvalidArgument`: empty name, NUL in the name, or `pid <= 0`
    /// - `BackendFailure`: the backend returned a non-zero status
    pub fn module_base(&self, name: &str, pid: ProcessId) -> MemgateResult<Address>
    {
        let pid = pid.validate()?;
        let module = ModuleName::new(name)?;
        if module.was_truncated(name) {
            warn!(module = name, "module name truncated to fit the driver buffer");
        }

        let backend = self.backend.kind();
        let base = self.backend.module_base(pid, &module).map_err(|source| {
            error!(pid = pid.0, module = name, %backend, error = %source, "module base lookup failed");
            MemgateError::BackendFailure {
                backend,
                operation: "module_base",
                source,
            }
        })?;

        debug!(pid = pid.0, module = name, base = %base, %backend, "module base resolved");
        Ok(base)
    }

    /// [`Session::module_base`] with every failure collapsed to zero
    pub fn module_base_or_zero(&self, name: &str, pid: ProcessId) -> Address
    {
        self.module_base(name, pid).unwrap_or(Address::ZERO)
    }
}

fn wide_address(addr: Address) -> MemgateError
{
    MemgateError::InvalidArgument(format!("address {addr} does not fit a machine word"))
}

//! # Error Types
//!
//! Error handling for backend discovery and memory access.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.

use std::path::PathBuf;

use thiserror::Error;

use crate::backend::BackendKind;
use crate::types::{Address, ProcessId};

/// Why a read was served by the fallback channel instead of the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackTrigger
{
    /// The device-control call returned a non-zero status
    Status,
    /// The call reported success but left sentinel bytes in the buffer
    Sentinel,
}

impl std::fmt::Display for FallbackTrigger
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        match self {
            FallbackTrigger::Status => write!(f, "backend status"),
            FallbackTrigger::Sentinel => write!(f, "sentinel left untouched"),
        }
    }
}

/// Main error type for memgate operations
///
/// Each variant corresponds to one failure kind of the access layer, so a
/// caller can tell an invalid argument from a missing backend or a failed
/// fallback without reading the logs.
///
/// ## Error Categories
///
/// 1. **Argument errors**: InvalidArgument
/// 2. **Discovery errors**: LibraryLoad, SymbolMissing, DiscoveryTimedOut,
///    DiscoveryCancelled
/// 3. **Transfer errors**: BackendFailure, FallbackFailed
/// 4. **Process metadata errors**: ProcessNotFound
/// 5. **I/O errors**: Io
#[derive(Error, Debug)]
pub enum MemgateError
{
    /// Null-equivalent buffer, zero size, empty name or non-positive PID
    ///
    /// Detected before any I/O is attempted.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A support library could not be loaded by the dynamic loader
    #[error("Failed to load {}: {reason}", path.display())]
    LibraryLoad
    {
        /// Library path that was passed to the loader
        path: PathBuf,
        /// Message reported by `dlerror()`
        reason: String,
    },

    /// A support library does not export the expected entry point
    #[error("Failed to resolve symbol {symbol}: {reason}")]
    SymbolMissing
    {
        /// Mangled symbol name
        symbol: String,
        /// Message reported by `dlerror()`
        reason: String,
    },

    /// The target-locating entry point never produced a positive token
    #[error("Discovery timed out after {attempts} attempts")]
    DiscoveryTimedOut
    {
        /// Number of polls performed before giving up
        attempts: u32,
    },

    /// Discovery was aborted through its cancellation token
    #[error("Discovery cancelled")]
    DiscoveryCancelled,

    /// The backend rejected a device-control request
    ///
    /// For reads this is recovered by the fallback channel; writes and
    /// module lookups surface it directly.
    #[error("{backend} backend {operation} failed: {source}")]
    BackendFailure
    {
        /// Backend that handled the request
        backend: BackendKind,
        /// Operation name (`read`, `write`, `module_base`, `init_key`)
        operation: &'static str,
        /// OS error captured right after the call
        #[source]
        source: std::io::Error,
    },

    /// The fallback channel could not serve a read either
    ///
    /// Usually means the caller lacks the privileges to open
    /// `/proc/<pid>/mem`.
    #[error("Fallback read of {size} bytes at {address} in PID {pid} failed after {trigger}: {source}")]
    FallbackFailed
    {
        /// What made the read fall back in the first place
        trigger: FallbackTrigger,
        /// Target process
        pid: ProcessId,
        /// Requested address
        address: Address,
        /// Requested length
        size: usize,
        /// Underlying open/seek/read error
        #[source]
        source: std::io::Error,
    },

    /// No process matched a name lookup
    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    /// I/O error (for file operations, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for `Result<T, MemgateError>`
///
/// ```rust
/// use memgate_core::error::MemgateResult;
/// fn foo() -> MemgateResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type MemgateResult<T> = std::result::Result<T, MemgateError>;

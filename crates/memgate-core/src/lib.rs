//! # memgate-core
//!
//! Read and write the virtual memory of another process through a kernel
//! driver, with a procfs fallback for reads the driver silently drops.
//!
//! This crate provides:
//! - Backend discovery: a device node, or a token-addressed channel unlocked
//!   by two support libraries and a handshake
//! - The two device-control encodings (`ioctl` on a descriptor, raw
//!   `SYS_ioctl` on a token)
//! - Sentinel-based detection of reads that "succeeded" without copying
//! - A `/proc/<pid>/mem` read fallback
//! - Module base lookup
//! - procfs helpers: process lookup by name and address classification
//!
//! ## Platform Support
//!
//! - **Android / Linux**: the drivers and procfs are only present here
//! - **Other targets**: compiles, but every device-control call fails with
//!   `Unsupported`
//!
//! ## Why unsafe code is needed
//!
//! Device-control calls, raw system calls and the dynamic loader are all
//! foreign functions. They are wrapped in safe types (`PrimaryBackend`,
//! `SecondaryBackend`, `DynamicLibrary`) so callers never touch them.
//!
//! ## Example
//!
//! ```no_run
//! use memgate_core::prelude::*;
//!
//! let config = DriverConfig::from_env()?;
//! let session = Session::initialize(ProcessId(1234), &config)?;
//! let health: f32 = session.read_value(Address::new(0x7f12_3400));
//! println!("{health}");
//! # Ok::<(), MemgateError>(())
//! ```

#![allow(unsafe_code)] // Required for ioctl, syscall and dlopen

pub mod backend;
pub mod config;
pub mod discovery;
pub mod error;
pub mod fallback;
pub mod loader;
pub mod notify;
pub mod prelude;
pub mod procfs;
pub mod protocol;
pub mod session;
pub mod types;

pub use backend::{Backend, BackendKind};
pub use error::{MemgateError, MemgateResult};
pub use session::{ReadSource, Session};
pub use types::{Address, ProcessId};

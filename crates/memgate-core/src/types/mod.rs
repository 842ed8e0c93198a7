//! Types shared across the access layer.

pub mod address;
pub mod process;

pub use address::Address;
pub use process::ProcessId;

//! Common module for library exports

pub use crate::backend::{Backend, BackendKind};
pub use crate::config::{DriverConfig, PollPolicy, SentinelCheck};
pub use crate::discovery::{CancelToken, Discovery};
pub use crate::error::{FallbackTrigger, MemgateError, MemgateResult};
pub use crate::procfs::MemoryRange;
pub use crate::session::{ReadSource, Session};
pub use crate::types::address::Address;
pub use crate::types::process::ProcessId;

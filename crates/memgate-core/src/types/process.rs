//! Process identifier type.

use std::fmt;
use std::str::FromStr;

use crate::error::{MemgateError, MemgateResult};

/// Process identifier (PID)
///
/// Stored signed, like `pid_t`, because the drivers and the procfs lookups
/// both speak `pid_t` and "not found" has historically been `-1`. Only
/// positive values name a real process; [`ProcessId::validate`] enforces that
/// at every entry point of the access layer.
///
/// ## Example
///
/// ```rust
/// use memgate_core::types::ProcessId;
///
/// let pid = ProcessId::from(12345);
/// assert!(pid.is_valid());
/// assert!(!ProcessId::from(-1).is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub i32);

impl ProcessId
{
    /// Get the raw `pid_t` value
    pub const fn raw(self) -> libc::pid_t
    {
        self.0 as libc::pid_t
    }

    /// Whether the identifier can refer to a running process
    pub const fn is_valid(self) -> bool
    {
        self.0 > 0
    }

    /// Return `self` if positive, otherwise an `InvalidArgument` error
    pub fn validate(self) -> MemgateResult<Self>
    {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(MemgateError::InvalidArgument(format!("PID must be positive, got {}", self.0)))
        }
    }
}

impl From<i32> for ProcessId
{
    fn from(pid: i32) -> Self
    {
        ProcessId(pid)
    }
}

impl From<ProcessId> for i32
{
    fn from(pid: ProcessId) -> Self
    {
        pid.0
    }
}

impl fmt::Display for ProcessId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProcessId
{
    type Err = MemgateError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        let value = s
            .trim()
            .parse::<i32>()
            .map_err(|err| MemgateError::InvalidArgument(format!("invalid PID {s:?}: {err}")))?;
        ProcessId(value).validate()
    }
}

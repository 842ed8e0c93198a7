//! # Configuration
//!
//! Paths, symbol names, key material and timing knobs for discovery and the
//! access facade.
//!
//! [`DriverConfig::default`] reproduces the stock deployment. Any field can
//! be overridden from the environment with [`DriverConfig::from_env`]:
//!
//! | variable | field |
//! |---|---|
//! | `MEMGATE_DEVICE` | `device_path` |
//! | `MEMGATE_LOCATOR_LIB` | `locator_library` |
//! | `MEMGATE_HANDSHAKE_LIB` | `handshake_library` |
//! | `MEMGATE_HANDSHAKE_KEY` | `handshake_key` |
//! | `MEMGATE_PRIMARY_KEY` | `primary_key` |
//! | `MEMGATE_POLL_INTERVAL_MS` | `poll.interval` |
//! | `MEMGATE_POLL_ATTEMPTS` | `poll.max_attempts` (`0` = unbounded) |
//! | `MEMGATE_POLL_TIMEOUT_MS` | `poll.timeout` (`0` = none) |
//! | `MEMGATE_CLEANUP_SHELL` | `cleanup_shell` (`none` disables cleanup) |
//! | `MEMGATE_PROC_ROOT` | `proc_root` |
//! | `MEMGATE_SENTINEL` | `sentinel` (`full` or a byte count) |

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{MemgateError, MemgateResult};
use crate::fallback::DEFAULT_PROC_ROOT;

/// Device node of the primary backend
pub const DEFAULT_DEVICE_PATH: &str = "/dev/BING";

/// Support library exporting the "locate target" entry point
pub const DEFAULT_LOCATOR_LIBRARY: &str = "/data/system/liborange.so";

/// Support library exporting the "perform handshake" entry point
pub const DEFAULT_HANDSHAKE_LIBRARY: &str = "/data/system/liborangeinit.so";

/// `int initialkernel(_copy_filedescription*)`
pub const DEFAULT_LOCATOR_SYMBOL: &str = "_Z13initialkernelP21_copy_filedescription";

/// `char initialkernel(int, int, char*)`
pub const DEFAULT_HANDSHAKE_SYMBOL: &str = "_Z13initialkerneliiPc";

/// Key the secondary backend expects during the handshake
pub const DEFAULT_HANDSHAKE_KEY: &str = "shjKXCJTphack20071019=XCJ";

/// Shell used to remove the support libraries after a handshake
pub const DEFAULT_CLEANUP_SHELL: &str = "su";

/// Bounds for the discovery poll loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy
{
    /// Sleep between two unsuccessful polls
    pub interval: Duration,
    /// Give up after this many polls; `None` polls forever
    pub max_attempts: Option<u32>,
    /// Give up once this much time has passed; `None` disables the deadline
    pub timeout: Option<Duration>,
}

impl PollPolicy
{
    /// Whether a poll loop that made `attempts` polls over `elapsed` must stop
    pub fn is_exhausted(&self, attempts: u32, elapsed: Duration) -> bool
    {
        let out_of_attempts = self.max_attempts.is_some_and(|max| attempts >= max);
        let out_of_time = self.timeout.is_some_and(|limit| elapsed >= limit);
        out_of_attempts || out_of_time
    }
}

impl Default for PollPolicy
{
    fn default() -> Self
    {
        Self {
            interval: Duration::from_millis(100),
            max_attempts: Some(300),
            timeout: None,
        }
    }
}

/// How much of a read buffer is checked for leftover sentinel bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentinelCheck
{
    /// Inspect at most this many leading bytes
    Prefix(usize),
    /// Inspect the whole buffer
    Full,
}

impl SentinelCheck
{
    /// Window size in the form [`crate::protocol::sentinel_untouched`] takes
    pub fn window(self) -> Option<usize>
    {
        match self {
            SentinelCheck::Prefix(n) => Some(n),
            SentinelCheck::Full => None,
        }
    }
}

impl Default for SentinelCheck
{
    fn default() -> Self
    {
        SentinelCheck::Prefix(8)
    }
}

impl FromStr for SentinelCheck
{
    type Err = MemgateError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.trim().to_lowercase().as_str() {
            "full" | "all" => Ok(SentinelCheck::Full),
            other => other
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .map(SentinelCheck::Prefix)
                .ok_or_else(|| MemgateError::InvalidArgument(format!("invalid sentinel check: {s}"))),
        }
    }
}

/// Everything discovery and the facade need to know about the deployment
#[derive(Debug, Clone)]
pub struct DriverConfig
{
    pub device_path: PathBuf,
    pub locator_library: PathBuf,
    pub locator_symbol: String,
    pub handshake_library: PathBuf,
    pub handshake_symbol: String,
    pub handshake_key: String,
    /// Key delivered to the primary backend before first use, if it needs one
    pub primary_key: Option<String>,
    pub poll: PollPolicy,
    /// Privileged shell used as `<shell> -c "rm <path>"`; `None` keeps the files
    pub cleanup_shell: Option<String>,
    pub proc_root: PathBuf,
    pub sentinel: SentinelCheck,
}

impl Default for DriverConfig
{
    fn default() -> Self
    {
        Self {
            device_path: PathBuf::from(DEFAULT_DEVICE_PATH),
            locator_library: PathBuf::from(DEFAULT_LOCATOR_LIBRARY),
            locator_symbol: DEFAULT_LOCATOR_SYMBOL.to_string(),
            handshake_library: PathBuf::from(DEFAULT_HANDSHAKE_LIBRARY),
            handshake_symbol: DEFAULT_HANDSHAKE_SYMBOL.to_string(),
            handshake_key: DEFAULT_HANDSHAKE_KEY.to_string(),
            primary_key: None,
            poll: PollPolicy::default(),
            cleanup_shell: Some(DEFAULT_CLEANUP_SHELL.to_string()),
            proc_root: PathBuf::from(DEFAULT_PROC_ROOT),
            sentinel: SentinelCheck::default(),
        }
    }
}

impl DriverConfig
{
    /// Defaults overridden by `MEMGATE_*` environment variables
    ///
    /// ## Errors
    ///
    /// Returns `InvalidArgument` when a numeric variable does not parse.
    pub fn from_env() -> MemgateResult<Self>
    {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable name
    pub fn from_lookup<F>(lookup: F) -> MemgateResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("MEMGATE_DEVICE") {
            config.device_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("MEMGATE_LOCATOR_LIB") {
            config.locator_library = PathBuf::from(value);
        }
        if let Some(value) = lookup("MEMGATE_HANDSHAKE_LIB") {
            config.handshake_library = PathBuf::from(value);
        }
        if let Some(value) = lookup("MEMGATE_HANDSHAKE_KEY") {
            config.handshake_key = value;
        }
        if let Some(value) = lookup("MEMGATE_PRIMARY_KEY") {
            config.primary_key = Some(value).filter(|k| !k.is_empty());
        }
        if let Some(value) = lookup("MEMGATE_POLL_INTERVAL_MS") {
            config.poll.interval = Duration::from_millis(parse_number("MEMGATE_POLL_INTERVAL_MS", &value)?);
        }
        if let Some(value) = lookup("MEMGATE_POLL_ATTEMPTS") {
            let attempts = parse_number("MEMGATE_POLL_ATTEMPTS", &value)?;
            config.poll.max_attempts = match attempts {
                0 => None,
                n => Some(u32::try_from(n).unwrap_or(u32::MAX)),
            };
        }
        if let Some(value) = lookup("MEMGATE_POLL_TIMEOUT_MS") {
            let millis = parse_number("MEMGATE_POLL_TIMEOUT_MS", &value)?;
            config.poll.timeout = (millis > 0).then(|| Duration::from_millis(millis));
        }
        if let Some(value) = lookup("MEMGATE_CLEANUP_SHELL") {
            let value = value.trim().to_string();
            config.cleanup_shell = match value.to_lowercase().as_str() {
                "" | "none" | "off" => None,
                _ => Some(value),
            };
        }
        if let Some(value) = lookup("MEMGATE_PROC_ROOT") {
            config.proc_root = PathBuf::from(value);
        }
        if let Some(value) = lookup("MEMGATE_SENTINEL") {
            config.sentinel = value.parse()?;
        }

        Ok(config)
    }
}

fn parse_number(name: &str, value: &str) -> MemgateResult<u64>
{
    value
        .trim()
        .parse::<u64>()
        .map_err(|err| MemgateError::InvalidArgument(format!("{name}={value:?}: {err}")))
}

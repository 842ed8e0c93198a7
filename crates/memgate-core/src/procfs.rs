//! # Process Metadata
//!
//! Lookups against procfs that the inspector needs before it touches memory:
//!
//! - [`find_pid_by_name`]: package / process name to PID via `cmdline`
//! - [`is_address_valid`]: whether an address range sits in one readable
//!   mapping of a given [`MemoryRange`] class
//!
//! Both take the proc root explicitly so tests can point them at a fake tree.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use tracing::{debug, error};

use crate::error::{MemgateError, MemgateResult};
use crate::types::{Address, ProcessId};

/// Mapping classes an operator can restrict an address to
///
/// The short names follow the usual memory-editor convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryRange
{
    /// Any mapping
    #[default]
    All,
    /// `Ca`: `r-x` mappings of executables
    Code,
    /// `Xa`: every `r-x` mapping, shared libraries included
    Executable,
    /// `Jh`: anonymous or `[heap]` `rw-` mappings
    Heap,
    /// `Da`: every `rw-` mapping
    Data,
    /// `St`: the `[stack]` mapping
    Stack,
}

impl MemoryRange
{
    pub const ALL: [MemoryRange; 6] = [
        MemoryRange::All,
        MemoryRange::Code,
        MemoryRange::Executable,
        MemoryRange::Heap,
        MemoryRange::Data,
        MemoryRange::Stack,
    ];

    /// Two-letter name shown to operators
    pub fn short_name(self) -> &'static str
    {
        match self {
            MemoryRange::All => "All",
            MemoryRange::Code => "Ca",
            MemoryRange::Executable => "Xa",
            MemoryRange::Heap => "Jh",
            MemoryRange::Data => "Da",
            MemoryRange::Stack => "St",
        }
    }

    pub fn description(self) -> &'static str
    {
        match self {
            MemoryRange::All => "all regions",
            MemoryRange::Code => "code segments (r-x executables)",
            MemoryRange::Executable => "executable regions, shared libraries included (r-x)",
            MemoryRange::Heap => "heap (rw-, anonymous or [heap])",
            MemoryRange::Data => "data segments (rw-)",
            MemoryRange::Stack => "stack (rw-, [stack])",
        }
    }

    /// Whether `entry` belongs to this class
    pub fn contains(self, entry: &MapEntry) -> bool
    {
        let perms = entry.perms.get(..3).unwrap_or("");
        let path = entry.path.as_str();
        match self {
            MemoryRange::All => true,
            MemoryRange::Code => perms == "r-x" && (!path.contains(".so") || path.contains('/')),
            MemoryRange::Executable => perms == "r-x",
            MemoryRange::Heap => perms == "rw-" && (path.is_empty() || path == "[heap]"),
            MemoryRange::Data => perms == "rw-",
            MemoryRange::Stack => perms == "rw-" && path.contains("[stack]"),
        }
    }
}

impl fmt::Display for MemoryRange
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.short_name())
    }
}

/// Accepts `0`..`5` or the short names in either case; anything else is `All`
impl FromStr for MemoryRange
{
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        Ok(match s.trim().to_lowercase().as_str() {
            "1" | "ca" => MemoryRange::Code,
            "2" | "xa" => MemoryRange::Executable,
            "3" | "jh" => MemoryRange::Heap,
            "4" | "da" => MemoryRange::Data,
            "5" | "st" => MemoryRange::Stack,
            _ => MemoryRange::All,
        })
    }
}

/// One line of `/proc/<pid>/maps`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEntry
{
    pub start: Address,
    pub end: Address,
    /// Permission string such as `r-xp`
    pub perms: String,
    pub offset: u64,
    pub device: String,
    pub inode: u64,
    /// Backing file or pseudo-name; empty for anonymous mappings
    pub path: String,
}

impl MapEntry
{
    /// Parse one maps line; `None` for anything malformed
    pub fn parse(line: &str) -> Option<Self>
    {
        let (range, rest) = next_field(line)?;
        let (perms, rest) = next_field(rest)?;
        let (offset, rest) = next_field(rest)?;
        let (device, rest) = next_field(rest)?;
        let (inode, rest) = next_field(rest)?;

        let (start, end) = range.split_once('-')?;
        Some(Self {
            start: Address::new(u64::from_str_radix(start, 16).ok()?),
            end: Address::new(u64::from_str_radix(end, 16).ok()?),
            perms: perms.to_string(),
            offset: u64::from_str_radix(offset, 16).ok()?,
            device: device.to_string(),
            inode: inode.parse().ok()?,
            path: rest.trim().to_string(),
        })
    }

    pub fn is_readable(&self) -> bool
    {
        self.perms.starts_with('r')
    }

    /// Whether `[addr, addr + size)` lies inside this mapping
    pub fn covers(&self, addr: Address, size: u64) -> bool
    {
        match addr.checked_add(size) {
            Some(end) => addr >= self.start && end <= self.end,
            None => false,
        }
    }
}

fn next_field(input: &str) -> Option<(&str, &str)>
{
    let input = input.trim_start();
    if input.is_empty() {
        return None;
    }
    let end = input.find(char::is_whitespace).unwrap_or(input.len());
    Some(input.split_at(end))
}

/// All parseable mappings of `pid`
pub fn read_maps(proc_root: &Path, pid: ProcessId) -> MemgateResult<Vec<MapEntry>>
{
    let pid = pid.validate()?;
    let path = proc_root.join(pid.to_string()).join("maps");
    let contents = fs::read_to_string(&path).inspect_err(|err| {
        error!(path = %path.display(), error = %err, "cannot read memory map");
    })?;
    Ok(contents.lines().filter_map(MapEntry::parse).collect())
}

/// Whether `[addr, addr + size)` sits inside one readable mapping of class `range`
///
/// ## Errors
///
/// - `InvalidArgument`: `pid <= 0` or `size == 0`
/// - `Io`: the maps file could not be read
pub fn is_address_valid(
    proc_root: &Path,
    pid: ProcessId,
    addr: Address,
    size: usize,
    range: MemoryRange,
) -> MemgateResult<bool>
{
    if size == 0 {
        return Err(MemgateError::InvalidArgument("size must not be zero".to_string()));
    }

    let found = read_maps(proc_root, pid)?
        .iter()
        .any(|entry| entry.is_readable() && entry.covers(addr, size as u64) && range.contains(entry));
    debug!(pid = pid.0, address = %addr, size, %range, found, "address classification");
    Ok(found)
}

/// First process whose `cmdline` starts with `name`
///
/// Only the first NUL-separated argument is compared, after trimming
/// whitespace. Processes whose `cmdline` cannot be read are skipped. The
/// lowest matching PID wins.
///
/// ## Errors
///
/// - `InvalidArgument`: `name` is empty
/// - `Io`: the proc root itself cannot be listed
pub fn find_pid_by_name(proc_root: &Path, name: &str) -> MemgateResult<Option<ProcessId>>
{
    let name = name.trim();
    if name.is_empty() {
        return Err(MemgateError::InvalidArgument("process name must not be empty".to_string()));
    }

    let mut pids: Vec<i32> = fs::read_dir(proc_root)?
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|ft| ft.is_dir()))
        .filter_map(|entry| entry.file_name().to_str()?.parse::<i32>().ok())
        .filter(|pid| *pid > 0)
        .collect();
    pids.sort_unstable();

    for pid in pids {
        let Ok(cmdline) = fs::read(proc_root.join(pid.to_string()).join("cmdline")) else {
            continue;
        };
        let first = cmdline.split(|&b| b == 0).next().unwrap_or_default();
        if String::from_utf8_lossy(first).trim() == name {
            debug!(pid, name, "process found");
            return Ok(Some(ProcessId(pid)));
        }
    }

    debug!(name, "no process matched");
    Ok(None)
}

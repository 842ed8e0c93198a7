//! # Interactive Inspector
//!
//! Prompt-driven float/double reader:
//!
//! 1. Pick the target by PID or by package name
//! 2. Pick a memory range class (`0`-`5` or `Ca`, `Xa`, `Jh`, `Da`, `St`)
//! 3. Initialize the backend
//! 4. Repeatedly read an address as `f32` or `f64`, refusing addresses that
//!    are not inside a readable mapping of the chosen class
//!
//! `exit` at any prompt, or end of input, leaves the inspector.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use memgate_core::config::DriverConfig;
use memgate_core::error::MemgateResult;
use memgate_core::procfs::{self, MemoryRange};
use memgate_core::session::Session;
use memgate_core::types::{Address, ProcessId};
use memgate_utils::{debug, warn};

/// Value types the inspector can decode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind
{
    F32,
    F64,
}

impl ValueKind
{
    fn size(self) -> usize
    {
        match self {
            ValueKind::F32 => 4,
            ValueKind::F64 => 8,
        }
    }
}

pub struct Inspector<R, W>
{
    input: R,
    output: W,
    proc_root: PathBuf,
}

impl<R: BufRead, W: Write> Inspector<R, W>
{
    pub fn new(input: R, output: W, proc_root: impl Into<PathBuf>) -> Self
    {
        Self {
            input,
            output,
            proc_root: proc_root.into(),
        }
    }

    pub fn print_banner(&mut self) -> io::Result<()>
    {
        writeln!(self.output, "===== memgate inspector =====")?;
        writeln!(self.output, "Reads float/double values from another process.")?;
        writeln!(self.output, "Type `exit` at any prompt to quit.")
    }

    pub fn print_ranges(&mut self) -> io::Result<()>
    {
        writeln!(self.output, "Memory ranges:")?;
        for (index, range) in MemoryRange::ALL.iter().enumerate() {
            writeln!(self.output, "  {index} ({range}): {}", range.description())?;
        }
        Ok(())
    }

    /// Print `label` and read one trimmed line; `None` on `exit` or end of input
    fn prompt(&mut self, label: &str) -> io::Result<Option<String>>
    {
        write!(self.output, "{label}")?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            writeln!(self.output)?;
            return Ok(None);
        }

        let line = line.trim();
        if line == "exit" {
            return Ok(None);
        }
        Ok(Some(line.to_string()))
    }

    /// Ask for a PID or a package name until one resolves
    pub fn select_target(&mut self) -> MemgateResult<Option<ProcessId>>
    {
        loop {
            let Some(choice) = self.prompt("\nSelect target by (1 = PID, 2 = package name): ")? else {
                return Ok(None);
            };

            match choice.as_str() {
                "1" => loop {
                    let Some(text) = self.prompt("Target PID: ")? else {
                        return Ok(None);
                    };
                    match text.parse::<ProcessId>() {
                        Ok(pid) => return Ok(Some(pid)),
                        Err(_) => writeln!(self.output, "PID must be a positive integer")?,
                    }
                },
                "2" => {
                    let Some(package) = self.prompt("Package name (e.g. com.example.game): ")? else {
                        return Ok(None);
                    };
                    if package.is_empty() {
                        writeln!(self.output, "Package name must not be empty")?;
                        continue;
                    }
                    match procfs::find_pid_by_name(&self.proc_root, &package)? {
                        Some(pid) => {
                            writeln!(self.output, "Found PID {pid}")?;
                            return Ok(Some(pid));
                        }
                        None => writeln!(self.output, "No process named [{package}]")?,
                    }
                }
                _ => writeln!(self.output, "Enter 1 or 2")?,
            }
        }
    }

    /// Ask for a range class; unrecognised input selects all regions
    pub fn select_range(&mut self) -> MemgateResult<Option<MemoryRange>>
    {
        self.print_ranges()?;
        let Some(text) = self.prompt("\nMemory range (number or short name, e.g. 1 or Ca): ")? else {
            return Ok(None);
        };
        Ok(text.parse().ok())
    }

    /// Read values until the operator types `exit`
    pub fn read_loop(&mut self, session: &Session, range: MemoryRange) -> MemgateResult<()>
    {
        loop {
            let Some(text) = self.prompt("\nAddress (e.g. 0x4021B810): ")? else {
                writeln!(self.output, "Bye")?;
                return Ok(());
            };
            let Some(address) = Address::parse_hex(&text) else {
                writeln!(self.output, "Invalid address (hexadecimal expected)")?;
                continue;
            };

            let Some(kind) = self.prompt("Value type (1 = float, 4 bytes; 2 = double, 8 bytes): ")? else {
                writeln!(self.output, "Bye")?;
                return Ok(());
            };
            let kind = match kind.as_str() {
                "1" => ValueKind::F32,
                "2" => ValueKind::F64,
                _ => {
                    writeln!(self.output, "Enter 1 or 2")?;
                    continue;
                }
            };

            let valid = procfs::is_address_valid(&self.proc_root, session.pid(), address, kind.size(), range)
                .unwrap_or_else(|err| {
                    warn!(error = %err, "address classification failed");
                    false
                });
            if !valid {
                writeln!(
                    self.output,
                    "Address {address:#x} is not in range {range} or is not readable"
                )?;
                continue;
            }

            debug!(address = %address, ?kind, "reading value");
            match kind {
                ValueKind::F32 => {
                    let value: f32 = session.read_value(address);
                    writeln!(self.output, "float at {address:#x}: {value}")?;
                }
                ValueKind::F64 => {
                    let value: f64 = session.read_value(address);
                    writeln!(self.output, "double at {address:#x}: {value}")?;
                }
            }
        }
    }

    #[cfg(test)]
    fn into_output(self) -> W
    {
        self.output
    }
}

/// Run the inspector on stdin/stdout, prompting for whatever was not given
pub fn run(config: &DriverConfig, pid: Option<ProcessId>, range: Option<MemoryRange>) -> MemgateResult<()>
{
    let stdin = io::stdin();
    let mut inspector = Inspector::new(stdin.lock(), io::stdout(), config.proc_root.clone());
    inspector.print_banner()?;

    let pid = match pid {
        Some(pid) => pid,
        None => match inspector.select_target()? {
            Some(pid) => pid,
            None => return Ok(()),
        },
    };
    let range = match range {
        Some(range) => range,
        None => match inspector.select_range()? {
            Some(range) => range,
            None => return Ok(()),
        },
    };

    println!("Initializing backend for PID {pid} ...");
    let session = Session::initialize(pid, config)?;
    inspector.read_loop(&session, range)
}

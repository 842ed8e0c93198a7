mod inspector;
mod output;

use std::process;

use clap::{Args, Parser, Subcommand};
use memgate_core::config::DriverConfig;
use memgate_core::error::{MemgateError, MemgateResult};
use memgate_core::procfs::{self, MemoryRange};
use memgate_core::session::Session;
use memgate_core::types::{Address, ProcessId};
use memgate_utils::logging::{init_logging_for_interactive, init_with_settings};
use memgate_utils::{info, LogGuard, LogLevel, LogSettings};

/// Read and write another process's memory through a kernel driver.
#[derive(Parser, Debug)]
#[command(name = "memgate")]
#[command(version)]
#[command(about = "Read and write another process's memory through a kernel driver", long_about = None)]
struct Cli
{
    /// Log level (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

/// How the target process is named on the command line
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct TargetArgs
{
    /// Target process ID
    #[arg(long)]
    pid: Option<ProcessId>,
    /// Target package / process name, matched against /proc/<pid>/cmdline
    #[arg(long)]
    package: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Interactive float/double reader; prompts for anything not given
    Inspect
    {
        /// Target process ID
        #[arg(long, conflicts_with = "package")]
        pid: Option<ProcessId>,
        /// Target package / process name
        #[arg(long)]
        package: Option<String>,
        /// Memory range class: 0-5 or All, Ca, Xa, Jh, Da, St
        #[arg(long)]
        range: Option<MemoryRange>,
    },
    /// Hexdump memory from the target
    Read
    {
        #[command(flatten)]
        target: TargetArgs,
        /// Address to read from (hex, e.g. 0x7f12345678)
        address: String,
        /// Number of bytes to read
        #[arg(short, long, default_value_t = 16)]
        length: usize,
    },
    /// Write bytes into the target
    Write
    {
        #[command(flatten)]
        target: TargetArgs,
        /// Address to write to (hex)
        address: String,
        /// Bytes to write, e.g. `deadbeef` or `de ad be ef`
        bytes: String,
    },
    /// Print the load address of a module in the target
    ModuleBase
    {
        #[command(flatten)]
        target: TargetArgs,
        /// Module file name, e.g. libgame.so
        name: String,
    },
}

fn main()
{
    let cli = Cli::parse();

    let _log_guard = match init_cli_logging(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = run_command(cli) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

/// The inspector logs to a file so events never land between prompts
fn init_cli_logging(cli: &Cli) -> Result<LogGuard, memgate_utils::logging::LoggingError>
{
    if matches!(cli.command, Commands::Inspect { .. }) {
        let (path, guard) = init_logging_for_interactive(cli.log_level)?;
        println!("Logging to {}", path.display());
        return Ok(guard);
    }

    let settings = LogSettings {
        level: cli.log_level,
        ..LogSettings::from_env()
    };
    init_with_settings(&settings)
}

fn run_command(cli: Cli) -> MemgateResult<()>
{
    let config = DriverConfig::from_env()?;

    match cli.command {
        Commands::Inspect { pid, package, range } => {
            let pid = match (pid, package) {
                (Some(pid), _) => Some(pid.validate()?),
                (None, Some(package)) => Some(find_package(&config, &package)?),
                (None, None) => None,
            };
            inspector::run(&config, pid, range)
        }
        Commands::Read {
            target,
            address,
            length,
        } => {
            let address = parse_address(&address)?;
            let session = open_session(&config, &target)?;

            let mut buf = vec![0u8; length];
            let source = session.read(address, &mut buf)?;
            print!("{}", output::hexdump(address, &buf));
            println!("source: {source}");
            Ok(())
        }
        Commands::Write {
            target,
            address,
            bytes,
        } => {
            let address = parse_address(&address)?;
            let bytes = output::parse_hex_bytes(&bytes).map_err(MemgateError::InvalidArgument)?;
            let session = open_session(&config, &target)?;

            session.write(address, &bytes)?;
            println!("Wrote {} bytes at {address:#x} via {} backend", bytes.len(), session.backend_kind());
            Ok(())
        }
        Commands::ModuleBase { target, name } => {
            let session = open_session(&config, &target)?;
            let base = session.module_base(&name, session.pid())?;
            if base.is_zero() {
                println!("{name} is not loaded in PID {}", session.pid());
            } else {
                println!("{name}: {base:#x}");
            }
            Ok(())
        }
    }
}

fn open_session(config: &DriverConfig, target: &TargetArgs) -> MemgateResult<Session>
{
    let pid = match (&target.pid, &target.package) {
        (Some(pid), _) => pid.validate()?,
        (None, Some(package)) => find_package(config, package)?,
        (None, None) => {
            return Err(MemgateError::InvalidArgument("either --pid or --package is required".to_string()));
        }
    };

    info!(pid = pid.0, "initializing session");
    let session = Session::initialize(pid, config)?;
    println!("Using {} backend for PID {pid}", session.backend_kind());
    Ok(session)
}

fn find_package(config: &DriverConfig, package: &str) -> MemgateResult<ProcessId>
{
    let pid = procfs::find_pid_by_name(&config.proc_root, package)?
        .ok_or_else(|| MemgateError::ProcessNotFound(package.to_string()))?;
    println!("Found PID {pid} for {package}");
    Ok(pid)
}

fn parse_address(text: &str) -> MemgateResult<Address>
{
    Address::parse_hex(text)
        .ok_or_else(|| MemgateError::InvalidArgument(format!("invalid address {text:?} (hexadecimal expected)")))
}

#[cfg(test)]
mod tests
{
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition()
    {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_read_requires_one_target()
    {
        assert!(Cli::try_parse_from(["memgate", "read", "0x1000"]).is_err());
        assert!(Cli::try_parse_from(["memgate", "read", "--pid", "1", "--package", "x", "0x1000"]).is_err());

        let cli = Cli::try_parse_from(["memgate", "read", "--pid", "812", "0x1000", "-l", "32"]).unwrap();
        match cli.command {
            Commands::Read { target, length, .. } => {
                assert_eq!(target.pid, Some(ProcessId(812)));
                assert_eq!(length, 32);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_inspect_arguments_are_optional()
    {
        let cli = Cli::try_parse_from(["memgate", "inspect", "--range", "Jh", "--log-level", "debug"]).unwrap();
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
        match cli.command {
            Commands::Inspect { pid, package, range } => {
                assert!(pid.is_none());
                assert!(package.is_none());
                assert_eq!(range, Some(MemoryRange::Heap));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_address()
    {
        assert_eq!(parse_address("0x7000").unwrap(), Address::new(0x7000));
        assert!(matches!(parse_address("nope"), Err(MemgateError::InvalidArgument(_))));
    }
}

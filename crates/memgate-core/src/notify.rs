//! Operator notifications.
//!
//! Discovery reports which backend ended up active through a [`Notifier`].
//! The console implementation is what the CLI uses; library callers that
//! surface messages elsewhere implement the trait themselves.

use std::fmt;

use tracing::{info, warn};

/// How prominent a notification is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity
{
    Info,
    Warning,
}

impl fmt::Display for Severity
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Severity::Info => write!(f, "notice"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// Sink for operator-facing messages
pub trait Notifier
{
    fn notify(&self, message: &str, severity: Severity);
}

/// Prints `[notice] <message>` to stdout and mirrors it into the log
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier
{
    fn notify(&self, message: &str, severity: Severity)
    {
        match severity {
            Severity::Info => info!(notification = message),
            Severity::Warning => warn!(notification = message),
        }
        println!("[{severity}] {message}");
    }
}

/// Discards every message
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier
{
    fn notify(&self, _message: &str, _severity: Severity) {}
}

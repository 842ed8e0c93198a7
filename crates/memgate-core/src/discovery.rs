//! # Backend Discovery
//!
//! Finds a working kernel channel for a target process.
//!
//! 1. Try to open the primary device node. If that works (and the optional
//!    primary key is accepted) the primary backend is used and no support
//!    library is ever touched.
//! 2. Otherwise load the locator library, then the handshake library, and
//!    resolve one entry point from each.
//! 3. Poll the locator until it hands out a positive token, bounded by the
//!    configured [`PollPolicy`](crate::config::PollPolicy) and a
//!    [`CancelToken`].
//! 4. Perform the handshake with the token, the target pid and the key.
//! 5. Unload both libraries, remove their files, and announce the backend.
//!
//! Libraries are owned by the entry points the [`SupportLoader`] returns, so
//! every early return in steps 2-4 unloads whatever was already loaded.
//!
//! ## Example
//!
//! ```no_run
//! use memgate_core::config::DriverConfig;
//! use memgate_core::discovery::Discovery;
//! use memgate_core::types::ProcessId;
//!
//! let config = DriverConfig::default();
//! let backend = Discovery::new(&config).run(ProcessId(1234))?;
//! println!("using {} backend", backend.kind());
//! # Ok::<(), memgate_core::error::MemgateError>(())
//! ```

use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use libc::c_int;
use tracing::{debug, error, info, trace, warn};

use crate::backend::{Backend, PrimaryBackend, SecondaryBackend};
use crate::config::DriverConfig;
use crate::error::{MemgateError, MemgateResult};
use crate::loader::{DlLoader, SupportLoader, TargetLocator};
use crate::notify::{ConsoleNotifier, Notifier, Severity};
use crate::protocol::TargetDescriptor;
use crate::types::ProcessId;

/// Shared flag that stops a discovery poll loop from another thread
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken
{
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Request cancellation; the poll loop stops before its next attempt
    pub fn cancel(&self)
    {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool
    {
        self.0.load(Ordering::SeqCst)
    }
}

/// Builder for one discovery run
///
/// Defaults to the `dlopen` loader and the console notifier; tests swap in
/// their own with [`Discovery::loader`] and [`Discovery::notifier`].
pub struct Discovery<'a>
{
    config: &'a DriverConfig,
    loader: Box<dyn SupportLoader + 'a>,
    notifier: Box<dyn Notifier + 'a>,
    cancel: CancelToken,
}

impl<'a> Discovery<'a>
{
    pub fn new(config: &'a DriverConfig) -> Self
    {
        Self {
            config,
            loader: Box::new(DlLoader::new(config.cleanup_shell.clone())),
            notifier: Box::new(ConsoleNotifier),
            cancel: CancelToken::new(),
        }
    }

    /// Use a different support-library loader
    pub fn loader(mut self, loader: impl SupportLoader + 'a) -> Self
    {
        self.loader = Box::new(loader);
        self
    }

    /// Use a different notification sink
    pub fn notifier(mut self, notifier: impl Notifier + 'a) -> Self
    {
        self.notifier = Box::new(notifier);
        self
    }

    /// Observe `cancel` while polling
    pub fn cancel_token(mut self, cancel: CancelToken) -> Self
    {
        self.cancel = cancel;
        self
    }

    /// Select a backend for `pid`
    ///
    /// ## Errors
    ///
    /// - `InvalidArgument`: `pid` is not positive, or a key contains a NUL byte
    /// - `BackendFailure`: the primary node opened but rejected the key
    /// - `LibraryLoad` / `SymbolMissing`: a support library is unusable
    /// - `DiscoveryTimedOut` / `DiscoveryCancelled`: the poll loop gave up
    pub fn run(self, pid: ProcessId) -> MemgateResult<Box<dyn Backend>>
    {
        let pid = pid.validate().inspect_err(|err| error!(error = %err, "discovery refused"))?;
        info!(pid = pid.0, "starting backend discovery");

        match PrimaryBackend::open(&self.config.device_path) {
            Ok(primary) => {
                if let Some(key) = &self.config.primary_key {
                    primary.init_key(key)?;
                    debug!("primary backend accepted the key");
                }
                self.notifier.notify(
                    &format!("primary backend active on {}", primary.path().display()),
                    Severity::Info,
                );
                return Ok(Box::new(primary));
            }
            Err(err) => {
                warn!(
                    device = %self.config.device_path.display(),
                    error = %err,
                    "primary device node unavailable, trying secondary backend"
                );
            }
        }

        let secondary = self.connect_secondary(pid)?;
        self.notifier.notify(
            &format!("secondary backend active (token {})", secondary.token()),
            Severity::Info,
        );
        Ok(Box::new(secondary))
    }

    fn connect_secondary(&self, pid: ProcessId) -> MemgateResult<SecondaryBackend>
    {
        let config = self.config;
        let key = CString::new(config.handshake_key.as_str())
            .map_err(|_| MemgateError::InvalidArgument("handshake key contains a NUL byte".to_string()))?;

        let (token, status) = {
            let mut locator = self
                .loader
                .load_locator(&config.locator_library, &config.locator_symbol)
                .inspect_err(|err| error!(error = %err, "cannot load locator library"))?;
            let mut handshaker = self
                .loader
                .load_handshaker(&config.handshake_library, &config.handshake_symbol)
                .inspect_err(|err| error!(error = %err, "cannot load handshake library"))?;

            let token = self.poll_target(locator.as_mut())?;
            let status = handshaker.handshake(token, pid, &key);
            // TODO: abort discovery on a failed handshake once the driver's success code is known
            info!(token, status, pid = pid.0, "handshake returned");
            (token, status)
        };

        self.loader.remove_artifact(&config.locator_library);
        self.loader.remove_artifact(&config.handshake_library);

        SecondaryBackend::new(token, status)
    }

    fn poll_target(&self, locator: &mut dyn TargetLocator) -> MemgateResult<c_int>
    {
        let policy = &self.config.poll;
        let started = Instant::now();
        let mut descriptor = TargetDescriptor::default();
        let mut attempts: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                warn!(attempts, "discovery cancelled while polling");
                return Err(MemgateError::DiscoveryCancelled);
            }

            let token = locator.locate(&mut descriptor);
            attempts = attempts.saturating_add(1);
            if token > 0 {
                debug!(attempts, token, "locator handed out a token");
                return Ok(token);
            }
            trace!(attempts, token, "target not ready");

            if policy.is_exhausted(attempts, started.elapsed()) {
                error!(attempts, elapsed = ?started.elapsed(), "locator never became ready");
                return Err(MemgateError::DiscoveryTimedOut { attempts });
            }

            thread::sleep(policy.interval);
        }
    }
}

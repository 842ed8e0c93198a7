//! # Support Library Loading
//!
//! The secondary backend is unlocked by two native libraries that are
//! dropped on disk by the driver installer. Each exports one entry point:
//!
//! - **locate target**: `int f(TargetDescriptor*)`, returns a positive token
//!   once the kernel side is ready
//! - **perform handshake**: `char f(int token, pid_t pid, char* key)`
//!
//! Loading is split behind [`SupportLoader`] so discovery can be exercised
//! without real libraries. The `dlopen` implementation ties every resolved
//! function pointer to a [`DynamicLibrary`] guard, so dropping the wrapper is
//! what unloads the library. A pointer can never outlive its library.

use std::ffi::{c_void, CStr, CString};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::ptr::NonNull;

use libc::{c_char, c_int, pid_t};
use tracing::{debug, info, warn};

use crate::error::{MemgateError, MemgateResult};
use crate::protocol::TargetDescriptor;
use crate::types::ProcessId;

/// Polls the kernel side for the backend token
pub trait TargetLocator
{
    /// One poll; non-positive return values mean "not ready yet"
    fn locate(&mut self, descriptor: &mut TargetDescriptor) -> c_int;
}

/// Authorizes the target process on the secondary backend
pub trait Handshaker
{
    /// Returns the driver's raw status byte
    fn handshake(&mut self, token: c_int, pid: ProcessId, key: &CStr) -> u8;
}

/// Produces the two discovery entry points and disposes of their files
///
/// A returned entry point keeps its library loaded until it is dropped.
pub trait SupportLoader
{
    /// Load `path` and resolve the "locate target" entry point
    fn load_locator(&self, path: &Path, symbol: &str) -> MemgateResult<Box<dyn TargetLocator>>;

    /// Load `path` and resolve the "perform handshake" entry point
    fn load_handshaker(&self, path: &Path, symbol: &str) -> MemgateResult<Box<dyn Handshaker>>;

    /// Remove a library file once it is no longer loaded
    ///
    /// Best effort: failures are logged, never returned.
    fn remove_artifact(&self, path: &Path);
}

/// RAII guard around a `dlopen` handle
///
/// The library is closed with `dlclose` when the guard is dropped.
#[derive(Debug)]
pub struct DynamicLibrary
{
    handle: NonNull<c_void>,
    path: PathBuf,
}

impl DynamicLibrary
{
    /// Load a library with `RTLD_LAZY`
    ///
    /// ## Errors
    ///
    /// - `InvalidArgument`: the path contains a NUL byte
    /// - `LibraryLoad`: `dlopen` failed; carries the `dlerror()` text
    pub fn open(path: &Path) -> MemgateResult<Self>
    {
        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
            MemgateError::InvalidArgument(format!("library path {} contains a NUL byte", path.display()))
        })?;

        // SAFETY: `c_path` is a valid NUL-terminated string.
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_LAZY) };
        let handle = NonNull::new(handle).ok_or_else(|| MemgateError::LibraryLoad {
            path: path.to_path_buf(),
            reason: last_dl_error(),
        })?;

        debug!(library = %path.display(), "loaded support library");
        Ok(Self {
            handle,
            path: path.to_path_buf(),
        })
    }

    /// Resolve a symbol's address
    pub fn symbol(&self, name: &str) -> MemgateResult<NonNull<c_void>>
    {
        let c_name = CString::new(name)
            .map_err(|_| MemgateError::InvalidArgument(format!("symbol {name:?} contains a NUL byte")))?;

        // SAFETY: the handle is live for as long as `self`; clearing the
        // pending error first makes a NULL result attributable to this lookup.
        let address = unsafe {
            libc::dlerror();
            libc::dlsym(self.handle.as_ptr(), c_name.as_ptr())
        };

        NonNull::new(address).ok_or_else(|| MemgateError::SymbolMissing {
            symbol: name.to_string(),
            reason: last_dl_error(),
        })
    }

    pub fn path(&self) -> &Path
    {
        &self.path
    }
}

impl Drop for DynamicLibrary
{
    fn drop(&mut self)
    {
        // SAFETY: the handle came from a successful `dlopen` and is closed once.
        let ret = unsafe { libc::dlclose(self.handle.as_ptr()) };
        if ret == 0 {
            debug!(library = %self.path.display(), "unloaded support library");
        } else {
            warn!(library = %self.path.display(), error = %last_dl_error(), "dlclose failed");
        }
    }
}

fn last_dl_error() -> String
{
    // SAFETY: `dlerror` returns NULL or a pointer to a thread-local string
    // that stays valid until the next dl* call on this thread.
    unsafe {
        let message = libc::dlerror();
        if message.is_null() {
            "unknown dynamic loader error".to_string()
        } else {
            CStr::from_ptr(message).to_string_lossy().into_owned()
        }
    }
}

type LocateFn = unsafe extern "C" fn(*mut TargetDescriptor) -> c_int;
type HandshakeFn = unsafe extern "C" fn(c_int, pid_t, *mut c_char) -> c_char;

struct NativeLocator
{
    func: LocateFn,
    _library: DynamicLibrary,
}

impl TargetLocator for NativeLocator
{
    fn locate(&mut self, descriptor: &mut TargetDescriptor) -> c_int
    {
        // SAFETY: `func` was resolved from `_library`, which is still loaded.
        unsafe { (self.func)(descriptor) }
    }
}

struct NativeHandshaker
{
    func: HandshakeFn,
    _library: DynamicLibrary,
}

impl Handshaker for NativeHandshaker
{
    fn handshake(&mut self, token: c_int, pid: ProcessId, key: &CStr) -> u8
    {
        // The entry point takes a mutable key pointer, so hand it a scratch copy.
        let mut key_bytes = key.to_bytes_with_nul().to_vec();
        // SAFETY: `func` was resolved from `_library`; `key_bytes` is NUL-terminated.
        let status = unsafe { (self.func)(token, pid.raw(), key_bytes.as_mut_ptr().cast()) };
        status as u8
    }
}

/// [`SupportLoader`] backed by `dlopen`/`dlsym` and a privileged shell
#[derive(Debug, Clone, Default)]
pub struct DlLoader
{
    cleanup_shell: Option<String>,
}

impl DlLoader
{
    /// `cleanup_shell` is run as `<shell> -c "rm '<path>'"`; `None` keeps the files
    pub fn new(cleanup_shell: Option<String>) -> Self
    {
        Self { cleanup_shell }
    }
}

impl SupportLoader for DlLoader
{
    fn load_locator(&self, path: &Path, symbol: &str) -> MemgateResult<Box<dyn TargetLocator>>
    {
        let library = DynamicLibrary::open(path)?;
        let address = library.symbol(symbol)?;
        // SAFETY: the exported symbol has the C signature of `LocateFn`.
        let func = unsafe { std::mem::transmute::<*mut c_void, LocateFn>(address.as_ptr()) };
        Ok(Box::new(NativeLocator {
            func,
            _library: library,
        }))
    }

    fn load_handshaker(&self, path: &Path, symbol: &str) -> MemgateResult<Box<dyn Handshaker>>
    {
        let library = DynamicLibrary::open(path)?;
        let address = library.symbol(symbol)?;
        // SAFETY: the exported symbol has the C signature of `HandshakeFn`.
        let func = unsafe { std::mem::transmute::<*mut c_void, HandshakeFn>(address.as_ptr()) };
        Ok(Box::new(NativeHandshaker {
            func,
            _library: library,
        }))
    }

    fn remove_artifact(&self, path: &Path)
    {
        let Some(shell) = &self.cleanup_shell else {
            debug!(library = %path.display(), "artifact cleanup disabled");
            return;
        };

        let command = format!("rm {}", shell_quote(&path.to_string_lossy()));
        match Command::new(shell).arg("-c").arg(&command).status() {
            Ok(status) if status.success() => info!(library = %path.display(), "removed support library"),
            Ok(status) => warn!(library = %path.display(), %status, "removing support library failed"),
            Err(err) => warn!(library = %path.display(), shell, error = %err, "could not run cleanup shell"),
        }
    }
}

/// Single-quote `value` for `sh -c`
fn shell_quote(value: &str) -> String
{
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_open_missing_library()
    {
        let err = DynamicLibrary::open(Path::new("/nonexistent/libmemgate-missing.so")).unwrap_err();
        match err {
            MemgateError::LibraryLoad { path, reason } => {
                assert_eq!(path, PathBuf::from("/nonexistent/libmemgate-missing.so"));
                assert!(!reason.is_empty());
            }
            other => panic!("expected LibraryLoad, got {other:?}"),
        }
    }

    #[test]
    fn test_loader_reports_missing_library()
    {
        let loader = DlLoader::new(None);
        let result = loader.load_locator(Path::new("/nonexistent/liblocator.so"), "locate");
        assert!(matches!(result, Err(MemgateError::LibraryLoad { .. })));
    }

    #[test]
    fn test_shell_quote()
    {
        assert_eq!(shell_quote("/data/system/lib.so"), "'/data/system/lib.so'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_remove_artifact_with_plain_shell()
    {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();
        let loader = DlLoader::new(Some("sh".to_string()));

        loader.remove_artifact(&path);
        assert!(!path.exists());
    }

    #[test]
    fn test_remove_artifact_disabled_keeps_file()
    {
        let file = tempfile::NamedTempFile::new().unwrap();
        let loader = DlLoader::new(None);

        loader.remove_artifact(file.path());
        assert!(file.path().exists());
    }
}

//! Tests for the session facade: fallback policy, writes and module lookups

use std::cell::{Cell, RefCell};
use std::fs;
use std::io;
use std::rc::Rc;

use memgate_core::backend::{Backend, BackendKind};
use memgate_core::config::SentinelCheck;
use memgate_core::error::{FallbackTrigger, MemgateError};
use memgate_core::fallback::{FallbackReader, ProcMemReader};
use memgate_core::protocol::ModuleName;
use memgate_core::session::{ReadSource, Session};
use memgate_core::types::{Address, ProcessId};

const TARGET: ProcessId = ProcessId(4242);

#[derive(Default)]
struct Calls
{
    reads: Cell<usize>,
    writes: Cell<usize>,
    written: RefCell<Vec<u8>>,
    lookups: RefCell<Vec<(ProcessId, Vec<u8>)>>,
    fallbacks: Cell<usize>,
}

enum OnRead
{
    /// Copy these bytes into the front of the buffer and report success
    Copy(Vec<u8>),
    /// Report success without touching the buffer
    Silent,
    /// Report failure
    Fail,
}

struct SpyBackend
{
    calls: Rc<Calls>,
    kind: BackendKind,
    on_read: OnRead,
    fail_writes: bool,
    module_base: Option<Address>,
}

impl SpyBackend
{
    fn new(calls: &Rc<Calls>, on_read: OnRead) -> Self
    {
        Self {
            calls: Rc::clone(calls),
            kind: BackendKind::Secondary,
            on_read,
            fail_writes: false,
            module_base: Some(Address::ZERO),
        }
    }
}

impl Backend for SpyBackend
{
    fn kind(&self) -> BackendKind
    {
        self.kind
    }

    fn read(&self, _pid: ProcessId, _addr: Address, dst: &mut [u8]) -> io::Result<()>
    {
        self.calls.reads.set(self.calls.reads.get() + 1);
        match &self.on_read {
            OnRead::Copy(bytes) => {
                let n = bytes.len().min(dst.len());
                dst[..n].copy_from_slice(&bytes[..n]);
                Ok(())
            }
            OnRead::Silent => Ok(()),
            OnRead::Fail => Err(io::Error::from_raw_os_error(libc::EFAULT)),
        }
    }

    fn write(&self, _pid: ProcessId, _addr: Address, src: &[u8]) -> io::Result<()>
    {
        self.calls.writes.set(self.calls.writes.get() + 1);
        self.calls.written.borrow_mut().extend_from_slice(src);
        if self.fail_writes {
            Err(io::Error::from_raw_os_error(libc::EPERM))
        } else {
            Ok(())
        }
    }

    fn module_base(&self, pid: ProcessId, name: &ModuleName) -> io::Result<Address>
    {
        self.calls.lookups.borrow_mut().push((pid, name.as_bytes().to_vec()));
        self.module_base.ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))
    }
}

struct SpyFallback
{
    calls: Rc<Calls>,
    data: Option<Vec<u8>>,
}

impl FallbackReader for SpyFallback
{
    fn read_fallback(&self, _pid: ProcessId, _addr: Address, dst: &mut [u8]) -> io::Result<()>
    {
        self.calls.fallbacks.set(self.calls.fallbacks.get() + 1);
        match &self.data {
            Some(data) if data.len() >= dst.len() => {
                dst.copy_from_slice(&data[..dst.len()]);
                Ok(())
            }
            _ => Err(io::Error::from(io::ErrorKind::PermissionDenied)),
        }
    }
}

fn session_with(backend: SpyBackend, fallback_data: Option<Vec<u8>>) -> Session
{
    let fallback = SpyFallback {
        calls: Rc::clone(&backend.calls),
        data: fallback_data,
    };
    Session::new(TARGET, Box::new(backend), Box::new(fallback)).unwrap()
}

#[test]
fn test_session_rejects_non_positive_pid()
{
    let calls = Rc::new(Calls::default());
    let backend = SpyBackend::new(&calls, OnRead::Silent);
    let result = Session::new(ProcessId(0), Box::new(backend), Box::new(ProcMemReader::default()));
    assert!(matches!(result, Err(MemgateError::InvalidArgument(_))));
}

#[test]
fn test_empty_read_never_reaches_backend()
{
    let calls = Rc::new(Calls::default());
    let session = session_with(SpyBackend::new(&calls, OnRead::Silent), None);

    let result = session.read(Address::new(0x1000), &mut []);
    assert!(matches!(result, Err(MemgateError::InvalidArgument(_))));
    assert_eq!(calls.reads.get(), 0);
    assert_eq!(calls.fallbacks.get(), 0);
}

#[test]
fn test_honest_backend_read()
{
    let calls = Rc::new(Calls::default());
    let bytes = vec![0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18];
    let session = session_with(SpyBackend::new(&calls, OnRead::Copy(bytes.clone())), None);

    let mut buf = [0u8; 8];
    let source = session.read(Address::new(0x1000), &mut buf).unwrap();
    assert_eq!(source, ReadSource::Backend);
    assert_eq!(buf.to_vec(), bytes);
    assert_eq!(calls.fallbacks.get(), 0);
}

#[test]
fn test_silent_success_falls_back()
{
    let calls = Rc::new(Calls::default());
    let session = session_with(SpyBackend::new(&calls, OnRead::Silent), Some(vec![1, 2, 3, 4, 5, 6, 7, 8]));

    let mut buf = [0u8; 8];
    let source = session.read(Address::new(0x1000), &mut buf).unwrap();
    assert_eq!(source, ReadSource::Fallback(FallbackTrigger::Sentinel));
    assert_eq!(buf, [1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(calls.reads.get(), 1);
    assert_eq!(calls.fallbacks.get(), 1);
}

#[test]
fn test_primary_backend_sentinel_result_falls_back()
{
    let calls = Rc::new(Calls::default());
    let backend = SpyBackend {
        kind: BackendKind::Primary,
        ..SpyBackend::new(&calls, OnRead::Copy(vec![0xAA; 8]))
    };
    let session = session_with(backend, Some(vec![0x10, 0x20, 0x30, 0x40, 0x50, 0x60, 0x70, 0x80]));
    assert_eq!(session.backend_kind(), BackendKind::Primary);

    let mut buf = [0u8; 8];
    let source = session.read(Address::new(0x7000_1000), &mut buf).unwrap();
    assert_eq!(source, ReadSource::Fallback(FallbackTrigger::Sentinel));
    assert_eq!(buf, [0x10, 0x20, 0x30, 0x40, 0x50, 0x60, 0x70, 0x80]);
    assert_eq!(calls.reads.get(), 1);
    assert_eq!(calls.fallbacks.get(), 1);
}

#[cfg(target_pointer_width = "32")]
#[test]
fn test_wide_address_never_reaches_backend()
{
    let calls = Rc::new(Calls::default());
    let session = session_with(SpyBackend::new(&calls, OnRead::Silent), Some(vec![0; 8]));
    let wide = Address::new(0x1_0000_1000);

    let mut buf = [0u8; 4];
    assert!(matches!(session.read(wide, &mut buf), Err(MemgateError::InvalidArgument(_))));
    assert!(matches!(session.write(wide, &[1, 2, 3, 4]), Err(MemgateError::InvalidArgument(_))));
    assert_eq!(calls.reads.get(), 0);
    assert_eq!(calls.writes.get(), 0);
    assert_eq!(calls.fallbacks.get(), 0);
}

#[test]
fn test_backend_status_falls_back()
{
    let calls = Rc::new(Calls::default());
    let session = session_with(SpyBackend::new(&calls, OnRead::Fail), Some(vec![9; 4]));

    let mut buf = [0u8; 4];
    let source = session.read(Address::new(0x2000), &mut buf).unwrap();
    assert_eq!(source, ReadSource::Fallback(FallbackTrigger::Status));
    assert_eq!(buf, [9; 4]);
}

#[test]
fn test_both_channels_failing()
{
    let calls = Rc::new(Calls::default());
    let session = session_with(SpyBackend::new(&calls, OnRead::Silent), None);

    let mut buf = [0u8; 8];
    let err = session.read(Address::new(0x3000), &mut buf).unwrap_err();
    match err {
        MemgateError::FallbackFailed {
            trigger,
            pid,
            address,
            size,
            ..
        } => {
            assert_eq!(trigger, FallbackTrigger::Sentinel);
            assert_eq!(pid, TARGET);
            assert_eq!(address, Address::new(0x3000));
            assert_eq!(size, 8);
        }
        other => panic!("expected FallbackFailed, got {other:?}"),
    }
}

#[test]
fn test_genuine_sentinel_data_costs_a_fallback()
{
    let calls = Rc::new(Calls::default());
    let bytes = vec![0x01, 0x02, 0xAA, 0x04, 0x05, 0x06, 0x07, 0x08];
    let session = session_with(SpyBackend::new(&calls, OnRead::Copy(bytes.clone())), Some(bytes.clone()));

    let mut buf = [0u8; 8];
    let source = session.read(Address::new(0x1000), &mut buf).unwrap();
    assert_eq!(source, ReadSource::Fallback(FallbackTrigger::Sentinel));
    assert_eq!(buf.to_vec(), bytes);
}

#[test]
fn test_prefix_window_ignores_tail()
{
    let calls = Rc::new(Calls::default());
    // Only the first 8 of 16 bytes are copied; the tail keeps the sentinel.
    let session = session_with(SpyBackend::new(&calls, OnRead::Copy(vec![0x11; 8])), None);

    let mut buf = [0u8; 16];
    let source = session.read(Address::new(0x1000), &mut buf).unwrap();
    assert_eq!(source, ReadSource::Backend);
    assert_eq!(&buf[8..], &[0xAA; 8]);
}

#[test]
fn test_full_window_catches_partial_copy()
{
    let calls = Rc::new(Calls::default());
    let session = session_with(SpyBackend::new(&calls, OnRead::Copy(vec![0x11; 8])), Some(vec![0x22; 16]))
        .with_sentinel_check(SentinelCheck::Full);

    let mut buf = [0u8; 16];
    let source = session.read(Address::new(0x1000), &mut buf).unwrap();
    assert_eq!(source, ReadSource::Fallback(FallbackTrigger::Sentinel));
    assert_eq!(buf, [0x22; 16]);
}

#[test]
fn test_typed_reads()
{
    let calls = Rc::new(Calls::default());
    let session = session_with(SpyBackend::new(&calls, OnRead::Copy(1.5f32.to_ne_bytes().to_vec())), None);

    let value: f32 = session.try_read_value(Address::new(0x1000)).unwrap();
    assert_eq!(value, 1.5);
}

#[test]
fn test_typed_read_failure_yields_zero()
{
    let calls = Rc::new(Calls::default());
    let session = session_with(SpyBackend::new(&calls, OnRead::Fail), None);

    let value: f64 = session.read_value(Address::new(0x1000));
    assert_eq!(value, 0.0);
    assert!(session.try_read_value::<u32>(Address::new(0x1000)).is_err());
}

#[test]
fn test_write_is_not_verified()
{
    let calls = Rc::new(Calls::default());
    let session = session_with(SpyBackend::new(&calls, OnRead::Silent), None);

    session.write(Address::new(0x1000), &[1, 2, 3]).unwrap();
    assert_eq!(calls.writes.get(), 1);
    assert_eq!(calls.reads.get(), 0);
    assert_eq!(calls.fallbacks.get(), 0);
    assert_eq!(*calls.written.borrow(), vec![1, 2, 3]);
}

#[test]
fn test_write_value_sends_native_bytes()
{
    let calls = Rc::new(Calls::default());
    let session = session_with(SpyBackend::new(&calls, OnRead::Silent), None);

    session.write_value(Address::new(0x1000), &0x0102_0304_u32).unwrap();
    assert_eq!(*calls.written.borrow(), 0x0102_0304_u32.to_ne_bytes().to_vec());
}

#[test]
fn test_write_failure_and_empty_write()
{
    let calls = Rc::new(Calls::default());
    let mut backend = SpyBackend::new(&calls, OnRead::Silent);
    backend.fail_writes = true;
    let session = session_with(backend, None);

    assert!(matches!(
        session.write(Address::new(0x1000), &[]),
        Err(MemgateError::InvalidArgument(_))
    ));
    assert_eq!(calls.writes.get(), 0);

    match session.write(Address::new(0x1000), &[7]).unwrap_err() {
        MemgateError::BackendFailure {
            backend, operation, ..
        } => {
            assert_eq!(backend, BackendKind::Secondary);
            assert_eq!(operation, "write");
        }
        other => panic!("expected BackendFailure, got {other:?}"),
    }
}

#[test]
fn test_module_base_uses_given_pid()
{
    let calls = Rc::new(Calls::default());
    let mut backend = SpyBackend::new(&calls, OnRead::Silent);
    backend.module_base = Some(Address::new(0x70_0000_0000));
    let session = session_with(backend, None);

    let base = session.module_base("libtest.so", ProcessId(1234)).unwrap();
    assert_eq!(base, Address::new(0x70_0000_0000));

    let lookups = calls.lookups.borrow();
    assert_eq!(lookups.len(), 1);
    assert_eq!(lookups[0].0, ProcessId(1234));
    assert_eq!(lookups[0].1, b"libtest.so".to_vec());
}

#[test]
fn test_module_base_rejects_bad_input()
{
    let calls = Rc::new(Calls::default());
    let session = session_with(SpyBackend::new(&calls, OnRead::Silent), None);

    assert!(matches!(
        session.module_base("", TARGET),
        Err(MemgateError::InvalidArgument(_))
    ));
    assert!(matches!(
        session.module_base("libtest.so", ProcessId(0)),
        Err(MemgateError::InvalidArgument(_))
    ));
    assert!(calls.lookups.borrow().is_empty());
}

#[test]
fn test_module_base_or_zero()
{
    let calls = Rc::new(Calls::default());
    let mut backend = SpyBackend::new(&calls, OnRead::Silent);
    backend.module_base = None;
    let session = session_with(backend, None);

    assert_eq!(session.module_base_or_zero("libtest.so", TARGET), Address::ZERO);
    assert_eq!(session.module_base_or_zero("", TARGET), Address::ZERO);
}

#[test]
fn test_fallback_through_proc_mem()
{
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join(TARGET.to_string());
    fs::create_dir_all(&dir).unwrap();
    let image: Vec<u8> = (0u8..64).collect();
    fs::write(dir.join("mem"), &image).unwrap();

    let calls = Rc::new(Calls::default());
    let backend = SpyBackend::new(&calls, OnRead::Fail);
    let session = Session::new(TARGET, Box::new(backend), Box::new(ProcMemReader::new(root.path()))).unwrap();

    let mut buf = [0u8; 4];
    let source = session.read(Address::new(0x20), &mut buf).unwrap();
    assert_eq!(source, ReadSource::Fallback(FallbackTrigger::Status));
    assert_eq!(buf, [0x20, 0x21, 0x22, 0x23]);
}

//! Tests for process lookup and address classification against a fake proc tree

use std::fs;
use std::path::Path;

use memgate_core::error::MemgateError;
use memgate_core::procfs::{find_pid_by_name, is_address_valid, read_maps, MemoryRange};
use memgate_core::types::{Address, ProcessId};

const MAPS: &str = "\
5500000000-5500010000 r-xp 00000000 fd:01 1001       /system/bin/app_process64
7000000000-7000020000 r-xp 00000000 fd:01 2002       /data/app/com.example.game/lib/arm64/libtest.so
7000020000-7000030000 rw-p 00020000 fd:01 2002       /data/app/com.example.game/lib/arm64/libtest.so
7100000000-7100100000 rw-p 00000000 00:00 0          [heap]
7200000000-7200100000 rw-p 00000000 00:00 0
7300000000-7300001000 ---p 00000000 00:00 0
7ffff00000-7ffff21000 rw-p 00000000 00:00 0          [stack]
";

fn add_process(root: &Path, pid: i32, cmdline: &[u8], maps: Option<&str>)
{
    let dir = root.join(pid.to_string());
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("cmdline"), cmdline).unwrap();
    if let Some(maps) = maps {
        fs::write(dir.join("maps"), maps).unwrap();
    }
}

#[test]
fn test_find_pid_by_name()
{
    let root = tempfile::tempdir().unwrap();
    add_process(root.path(), 1, b"/init\0", None);
    add_process(root.path(), 812, b"com.example.game\0--flag\0", None);
    add_process(root.path(), 900, b"com.example.game:remote\0", None);
    fs::create_dir_all(root.path().join("self")).unwrap();
    fs::write(root.path().join("uptime"), "1.0 1.0").unwrap();

    let pid = find_pid_by_name(root.path(), "com.example.game").unwrap();
    assert_eq!(pid, Some(ProcessId(812)));
    assert_eq!(find_pid_by_name(root.path(), "  com.example.game:remote ").unwrap(), Some(ProcessId(900)));
    assert_eq!(find_pid_by_name(root.path(), "com.example.other").unwrap(), None);
}

#[test]
fn test_find_pid_lowest_match_wins()
{
    let root = tempfile::tempdir().unwrap();
    add_process(root.path(), 2000, b"worker\0", None);
    add_process(root.path(), 300, b"worker\0", None);

    assert_eq!(find_pid_by_name(root.path(), "worker").unwrap(), Some(ProcessId(300)));
}

#[test]
fn test_find_pid_rejects_empty_name()
{
    let root = tempfile::tempdir().unwrap();
    assert!(matches!(
        find_pid_by_name(root.path(), "  "),
        Err(MemgateError::InvalidArgument(_))
    ));
}

#[test]
fn test_read_maps_skips_nothing_valid()
{
    let root = tempfile::tempdir().unwrap();
    add_process(root.path(), 812, b"game\0", Some(MAPS));

    let maps = read_maps(root.path(), ProcessId(812)).unwrap();
    assert_eq!(maps.len(), 7);
    assert_eq!(maps[3].path, "[heap]");
    assert!(maps[4].path.is_empty());
}

#[test]
fn test_address_classification()
{
    let root = tempfile::tempdir().unwrap();
    add_process(root.path(), 812, b"game\0", Some(MAPS));
    let check = |addr: u64, size: usize, range: MemoryRange| {
        is_address_valid(root.path(), ProcessId(812), Address::new(addr), size, range).unwrap()
    };

    // Executable image
    assert!(check(0x55_0000_0100, 4, MemoryRange::Code));
    assert!(check(0x55_0000_0100, 4, MemoryRange::Executable));
    assert!(!check(0x55_0000_0100, 4, MemoryRange::Data));

    // Shared library with a full path counts as code too
    assert!(check(0x70_0000_1000, 8, MemoryRange::Code));
    assert!(check(0x70_0002_0000, 8, MemoryRange::Data));
    assert!(!check(0x70_0002_0000, 8, MemoryRange::Heap));

    // Heap: named and anonymous
    assert!(check(0x71_0000_0000, 8, MemoryRange::Heap));
    assert!(check(0x72_0000_0000, 8, MemoryRange::Heap));

    // Stack
    assert!(check(0x7f_fff0_0010, 4, MemoryRange::Stack));
    assert!(!check(0x71_0000_0000, 4, MemoryRange::Stack));

    // Unreadable guard page
    assert!(!check(0x73_0000_0000, 4, MemoryRange::All));

    // Straddling the end of a mapping
    assert!(!check(0x71_000f_fffc, 8, MemoryRange::All));

    // Unmapped
    assert!(!check(0x10, 4, MemoryRange::All));
}

#[test]
fn test_address_classification_errors()
{
    let root = tempfile::tempdir().unwrap();
    add_process(root.path(), 812, b"game\0", Some(MAPS));

    assert!(matches!(
        is_address_valid(root.path(), ProcessId(812), Address::new(0x1000), 0, MemoryRange::All),
        Err(MemgateError::InvalidArgument(_))
    ));
    assert!(matches!(
        is_address_valid(root.path(), ProcessId(999), Address::new(0x1000), 4, MemoryRange::All),
        Err(MemgateError::Io(_))
    ));
}

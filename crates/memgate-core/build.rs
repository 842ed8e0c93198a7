//! Build script for memgate-core
//!
//! Checks the toolchain and warns when the crate is built for a target that
//! has neither the driver backends nor `/proc/<pid>/mem`.
//!
//! ## Requirements
//!
//! - **Rust**: 1.77.0 or newer (`offset_of!`, `Result::inspect_err`)
//! - **OS**: Linux or Android

fn main()
{
    if let Ok(rustc_version) = rustc_version::version() {
        let min_rust_version = rustc_version::Version::new(1, 77, 0);

        if rustc_version < min_rust_version {
            panic!(
                "memgate-core requires Rust {} or newer, found {}",
                min_rust_version, rustc_version
            );
        }
    } else {
        println!("cargo:warning=could not verify Rust version");
    }

    // The crate compiles elsewhere (tests use fake backends), but the real
    // backends only exist on Linux kernels.
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_os != "linux" && target_os != "android" {
        println!("cargo:warning=memgate-core targets Linux/Android; found target_os={target_os}");
    }
}

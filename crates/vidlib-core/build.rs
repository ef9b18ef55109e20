//! Build script for vidlib-core
//!
//! Checks the minimum Rust version before compilation.
//!
//! ## Requirements
//!
//! - **Rust**: 1.70.0 or newer (let-else, `Option::is_some_and`)

const MIN_RUST_VERSION: &str = "1.70.0";

fn main()
{
    let Ok(min_rust_version) = rustc_version::Version::parse(MIN_RUST_VERSION) else {
        println!("cargo:warning=invalid minimum Rust version {MIN_RUST_VERSION}");
        return;
    };

    if let Ok(rustc_version) = rustc_version::version() {
        if rustc_version < min_rust_version {
            panic!("vidlib-core requires Rust {min_rust_version} or newer, found {rustc_version}");
        }
    } else {
        // If we can't get version (e.g., in some build environments), just warn
        println!("cargo:warning=could not verify Rust version");
    }

    // Live process reads are only implemented on Linux
    if std::env::var("CARGO_CFG_TARGET_OS").map_or(true, |os| os != "linux") {
        println!("cargo:warning=vidlib-core: ProcessMemory is unavailable on this target; use MemorySnapshot");
    }
}

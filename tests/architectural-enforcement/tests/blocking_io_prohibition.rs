//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: async functions in production code MUST NOT use blocking I/O.
//! **Required**: `tokio::fs`, `tokio::io`, `tokio::net` instead of their `std` counterparts
//! **Exceptions**: synchronous functions that run before the runtime does
//! work (configuration loading), and test code

use architectural_enforcement::{code_part, is_in_non_async_function, report, scan};

const BLOCKING: &[&str] = &[
    "std::fs::",
    "std::net::",
    "std::process::Command",
    "std::io::stdin",
    "reqwest::blocking",
];

#[test]
fn test_no_blocking_io_in_production_code() {
    let violations = scan(|_, lines, idx| {
        let code = code_part(lines[idx]);
        BLOCKING.iter().any(|pattern| code.contains(pattern))
            && !is_in_non_async_function(lines, idx)
    });

    if !violations.is_empty() {
        eprintln!("\n✅ REQUIRED async I/O:");
        eprintln!("  - tokio::fs::read().await, tokio::fs::write().await");
        eprintln!("  - tokio::io::stdin() with AsyncBufReadExt");
        eprintln!("  - reqwest::Client futures");
    }
    report("CRITICAL: Blocking I/O calls found in production code!", &violations);
}

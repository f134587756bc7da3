//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT call sleep methods. Sessions wait on
//! channels, watch receivers and cancellation tokens; periodic work uses
//! `tokio::time::interval`.
//! **Exceptions**: test code

use architectural_enforcement::{code_part, report, scan};

#[test]
fn test_no_sleep_in_production_code() {
    let violations = scan(|_, lines, idx| {
        let code = code_part(lines[idx]);
        code.contains("::sleep(") || code.contains(".sleep(")
    });

    if !violations.is_empty() {
        eprintln!("\n✅ ACCEPTABLE waiting:");
        eprintln!("  - tokio::time::interval() ticks");
        eprintln!("  - watch/mpsc receivers and CancellationToken::cancelled()");
        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - Sleep in polling loops");
        eprintln!("  - Sleep as poor man's synchronization");
    }
    report("CRITICAL: Sleep calls found in production code!", &violations);
}

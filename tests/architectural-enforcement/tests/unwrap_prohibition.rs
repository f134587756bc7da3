//! Integration Test: Unwrap Prohibition
//!
//! **Policy**: production code propagates errors with `?` or handles them;
//! `unwrap()` and `expect()` are only allowed in tests.

use architectural_enforcement::{code_part, report, scan};

#[test]
fn test_no_unwrap_in_production_code() {
    let violations = scan(|_, lines, idx| {
        let code = code_part(lines[idx]);
        code.contains(".unwrap()") || code.contains(".expect(")
    });

    report("unwrap()/expect() found in production code!", &violations);
}

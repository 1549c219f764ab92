//! Integration Test: Sleep Prohibition
//!
//! **Policy**: production code in the relay crates MUST NOT sleep. Waiting
//! on the generation stream, stdin or shutdown is done with `select!` and a
//! cancellation token.
//! **Exceptions**: exponential backoff in retry logic, interval ticking, test
//! code.

use architectural_enforcement::{find_sleeps, production_sources};

#[test]
fn test_no_sleep_in_production_code() {
    let violations: Vec<_> = production_sources().iter().flat_map(find_sleeps).collect();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Sleep calls found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        eprintln!("\n✅ ACCEPTABLE sleep uses:");
        eprintln!("  - Exponential backoff in retry logic");
        eprintln!("  - Periodic tasks using tokio::time::interval()");
        eprintln!("  - Test code (#[test] or #[tokio::test] functions)");
        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - Sleep in polling loops");
        eprintln!("  - Sleep to wait for a stream or a shutdown signal");

        panic!(
            "\nFound {} sleep violation(s) in production code.",
            violations.len()
        );
    }
}

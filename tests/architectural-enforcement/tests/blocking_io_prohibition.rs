//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: async code in the relay crates MUST NOT use blocking I/O.
//! **Required**: `tokio::fs`, `tokio::net`, `tokio::io`, or `spawn_blocking`
//! around a synchronous client such as rusqlite.

use architectural_enforcement::{find_blocking_io, production_sources};

#[test]
fn test_no_blocking_io_in_production_code() {
    let sources = production_sources();
    assert!(!sources.is_empty(), "no production sources found");

    let violations: Vec<_> = sources.iter().flat_map(find_blocking_io).collect();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking I/O calls found in async code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        eprintln!("\n❌ FORBIDDEN in async functions:");
        eprintln!("  - std::fs::read_to_string(), std::fs::File");
        eprintln!("  - std::net::TcpStream");
        eprintln!("  - std::io::stdin(), std::io::stdout()");
        eprintln!("  - std::process::Command");
        eprintln!("  - reqwest::blocking::*");
        eprintln!("\n✅ REQUIRED:");
        eprintln!("  - tokio::fs::read_to_string().await");
        eprintln!("  - tokio::io::stdin() with AsyncBufReadExt");
        eprintln!("  - tokio::task::spawn_blocking for synchronous clients");
        eprintln!("\n✅ ACCEPTABLE:");
        eprintln!("  - Plain functions (before the runtime starts)");
        eprintln!("  - Test code");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.",
            violations.len()
        );
    }
}

#[test]
fn test_sqlite_store_stays_behind_spawn_blocking() {
    let sources = production_sources();
    let sqlite = sources
        .iter()
        .find(|f| f.path.ends_with("persistence/sqlite.rs"))
        .expect("sqlite store source");

    assert!(
        sqlite.lines.iter().any(|l| l.contains("spawn_blocking")),
        "SqliteStore must run rusqlite calls on the blocking pool"
    );
}

//! Integration Test: Runtime Rules
//!
//! **Policy**: Controller state is owned by explicit structs and tasks. The
//! supervisor, the switcher and the connection are passed around, never
//! reached through globals, and nothing blocks a runtime thread.

use architectural_enforcement::{assert_clean, find_violations, production_lines};

/// No process-wide mutable state
#[test]
fn test_no_global_state() {
    let violations = find_violations(
        &production_lines(),
        &[
            "static mut",
            "lazy_static!",
            "OnceLock",
            "OnceCell",
            "thread_local!",
        ],
    );

    assert_clean("Global state in production code", &violations);
}

/// No blocking waits on runtime threads
#[test]
fn test_no_blocking_calls() {
    let violations = find_violations(
        &production_lines(),
        &[
            "std::thread::sleep",
            "thread::sleep(",
            "reqwest::blocking",
            "block_on(",
        ],
    );

    assert_clean("Blocking call in production code", &violations);
}

/// Errors are propagated, not unwrapped
#[test]
fn test_no_unwrap_in_production_code() {
    let violations = find_violations(&production_lines(), &[".unwrap()", ".expect("]);

    assert_clean("unwrap/expect in production code", &violations);
}

/// Viewers are signalled as process groups
#[test]
fn test_processes_are_killed_by_group() {
    let lines = production_lines();

    let single_kills = find_violations(&lines, &["signal::kill(", "libc::kill("]);
    assert_clean("Single-process kill in production code", &single_kills);

    assert!(
        !find_violations(&lines, &["killpg("]).is_empty(),
        "process supervisor no longer uses killpg"
    );
}

//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT call sleep methods. The scheduler is
//! driven by the host's tick, and waiting happens on clip loads, never on
//! timers.
//! **Exceptions**: the headless driver paces its frames with
//! `tokio::time::interval`, which is not a sleep; test code is not checked.

use architectural_enforcement::find_violations;

/// Scheduler sources never block on sleep; timing comes from ticks
#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_violations(|_, lines, idx| {
        let code = &lines[idx].1;
        (code.contains("::sleep(") || code.contains(".sleep("))
            && !is_interval_pattern(lines, idx)
    });

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Sleep calls found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ ACCEPTABLE:");
        eprintln!("  - Periodic pacing using tokio::time::interval()");
        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - Sleep inside the scheduler or clip loading");
        eprintln!("  - Sleep as poor man's synchronization");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

/// Check if this is the tokio::time::interval pattern
fn is_interval_pattern(lines: &[(usize, String)], current_idx: usize) -> bool {
    let from = current_idx.saturating_sub(20);
    let to = (current_idx + 5).min(lines.len());

    lines[from..to].iter().any(|(_, line)| {
        line.contains("interval.tick()") || line.contains("tokio::time::interval")
    })
}

#[test]
fn test_sleep_detection() {
    let lines = vec![
        (1, "async fn settle() {".to_string()),
        (2, "    tokio::time::sleep(Duration::from_millis(10)).await;".to_string()),
        (3, "}".to_string()),
    ];
    assert!(!is_interval_pattern(&lines, 1));
}

#[test]
fn test_interval_detection() {
    let lines = vec![
        (1, "let mut interval = tokio::time::interval(period);".to_string()),
        (2, "loop {".to_string()),
        (3, "    interval.tick().await;".to_string()),
        (4, "}".to_string()),
    ];
    assert!(is_interval_pattern(&lines, 2));
}

//! Integration Test: Global State Prohibition
//!
//! **Policy**: Production code MUST NOT keep ambient global state. Clip
//! sources, selectors, audio signals, and event sinks are handed to the
//! scheduler's constructor; nothing is discovered through a global.
//! **Forbidden**: `static mut`, `lazy_static!`, `thread_local!`, and statics
//! wrapping a lazy cell or a lock.

use architectural_enforcement::find_violations;

const FORBIDDEN_MACROS: &[&str] = &["lazy_static!", "thread_local!"];
const LAZY_CELLS: &[&str] = &["OnceLock<", "LazyLock<", "Lazy<", "Mutex<", "RwLock<"];

fn is_global_state(code: &str) -> bool {
    let code = code.trim_start();
    let code = code.strip_prefix("pub ").unwrap_or(code);

    if FORBIDDEN_MACROS.iter().any(|m| code.contains(m)) {
        return true;
    }
    let Some(item) = code.strip_prefix("static ") else {
        return false;
    };
    item.starts_with("mut ") || LAZY_CELLS.iter().any(|cell| item.contains(cell))
}

/// Scheduler sources hold no global mutable state
#[test]
fn test_no_global_state_in_production_code() {
    let violations = find_violations(|_, lines, idx| is_global_state(&lines[idx].1));

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Global state found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ REQUIRED: pass shared services into PlaybackScheduler::new");

        panic!(
            "\nFound {} global state violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

#[test]
fn test_global_state_detection() {
    assert!(is_global_state("static mut COUNTER: u32 = 0;"));
    assert!(is_global_state("pub static CLIPS: OnceLock<Vec<Clip>> = OnceLock::new();"));
    assert!(is_global_state("thread_local! {"));
    assert!(is_global_state("lazy_static! {"));

    assert!(!is_global_state("const MAX_CYCLES_PER_TICK: usize = 64;"));
    assert!(!is_global_state("let cell: OnceLock<u32> = OnceLock::new();"));
    assert!(!is_global_state("pub const OVERLAY_SUFFIX: &str = \"#morph\";"));
}

//! Test helpers for source_extract
//!
//! Synthetic scenes with known answers, a slow reference labeler to check
//! the single-pass one against, and logging setup for tests.

pub mod reference;
pub mod scenes;

/// Route `log` output through the test harness. Safe to call repeatedly.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

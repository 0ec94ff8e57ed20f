//! End-to-end scenarios across the orchestrator.

pub mod buffer;
pub mod gateway;
pub mod graph;
pub mod limits;
pub mod retry;
pub mod scheduling;
pub mod workflow;

/// Installs a compact tracing subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing_subscriber::filter::LevelFilter::WARN)
        .without_time()
        .try_init();
}

//! Process-wide tracing and logging setup.

/// Tracing configuration (filters, output format).
pub mod tracing;

/// Initialize observability for the process.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

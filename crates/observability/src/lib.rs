//! Process-wide tracing setup shared by every stockguard binary and test.

/// Initialize structured logging with the default filter (`info`).
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init("info");
}

/// Like [`init`], with a fallback filter for when `RUST_LOG` is unset.
pub fn init_with_filter(default_directives: &str) {
    tracing::init(default_directives);
}

/// Subscriber configuration (filters, output format).
pub mod tracing;

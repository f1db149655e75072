//! Tracing subscriber initialization.

use tracing_subscriber::EnvFilter;

/// Build the filter from `RUST_LOG`, falling back to `default_directives`,
/// then to `info` if those do not parse.
pub fn filter(default_directives: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install a JSON fmt subscriber. A subscriber that is already installed
/// wins; this call then does nothing.
pub fn init(default_directives: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(default_directives))
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init("debug");
        init("warn");
        ::tracing::info!("still logging");
    }

    #[test]
    fn bad_directives_fall_back() {
        // Never panics, whatever RUST_LOG holds.
        let _ = filter("not a [valid filter");
    }
}

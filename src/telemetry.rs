//! Tracing setup for binaries and tests that embed the engine.

use tracing_subscriber::EnvFilter;

/// Directive used when `RUST_LOG` is not set.
/// Default: warn for most crates, info for ours (pass summaries visible).
/// Use RUST_LOG=opgraph=debug for per-operation dispatch and skip logs.
pub const DEFAULT_FILTER: &str = "warn,opgraph=info";

/// Install a global fmt subscriber. Safe to call more than once; only the
/// first call has any effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_tracing();
        init_tracing();
        tracing::info!("tracing initialised twice without panicking");
    }

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }
}

//! Helpers for exercising the runtime without a database server.

mod mock_client;

pub use mock_client::{MockClient, ScriptedStatement};

/// Install a `tracing` subscriber honoring `RUST_LOG`. Safe to call repeatedly.
#[cfg(feature = "test-utils")]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

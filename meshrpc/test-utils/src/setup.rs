use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Initializes logging for mesh integration tests.
///
/// Defaults to debug output for the mesh library, which keeps session pump,
/// cursor, and catalog-refresh traces readable when a federation test
/// fails, while muting the noisier transport internals underneath. Set
/// `RUST_LOG` to override the filter entirely.
pub fn setup_test_environment() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("meshrpc=debug,tungstenite=info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .init();
    });
}

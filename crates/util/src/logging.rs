// SPDX-License-Identifier: PolyForm-Shield-1.0

use tracing_subscriber::EnvFilter;

/// Initialise tracing for binaries: env-filter driven (`RUST_LOG`), `info`
/// by default, safe to call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

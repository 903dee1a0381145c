use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`). Records
/// from the `log` facade used by the kernel and storage crates are forwarded.
/// Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    if let Err(err) = try_init_tracing() {
        tracing::debug!("tracing already initialized: {err}");
    }
}

pub fn try_init_tracing() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .try_init()
}

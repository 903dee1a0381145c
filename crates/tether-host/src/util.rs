use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Run an application callback; errors and panics are logged and swallowed.
pub(crate) fn isolate(observer: &str, callback: impl FnOnce() -> anyhow::Result<()>) {
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!(observer, error = %err, "observer failed"),
        Err(_) => tracing::error!(observer, "observer panicked"),
    }
}

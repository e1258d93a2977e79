use anyhow::{Context, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

// Shared run flag cleared on SIGINT, SIGTERM or SIGHUP. The hot-plug rule that
// fires when the modem re-enumerates signals the daemon the same way, so every
// loop that polls this flag winds down and the supervisor restarts us.
pub fn install_shutdown_handler() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let running_for_signal = Arc::clone(&running);
    ctrlc::set_handler(move || {
        if running_for_signal.swap(false, Ordering::SeqCst) {
            info!("termination signal received; shutting down");
        }
    })
    .context("installing termination signal handler failed")?;
    Ok(running)
}

use crate::recovery::controller::{RecoveryAction, RecoveryController};
use crate::recovery::probe::{PresenceProbe, ReachabilityProbe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::info;

const SLEEP_SLICE: Duration = Duration::from_millis(200);

// Run the recovery controller on its own thread, one step per check interval,
// until the shared run flag clears.
pub fn spawn_monitor<P, R, A>(
    controller: RecoveryController<P, R, A>,
    check_interval: Duration,
    running: Arc<AtomicBool>,
) -> JoinHandle<()>
where
    P: PresenceProbe + 'static,
    R: ReachabilityProbe + 'static,
    A: RecoveryAction + 'static,
{
    let mut controller = controller.with_run_flag(Arc::clone(&running));
    thread::spawn(move || {
        info!(
            interval_secs = check_interval.as_secs(),
            "connectivity monitor started"
        );
        while running.load(Ordering::SeqCst) {
            controller.step(Instant::now());
            sleep_while_running(check_interval, &running);
        }
        info!(
            phase = ?controller.phase(),
            attempts = controller.state().attempt_count,
            "connectivity monitor stopped"
        );
    })
}

fn sleep_while_running(total: Duration, running: &AtomicBool) {
    let deadline = Instant::now() + total;
    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}

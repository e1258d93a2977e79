//! Connectivity recovery state machine.
//!
//! ```text
//! HEALTHY --presence fails--> DEGRADED(n)
//! DEGRADED(n) --presence ok--> HEALTHY
//! DEGRADED(n >= threshold) && internet unreachable --> RECOVERING(attempt)
//! RECOVERING --presence back--> HEALTHY
//! RECOVERING --attempts exhausted--> COOLDOWN(until) --expiry--> DEGRADED(0)
//! ```
//!
//! A presence failure never leads to a reset while the internet is reachable
//! through some other path. The controller is stepped by the monitor loop and
//! takes the current `Instant` as input so tests can drive time directly.

use crate::error::RecoveryError;
use crate::recovery::probe::{PresenceProbe, ReachabilityProbe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const PRESENCE_POLL: Duration = Duration::from_secs(2);
const WAIT_SLICE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub max_attempts: u32,
    pub cooldown: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Healthy,
    Degraded { failures: u32 },
    Recovering { attempt: u32 },
    Cooldown { until: Instant },
}

#[derive(Debug, Clone)]
pub struct RecoveryState {
    pub consecutive_failures: u32,
    pub attempt_count: u32,
    pub last_attempt_time: Option<Instant>,
    pub cooldown_until: Option<Instant>,
    pub phase: Phase,
}

impl Default for RecoveryState {
    fn default() -> Self {
        Self {
            consecutive_failures: 0,
            attempt_count: 0,
            last_attempt_time: None,
            cooldown_until: None,
            phase: Phase::Healthy,
        }
    }
}

/// One graduated recovery step against the modem.
pub trait RecoveryAction: Send {
    fn soft_reset(&mut self) -> Result<(), RecoveryError>;
}

pub struct RecoveryController<P, R, A> {
    config: RecoveryConfig,
    state: RecoveryState,
    presence: P,
    reachability: R,
    action: A,
    presence_poll: Duration,
    running: Option<Arc<AtomicBool>>,
}

impl<P, R, A> RecoveryController<P, R, A>
where
    P: PresenceProbe,
    R: ReachabilityProbe,
    A: RecoveryAction,
{
    pub fn new(config: RecoveryConfig, presence: P, reachability: R, action: A) -> Self {
        Self {
            config,
            state: RecoveryState::default(),
            presence,
            reachability,
            action,
            presence_poll: PRESENCE_POLL,
            running: None,
        }
    }

    // Cut the post-reset wait short once this flag clears.
    pub fn with_run_flag(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = Some(running);
        self
    }

    pub fn state(&self) -> &RecoveryState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    // One monitoring tick.
    pub fn step(&mut self, now: Instant) -> Phase {
        let next = match self.state.phase {
            Phase::Cooldown { until } if now < until => return self.state.phase,
            Phase::Cooldown { .. } => {
                info!("recovery cooldown expired; re-evaluating");
                self.state.cooldown_until = None;
                self.state.consecutive_failures = 0;
                Phase::Degraded { failures: 0 }
            }
            Phase::Healthy | Phase::Degraded { .. } => self.evaluate(now),
            Phase::Recovering { .. } => self.continue_recovery(now),
        };
        self.transition(next)
    }

    fn evaluate(&mut self, now: Instant) -> Phase {
        if self.presence.is_present() {
            if self.state.consecutive_failures > 0 {
                info!(
                    failures = self.state.consecutive_failures,
                    "modem visible again; no recovery needed"
                );
            }
            self.state.consecutive_failures = 0;
            return Phase::Healthy;
        }

        self.state.consecutive_failures += 1;
        let failures = self.state.consecutive_failures;
        warn!(
            failures,
            threshold = self.config.failure_threshold,
            error = %RecoveryError::PresenceCheckFailed,
            "presence check failed"
        );
        if failures < self.config.failure_threshold {
            return Phase::Degraded { failures };
        }
        if self.internet_reachable() {
            return Phase::Degraded { failures };
        }
        self.attempt(now)
    }

    fn continue_recovery(&mut self, now: Instant) -> Phase {
        if self.presence.is_present() {
            return self.recovered();
        }
        if self.internet_reachable() {
            return Phase::Degraded {
                failures: self.state.consecutive_failures,
            };
        }
        self.attempt(now)
    }

    fn internet_reachable(&self) -> bool {
        if self.reachability.is_reachable() {
            info!("internet reachable through another path; leaving the modem alone");
            return true;
        }
        warn!(error = %RecoveryError::ReachabilityCheckFailed, "reachability check failed");
        false
    }

    // Exactly one recovery action per call.
    fn attempt(&mut self, now: Instant) -> Phase {
        self.state.attempt_count += 1;
        self.state.last_attempt_time = Some(now);
        let attempt = self.state.attempt_count;
        info!(attempt, max_attempts = self.config.max_attempts, "issuing modem soft reset");

        let present = match self.action.soft_reset() {
            Ok(()) => self.wait_for_presence(),
            Err(err) => {
                warn!(attempt, error = %err, "soft reset failed");
                self.presence.is_present()
            }
        };
        if present {
            return self.recovered();
        }

        if attempt >= self.config.max_attempts {
            let until = now + self.config.cooldown;
            self.state.cooldown_until = Some(until);
            warn!(
                error = %RecoveryError::RecoveryExhausted { attempts: attempt },
                cooldown_secs = self.config.cooldown.as_secs(),
                "entering recovery cooldown"
            );
            return Phase::Cooldown { until };
        }
        Phase::Recovering { attempt }
    }

    fn wait_for_presence(&self) -> bool {
        let deadline = Instant::now() + self.config.recovery_timeout;
        let mut next_poll = Instant::now();
        loop {
            if self.stopping() {
                info!("shutdown requested; abandoning recovery wait");
                return false;
            }
            let now = Instant::now();
            if now >= next_poll {
                if self.presence.is_present() {
                    return true;
                }
                next_poll = now + self.presence_poll;
            }
            if now >= deadline {
                return false;
            }
            thread::sleep(WAIT_SLICE.min(next_poll - now).min(deadline - now));
        }
    }

    fn stopping(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.load(Ordering::SeqCst))
    }

    fn recovered(&mut self) -> Phase {
        info!(attempts = self.state.attempt_count, "modem presence restored");
        self.state.attempt_count = 0;
        self.state.consecutive_failures = 0;
        Phase::Healthy
    }

    fn transition(&mut self, next: Phase) -> Phase {
        if next != self.state.phase {
            info!(from = ?self.state.phase, to = ?next, "recovery state changed");
            self.state.phase = next;
        }
        next
    }
}

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Failures of the serial transport and the AT command exchange.
#[derive(Debug, Error)]
pub enum ModemError {
    #[error("no candidate serial device answered the probe (tried: {tried})")]
    PortUnavailable { tried: String },

    #[error("`{command}` got no final result within {}ms", timeout.as_millis())]
    CommandTimeout { command: String, timeout: Duration },

    #[error("could not interpret reply to `{command}`: {detail}")]
    MalformedResponse { command: String, detail: String },

    #[error("modem rejected `{command}`: {result}")]
    CommandFailed { command: String, result: String },

    #[error("`{command}` was still queued after {}ms", waited.as_millis())]
    QueueTimeout { command: String, waited: Duration },

    #[error("serial executor is shut down")]
    ExecutorClosed,

    #[error("serial I/O on {path} failed: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl ModemError {
    // Port-level failures are the ones that suggest another process holds the device.
    pub fn is_port_blocked(&self) -> bool {
        matches!(self, ModemError::PortUnavailable { .. } | ModemError::Io { .. })
    }
}

/// Failures observed by the connectivity recovery controller. These are
/// logged and drive state transitions; they never reach RPC clients.
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("modem is not visible to the device-management layer")]
    PresenceCheckFailed,

    #[error("none of the reachability endpoints answered")]
    ReachabilityCheckFailed,

    #[error("recovery gave up after {attempts} attempt(s)")]
    RecoveryExhausted { attempts: u32 },

    #[error("external service hand-off failed: {0}")]
    Handoff(String),

    #[error(transparent)]
    Modem(#[from] ModemError),
}

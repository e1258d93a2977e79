use crate::error::ModemError;
use crate::modem::port::PortOpener;
use crate::modem::session::{AtResponse, SerialSession};
use std::time::Duration;
use tracing::{debug, info, warn};

const PROBE_COMMAND: &str = "AT";

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub candidates: Vec<String>,
    pub baud_rate: u32,
    pub probe_timeout: Duration,
    pub read_slice: Duration,
    pub gnss_enable_command: Option<String>,
}

/// Owns the serial session, discovers the AT port among the candidate
/// paths, and rebuilds the session after any failure. Not shared: the
/// executor worker thread is its only user.
pub struct SerialTransport {
    config: TransportConfig,
    opener: Box<dyn PortOpener>,
    session: Option<SerialSession>,
    cached_path: Option<String>,
    gnss_enabled: bool,
}

impl SerialTransport {
    pub fn new(config: TransportConfig, opener: Box<dyn PortOpener>) -> Self {
        Self {
            config,
            opener,
            session: None,
            cached_path: None,
            gnss_enabled: false,
        }
    }

    pub fn current_path(&self) -> Option<&str> {
        self.session.as_ref().map(SerialSession::path)
    }

    #[cfg(test)]
    pub fn cached_path(&self) -> Option<&str> {
        self.cached_path.as_deref()
    }

    #[cfg(test)]
    pub fn gnss_enabled(&self) -> bool {
        self.gnss_enabled
    }

    // Run one command on the wire. Timeouts and I/O errors drop the session
    // and the cached path; the next call rediscovers from scratch.
    pub fn execute(&mut self, command: &str, timeout: Duration) -> Result<AtResponse, ModemError> {
        self.ensure_session()?;
        let Some(session) = self.session.as_mut() else {
            return Err(self.unavailable());
        };

        let result = session.exchange(command, timeout);
        if let Err(err) = &result {
            if !matches!(err, ModemError::CommandFailed { .. }) {
                warn!(command, error = %err, "serial exchange failed; dropping session");
                self.invalidate();
            }
        }
        result
    }

    // Forget both the open handle and the discovered path.
    pub fn invalidate(&mut self) {
        if let Some(session) = self.session.take() {
            debug!(
                path = session.path(),
                idle_ms = session.idle_for().as_millis() as u64,
                "closing serial session"
            );
        }
        self.cached_path = None;
    }

    // Close the handle so another process can open the device; keep the path.
    pub fn release(&mut self) {
        if let Some(session) = self.session.take() {
            info!(path = session.path(), "serial port released");
        }
    }

    fn ensure_session(&mut self) -> Result<(), ModemError> {
        if self.session.is_some() {
            return Ok(());
        }
        let session = self.connect()?;
        info!(
            path = session.path(),
            baud_rate = session.baud_rate(),
            "serial session established"
        );
        self.session = Some(session);

        if !self.gnss_enabled {
            self.enable_gnss()?;
        }
        Ok(())
    }

    fn connect(&mut self) -> Result<SerialSession, ModemError> {
        if let Some(path) = self.cached_path.clone() {
            match self.open_and_probe(&path) {
                Ok(session) => return Ok(session),
                Err(err) => {
                    debug!(path, error = %err, "cached device stopped answering");
                    self.cached_path = None;
                }
            }
        }

        for path in self.config.candidates.clone() {
            match self.open_and_probe(&path) {
                Ok(session) => {
                    info!(path, "modem AT port discovered");
                    self.cached_path = Some(path);
                    return Ok(session);
                }
                Err(err) => debug!(path, error = %err, "candidate rejected"),
            }
        }

        Err(self.unavailable())
    }

    fn open_and_probe(&self, path: &str) -> Result<SerialSession, ModemError> {
        let link = self
            .opener
            .open(path, self.config.baud_rate, self.config.read_slice)
            .map_err(|source| ModemError::Io {
                path: path.to_string(),
                source,
            })?;
        let mut session = SerialSession::new(path.to_string(), self.config.baud_rate, link);
        session
            .exchange(PROBE_COMMAND, self.config.probe_timeout)?
            .into_ok(PROBE_COMMAND)?;
        Ok(session)
    }

    // GNSS is switched on once, on first contact, and then left running.
    fn enable_gnss(&mut self) -> Result<(), ModemError> {
        let Some(command) = self.config.gnss_enable_command.clone() else {
            self.gnss_enabled = true;
            return Ok(());
        };
        let Some(session) = self.session.as_mut() else {
            return Err(self.unavailable());
        };

        match session.exchange(&command, self.config.probe_timeout * 4) {
            Ok(response) => {
                self.gnss_enabled = true;
                if response.is_ok() {
                    info!(command, "GNSS acquisition enabled");
                } else {
                    // Most modems answer ERROR when the engine is already running.
                    info!(command, result = ?response.result, "GNSS enable not accepted; assuming already on");
                }
                Ok(())
            }
            Err(err) => {
                warn!(command, error = %err, "GNSS enable failed; will retry on next contact");
                self.invalidate();
                Err(err)
            }
        }
    }

    fn unavailable(&self) -> ModemError {
        ModemError::PortUnavailable {
            tried: self.config.candidates.join(", "),
        }
    }
}

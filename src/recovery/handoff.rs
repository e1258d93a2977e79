use crate::error::{ModemError, RecoveryError};
use crate::modem::executor::ExecutorHandle;
use crate::modem::transport::SerialTransport;
use crate::recovery::controller::RecoveryAction;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const SETTLE_POLL: Duration = Duration::from_millis(500);

/// Another process that may be holding the modem's serial device.
pub trait ExternalService: Send + Sync {
    fn name(&self) -> &str;

    // Stop the service and wait until it no longer holds the port.
    fn relinquish(&self) -> Result<(), RecoveryError>;

    fn resume(&self) -> Result<(), RecoveryError>;
}

/// A systemd unit driven through `systemctl`.
pub struct SystemdUnit {
    unit: String,
    settle_timeout: Duration,
}

impl SystemdUnit {
    pub fn new(unit: String, settle_timeout: Duration) -> Self {
        Self {
            unit,
            settle_timeout,
        }
    }

    pub fn settle_timeout(&self) -> Duration {
        self.settle_timeout
    }

    fn systemctl(&self, args: &[&str]) -> Result<bool, RecoveryError> {
        let status = Command::new("systemctl")
            .args(args)
            .arg(&self.unit)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|err| {
                RecoveryError::Handoff(format!("running systemctl {} {}: {err}", args.join(" "), self.unit))
            })?;
        Ok(status.success())
    }
}

impl ExternalService for SystemdUnit {
    fn name(&self) -> &str {
        &self.unit
    }

    fn relinquish(&self) -> Result<(), RecoveryError> {
        if !self.systemctl(&["stop"])? {
            return Err(RecoveryError::Handoff(format!("systemctl stop {} failed", self.unit)));
        }

        let deadline = Instant::now() + self.settle_timeout;
        loop {
            if !self.systemctl(&["is-active", "--quiet"])? {
                debug!(unit = %self.unit, "unit is inactive");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(RecoveryError::Handoff(format!(
                    "{} still active after {}s",
                    self.unit,
                    self.settle_timeout.as_secs()
                )));
            }
            thread::sleep(SETTLE_POLL);
        }
    }

    fn resume(&self) -> Result<(), RecoveryError> {
        if self.systemctl(&["start"])? {
            Ok(())
        } else {
            Err(RecoveryError::Handoff(format!("systemctl start {} failed", self.unit)))
        }
    }
}

// Stop the external service, run `op` with the port free, give the port back
// and restart the service. The service is resumed even when `op` fails.
pub fn with_handoff<T>(
    transport: &mut SerialTransport,
    service: &dyn ExternalService,
    op: impl FnOnce(&mut SerialTransport) -> Result<T, ModemError>,
) -> Result<T, RecoveryError> {
    service.relinquish()?;
    info!(service = service.name(), "external service stopped; port handed over");

    let result = op(transport);
    transport.release();

    match service.resume() {
        Ok(()) => info!(service = service.name(), "external service restarted"),
        Err(err) => warn!(service = service.name(), error = %err, "restarting external service failed"),
    }
    result.map_err(RecoveryError::from)
}

/// The soft reset the recovery controller issues: a radio power cycle sent
/// through the serial queue, falling back to an external-service hand-off
/// when the port is held elsewhere.
pub struct ModemResetter {
    executor: ExecutorHandle,
    reset_commands: Vec<String>,
    command_timeout: Duration,
    handoff: Option<(Arc<dyn ExternalService>, Duration)>,
}

impl ModemResetter {
    pub fn new(executor: ExecutorHandle, reset_commands: Vec<String>, command_timeout: Duration) -> Self {
        Self {
            executor,
            reset_commands,
            command_timeout,
            handoff: None,
        }
    }

    // `settle` bounds how long relinquish and resume may take together.
    pub fn with_external_service(mut self, service: Arc<dyn ExternalService>, settle: Duration) -> Self {
        self.handoff = Some((service, settle));
        self
    }

    fn budget(&self) -> Duration {
        self.command_timeout * (self.reset_commands.len() as u32 + 2)
    }

    fn reset_directly(&self) -> Result<(), ModemError> {
        let commands = self.reset_commands.clone();
        let timeout = self.command_timeout;
        self.executor.exclusive("soft_reset", self.budget(), move |transport| {
            run_reset(transport, &commands, timeout)
        })
    }

    fn reset_with_handoff(&self, service: Arc<dyn ExternalService>, settle: Duration) -> Result<(), RecoveryError> {
        let commands = self.reset_commands.clone();
        let timeout = self.command_timeout;
        self.executor.exclusive(
            "soft_reset_handoff",
            self.budget() + settle * 2,
            move |transport| {
                Ok(with_handoff(transport, service.as_ref(), |transport| {
                    run_reset(transport, &commands, timeout)
                }))
            },
        )?
    }
}

impl RecoveryAction for ModemResetter {
    fn soft_reset(&mut self) -> Result<(), RecoveryError> {
        match self.reset_directly() {
            Ok(()) => Ok(()),
            Err(err) if err.is_port_blocked() => match self.handoff.clone() {
                Some((service, settle)) => {
                    warn!(error = %err, service = service.name(), "port blocked; retrying reset through hand-off");
                    self.reset_with_handoff(service, settle)
                }
                None => Err(err.into()),
            },
            Err(err) => Err(err.into()),
        }
    }
}

// The session is always dropped afterwards: the device re-enumerates after a radio cycle.
fn run_reset(transport: &mut SerialTransport, commands: &[String], timeout: Duration) -> Result<(), ModemError> {
    let result = commands.iter().try_for_each(|command| {
        transport.execute(command, timeout)?.into_ok(command)?;
        debug!(command, "reset command accepted");
        Ok(())
    });
    transport.invalidate();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::executor::spawn_executor;
    use crate::modem::testing::{FakeOpener, Reply, ScriptedModem, healthy_modem};
    use crate::modem::transport::TransportConfig;
    use std::sync::Mutex;
    use std::thread::JoinHandle;

    const PORT: &str = "/dev/ttyUSB2";

    // Holds the port while "running"; frees it on relinquish.
    struct FakeService {
        opener: FakeOpener,
        modem: ScriptedModem,
        events: Arc<Mutex<Vec<&'static str>>>,
        refuse_stop: bool,
    }

    impl ExternalService for FakeService {
        fn name(&self) -> &str {
            "fake-gpsd"
        }

        fn relinquish(&self) -> Result<(), RecoveryError> {
            self.events.lock().unwrap().push("relinquish");
            if self.refuse_stop {
                return Err(RecoveryError::Handoff("unit refused to stop".to_string()));
            }
            self.opener.attach(PORT, self.modem.fork());
            Ok(())
        }

        fn resume(&self) -> Result<(), RecoveryError> {
            self.events.lock().unwrap().push("resume");
            self.opener.detach(PORT);
            Ok(())
        }
    }

    fn start(opener: &FakeOpener) -> (ExecutorHandle, JoinHandle<()>) {
        let transport = SerialTransport::new(
            TransportConfig {
                candidates: vec![PORT.to_string()],
                baud_rate: 115_200,
                probe_timeout: Duration::from_millis(50),
                read_slice: Duration::from_millis(5),
                gnss_enable_command: None,
            },
            Box::new(opener.clone()),
        );
        spawn_executor(transport, Duration::from_secs(5))
    }

    fn reset_commands() -> Vec<String> {
        vec!["AT+CFUN=0".to_string(), "AT+CFUN=1".to_string()]
    }

    fn reset_lines(wire: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        wire.lock()
            .unwrap()
            .iter()
            .filter(|line| line.starts_with("AT+CFUN"))
            .cloned()
            .collect()
    }

    #[test]
    fn resets_directly_when_port_is_free() {
        let modem = healthy_modem();
        let wire = modem.wire_log();
        let opener = FakeOpener::new();
        opener.attach(PORT, modem);
        let (executor, worker) = start(&opener);

        let mut resetter = ModemResetter::new(executor.clone(), reset_commands(), Duration::from_millis(300));
        resetter.soft_reset().unwrap();
        assert_eq!(reset_lines(&wire), reset_commands());

        // The session was dropped, so the next command reopens the device.
        let opens_before = opener.opens().len();
        executor.execute("AT+CSQ", Duration::from_millis(300)).unwrap();
        assert!(opener.opens().len() > opens_before);

        executor.shutdown();
        worker.join().unwrap();
    }

    #[test]
    fn blocked_port_goes_through_handoff() {
        let modem = healthy_modem();
        let wire = modem.wire_log();
        let opener = FakeOpener::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let service = Arc::new(FakeService {
            opener: opener.clone(),
            modem,
            events: Arc::clone(&events),
            refuse_stop: false,
        });
        let (executor, worker) = start(&opener);

        let mut resetter = ModemResetter::new(executor.clone(), reset_commands(), Duration::from_millis(300))
            .with_external_service(service, Duration::from_secs(1));
        resetter.soft_reset().unwrap();

        assert_eq!(*events.lock().unwrap(), vec!["relinquish", "resume"]);
        assert_eq!(reset_lines(&wire), reset_commands());

        executor.shutdown();
        worker.join().unwrap();
    }

    #[test]
    fn service_resumes_even_when_reset_fails() {
        let modem = ScriptedModem::new(|command| match command {
            "AT+CFUN=0" => Reply::text("ERROR\r\n"),
            _ => Reply::ok(),
        });
        let opener = FakeOpener::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let service = Arc::new(FakeService {
            opener: opener.clone(),
            modem,
            events: Arc::clone(&events),
            refuse_stop: false,
        });
        let (executor, worker) = start(&opener);

        let mut resetter = ModemResetter::new(executor.clone(), reset_commands(), Duration::from_millis(300))
            .with_external_service(service, Duration::from_secs(1));
        let err = resetter.soft_reset().unwrap_err();
        assert!(matches!(
            err,
            RecoveryError::Modem(ModemError::CommandFailed { .. })
        ));
        assert_eq!(*events.lock().unwrap(), vec!["relinquish", "resume"]);

        executor.shutdown();
        worker.join().unwrap();
    }

    #[test]
    fn refused_stop_skips_reset_and_resume() {
        let modem = healthy_modem();
        let wire = modem.wire_log();
        let opener = FakeOpener::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let service = Arc::new(FakeService {
            opener: opener.clone(),
            modem,
            events: Arc::clone(&events),
            refuse_stop: true,
        });
        let (executor, worker) = start(&opener);

        let mut resetter = ModemResetter::new(executor.clone(), reset_commands(), Duration::from_millis(300))
            .with_external_service(service, Duration::from_secs(1));
        assert!(matches!(
            resetter.soft_reset(),
            Err(RecoveryError::Handoff(_))
        ));
        assert_eq!(*events.lock().unwrap(), vec!["relinquish"]);
        assert!(reset_lines(&wire).is_empty());

        executor.shutdown();
        worker.join().unwrap();
    }

    #[test]
    fn blocked_port_without_service_reports_modem_error() {
        let opener = FakeOpener::new();
        let (executor, worker) = start(&opener);

        let mut resetter = ModemResetter::new(executor.clone(), reset_commands(), Duration::from_millis(300));
        assert!(matches!(
            resetter.soft_reset(),
            Err(RecoveryError::Modem(ModemError::PortUnavailable { .. }))
        ));

        executor.shutdown();
        worker.join().unwrap();
    }
}

use crate::error::ModemError;
use crate::modem::executor::ExecutorHandle;
use crate::modem::gnss::{FixStatus, GnssFix, parse_gnss_reply};
use crate::modem::session::AtResponse;
use crate::modem::status::{
    NetworkStatusSnapshot, is_registered, parse_cops, parse_creg, parse_csq,
};
use crate::modem::transport::SerialTransport;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const STATUS_COMMANDS: [&str; 3] = ["AT+CSQ", "AT+COPS?", "AT+CREG?"];

/// Result of a location query as seen by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GnssLocation {
    pub success: bool,
    pub fix: Option<GnssFix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GnssLocation {
    fn failed(reason: String) -> Self {
        Self {
            success: false,
            fix: None,
            error: Some(reason),
        }
    }
}

/// The read-only query surface exposed to RPC clients. Nothing here changes
/// modem configuration; every command goes through the shared queue.
#[derive(Clone)]
pub struct ModemService {
    executor: ExecutorHandle,
    command_timeout: Duration,
    gnss_query_command: String,
}

impl ModemService {
    pub fn new(executor: ExecutorHandle, command_timeout: Duration, gnss_query_command: String) -> Self {
        Self {
            executor,
            command_timeout,
            gnss_query_command,
        }
    }

    // Establish contact with the hardware (and so trigger the one-time GNSS enable).
    pub fn probe(&self) -> Result<(), ModemError> {
        self.executor
            .execute("AT", self.command_timeout)?
            .into_ok("AT")
            .map(|_| ())
    }

    pub fn network_status(&self) -> NetworkStatusSnapshot {
        let timeout = self.command_timeout;
        // The three queries run as one job so the snapshot is internally consistent.
        let result = self.executor.exclusive(
            "network_status",
            timeout * STATUS_COMMANDS.len() as u32,
            move |transport| read_network_status(transport, timeout),
        );
        match result {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "network status unavailable");
                NetworkStatusSnapshot::unavailable(err.to_string())
            }
        }
    }

    pub fn gnss_location(&self) -> GnssLocation {
        let command = self.gnss_query_command.as_str();
        let response = match self.executor.execute(command, self.command_timeout) {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "GNSS location unavailable");
                return GnssLocation::failed(err.to_string());
            }
        };
        let response = match response.into_ok(command) {
            Ok(response) => response,
            Err(err) => return GnssLocation::failed(err.to_string()),
        };

        let fix = parse_gnss_reply(&response.lines.join("\n"));
        if fix.is_valid() {
            return GnssLocation {
                success: true,
                fix: Some(fix),
                error: None,
            };
        }
        if fix.fix_status == FixStatus::NoFix {
            return GnssLocation::failed("no fix".to_string());
        }
        let err = ModemError::MalformedResponse {
            command: command.to_string(),
            detail: response.lines.join(" | "),
        };
        debug!(error = %err, "discarding GNSS reply");
        GnssLocation::failed(err.to_string())
    }
}

fn read_network_status(
    transport: &mut SerialTransport,
    timeout: Duration,
) -> Result<NetworkStatusSnapshot, ModemError> {
    let [csq_cmd, cops_cmd, creg_cmd] = STATUS_COMMANDS;
    let csq = accepted(transport.execute(csq_cmd, timeout)?);
    let cops = accepted(transport.execute(cops_cmd, timeout)?);
    let creg = accepted(transport.execute(creg_cmd, timeout)?);

    let signal = csq
        .as_ref()
        .and_then(|response| response.payload("+CSQ:"))
        .and_then(parse_csq);
    let (operator, access_technology) = cops
        .as_ref()
        .and_then(|response| response.payload("+COPS:"))
        .map(parse_cops)
        .unwrap_or((None, None));
    let registration = creg
        .as_ref()
        .and_then(|response| response.payload("+CREG:"))
        .and_then(parse_creg);

    Ok(NetworkStatusSnapshot {
        connected: registration.is_some_and(is_registered),
        signal_strength: signal.map(|(rssi, _)| rssi),
        signal_dbm: signal.map(|(_, dbm)| dbm),
        operator,
        access_technology,
        registration,
        captured_at: Utc::now(),
        error: None,
    })
}

// A rejected query only blanks its own fields.
fn accepted(response: AtResponse) -> Option<AtResponse> {
    response.is_ok().then_some(response)
}

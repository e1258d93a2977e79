use crate::error::ModemError;
use crate::modem::port::Link;
use std::io::{self, ErrorKind};
use std::thread;
use std::time::{Duration, Instant};

const IDLE_BACKOFF: Duration = Duration::from_millis(5);
const MAX_PENDING_BYTES: usize = 16 * 1024;

/// Final result line that terminates an AT exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalResult {
    Ok,
    Error(String),
}

impl FinalResult {
    fn parse(line: &str) -> Option<Self> {
        if line == "OK" {
            return Some(FinalResult::Ok);
        }
        if line == "ERROR"
            || line == "NO CARRIER"
            || line.starts_with("+CME ERROR")
            || line.starts_with("+CMS ERROR")
        {
            return Some(FinalResult::Error(line.to_string()));
        }
        None
    }
}

/// Information lines of one AT exchange plus its final result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtResponse {
    pub lines: Vec<String>,
    pub result: FinalResult,
}

impl AtResponse {
    pub fn is_ok(&self) -> bool {
        self.result == FinalResult::Ok
    }

    // Payload of the first information line starting with `prefix` (e.g. "+CSQ:").
    pub fn payload(&self, prefix: &str) -> Option<&str> {
        self.lines
            .iter()
            .find_map(|line| line.strip_prefix(prefix))
            .map(str::trim)
    }

    pub fn into_ok(self, command: &str) -> Result<Self, ModemError> {
        match self.result {
            FinalResult::Ok => Ok(self),
            FinalResult::Error(result) => Err(ModemError::CommandFailed {
                command: command.to_string(),
                result,
            }),
        }
    }
}

/// The one open serial handle. Rebuilt from scratch after any I/O error or timeout.
pub struct SerialSession {
    path: String,
    baud_rate: u32,
    link: Box<dyn Link>,
    last_activity: Instant,
}

impl SerialSession {
    pub fn new(path: String, baud_rate: u32, link: Box<dyn Link>) -> Self {
        Self {
            path,
            baud_rate,
            link,
            last_activity: Instant::now(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    // Write one command and collect lines until a final result code or the deadline.
    pub fn exchange(&mut self, command: &str, timeout: Duration) -> Result<AtResponse, ModemError> {
        let io_err = |source: io::Error, path: &str| ModemError::Io {
            path: path.to_string(),
            source,
        };

        self.link
            .write_all(format!("{command}\r").as_bytes())
            .map_err(|err| io_err(err, &self.path))?;
        self.link.flush().map_err(|err| io_err(err, &self.path))?;
        self.last_activity = Instant::now();

        let deadline = Instant::now() + timeout;
        let mut pending: Vec<u8> = Vec::with_capacity(256);
        let mut lines = Vec::new();
        let mut buf = [0_u8; 256];

        while Instant::now() < deadline {
            match self.link.read(&mut buf) {
                Ok(0) => thread::sleep(IDLE_BACKOFF),
                Ok(size) => {
                    self.last_activity = Instant::now();
                    pending.extend_from_slice(&buf[..size]);
                    while let Some(pos) = pending.iter().position(|byte| *byte == b'\n') {
                        let raw: Vec<u8> = pending.drain(..=pos).collect();
                        let line = String::from_utf8_lossy(&raw).trim().to_string();
                        // Blank separators and the modem's echo of our own command carry nothing.
                        if line.is_empty() || line == command {
                            continue;
                        }
                        if let Some(result) = FinalResult::parse(&line) {
                            return Ok(AtResponse { lines, result });
                        }
                        lines.push(line);
                    }
                    if pending.len() > MAX_PENDING_BYTES {
                        return Err(ModemError::MalformedResponse {
                            command: command.to_string(),
                            detail: format!("{} bytes without a line ending", pending.len()),
                        });
                    }
                }
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) => {}
                Err(err) => return Err(io_err(err, &self.path)),
            }
        }

        Err(ModemError::CommandTimeout {
            command: command.to_string(),
            timeout,
        })
    }
}

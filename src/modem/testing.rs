// In-memory modem doubles shared by the unit tests of the modem, rpc and
// recovery modules.
use crate::modem::port::{Link, PortOpener};
use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub enum Reply {
    Text(String),
    Delayed(Duration, String),
    Hang,
}

impl Reply {
    pub fn text(text: &str) -> Self {
        Reply::Text(text.to_string())
    }

    pub fn ok() -> Self {
        Reply::text("OK\r\n")
    }

    pub fn delayed(delay: Duration, text: &str) -> Self {
        Reply::Delayed(delay, text.to_string())
    }
}

type Responder = Arc<dyn Fn(&str) -> Reply + Send + Sync>;

/// Scripted AT modem. Each `\r`-terminated write is treated as one command;
/// the responder decides what comes back. Every command that reaches the
/// wire is appended to a log shared by all forks of the same modem.
pub struct ScriptedModem {
    responder: Responder,
    wire: Arc<Mutex<Vec<String>>>,
    inbound: Vec<u8>,
    outbound: VecDeque<u8>,
    ready_at: Instant,
    busy: bool,
    chunk: usize,
}

impl ScriptedModem {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Reply + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            wire: Arc::new(Mutex::new(Vec::new())),
            inbound: Vec::new(),
            outbound: VecDeque::new(),
            ready_at: Instant::now(),
            busy: false,
            chunk: 64,
        }
    }

    // Hand out replies a few bytes at a time to exercise line reassembly.
    pub fn chunked(mut self, chunk: usize) -> Self {
        self.chunk = chunk.max(1);
        self
    }

    // A fresh link to the same simulated hardware (same script, same wire log).
    pub fn fork(&self) -> Self {
        Self {
            responder: Arc::clone(&self.responder),
            wire: Arc::clone(&self.wire),
            inbound: Vec::new(),
            outbound: VecDeque::new(),
            ready_at: Instant::now(),
            busy: false,
            chunk: self.chunk,
        }
    }

    pub fn wire_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.wire)
    }

    fn record(&self, entry: String) {
        if let Ok(mut wire) = self.wire.lock() {
            wire.push(entry);
        }
    }
}

impl Write for ScriptedModem {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.inbound.extend_from_slice(bytes);
        while let Some(pos) = self.inbound.iter().position(|byte| *byte == b'\r') {
            let raw: Vec<u8> = self.inbound.drain(..=pos).collect();
            let command = String::from_utf8_lossy(&raw[..raw.len() - 1]).to_string();
            if self.busy {
                self.record(format!("OVERLAP:{command}"));
            }
            self.record(command.clone());
            match (self.responder)(&command) {
                Reply::Text(text) => {
                    self.busy = true;
                    self.ready_at = Instant::now();
                    self.outbound.extend(text.bytes());
                }
                Reply::Delayed(delay, text) => {
                    self.busy = true;
                    self.ready_at = Instant::now() + delay;
                    self.outbound.extend(text.bytes());
                }
                Reply::Hang => self.busy = true,
            }
        }
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for ScriptedModem {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.outbound.is_empty() || Instant::now() < self.ready_at {
            thread::sleep(Duration::from_millis(2));
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let count = buf.len().min(self.chunk).min(self.outbound.len());
        for slot in buf.iter_mut().take(count) {
            *slot = self.outbound.pop_front().unwrap_or_default();
        }
        if self.outbound.is_empty() {
            self.busy = false;
        }
        Ok(count)
    }
}

/// Opener backed by a table of scripted modems keyed by device path.
#[derive(Clone, Default)]
pub struct FakeOpener {
    devices: Arc<Mutex<HashMap<String, ScriptedModem>>>,
    opens: Arc<Mutex<Vec<String>>>,
}

impl FakeOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, path: &str, modem: ScriptedModem) {
        if let Ok(mut devices) = self.devices.lock() {
            devices.insert(path.to_string(), modem);
        }
    }

    pub fn detach(&self, path: &str) {
        if let Ok(mut devices) = self.devices.lock() {
            devices.remove(path);
        }
    }

    pub fn opens(&self) -> Vec<String> {
        self.opens.lock().map(|opens| opens.clone()).unwrap_or_default()
    }
}

impl PortOpener for FakeOpener {
    fn open(&self, path: &str, _baud_rate: u32, _read_slice: Duration) -> io::Result<Box<dyn Link>> {
        if let Ok(mut opens) = self.opens.lock() {
            opens.push(path.to_string());
        }
        let devices = self
            .devices
            .lock()
            .map_err(|_| io::Error::other("device table poisoned"))?;
        match devices.get(path) {
            Some(modem) => Ok(Box::new(modem.fork())),
            None => Err(io::Error::new(io::ErrorKind::NotFound, path.to_string())),
        }
    }
}

// A modem that answers the usual status, GNSS and reset commands.
pub fn healthy_modem() -> ScriptedModem {
    ScriptedModem::new(|command| match command {
        "AT+CSQ" => Reply::text("+CSQ: 20,99\r\nOK\r\n"),
        "AT+COPS?" => Reply::text("+COPS: 0,0,\"Vodafone UK\",7\r\nOK\r\n"),
        "AT+CREG?" => Reply::text("+CREG: 0,1\r\nOK\r\n"),
        "AT+CGNSSINFO" => Reply::text(&format!("{}\r\nOK\r\n", SAMPLE_FIX_LINE)),
        _ => Reply::ok(),
    })
}

// 3D fix, 8 GPS + 4 GLONASS satellites, near 51.8369 N, 1.3200 W.
pub const SAMPLE_FIX_LINE: &str =
    "+CGNSSINFO: 3,08,04,00,5150.214000,N,00119.200000,W,140326,101530.0,92.4,10.0,181.3,1.6,0.9,1.3";

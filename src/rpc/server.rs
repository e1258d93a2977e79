use crate::modem::service::ModemService;
use crate::rpc::protocol::{Method, Payload, Request, Response, encode_line};
use anyhow::{Context, Result};
use std::io::{self, BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

const ACCEPT_POLL: Duration = Duration::from_millis(100);
const CLIENT_READ_SLICE: Duration = Duration::from_millis(250);
const CLIENT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_REQUEST_BYTES: usize = 4 * 1024;

/// Loopback RPC listener. One thread per client connection; handlers only
/// ever wait on their own queued job.
pub struct RpcServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl RpcServer {
    // Binding failure is fatal at startup, so the error carries the address.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .with_context(|| format!("binding RPC listener failed: {addr}"))?;
        listener
            .set_nonblocking(true)
            .context("switching RPC listener to non-blocking mode failed")?;
        let local_addr = listener
            .local_addr()
            .context("reading RPC listener address failed")?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    // Accept clients until the run flag clears, then wait for open handlers to finish.
    pub fn serve(self, service: ModemService, running: Arc<AtomicBool>) {
        info!(addr = %self.local_addr, "RPC listener ready");
        let mut handlers: Vec<JoinHandle<()>> = Vec::new();

        while running.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    debug!(%peer, "client connected");
                    let service = service.clone();
                    let running = Arc::clone(&running);
                    handlers.push(thread::spawn(move || {
                        match handle_client(stream, &service, &running) {
                            Ok(()) => debug!(%peer, "client disconnected"),
                            Err(err) => debug!(%peer, error = %err, "client connection dropped"),
                        }
                    }));
                    handlers.retain(|handler| !handler.is_finished());
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(err) => {
                    warn!(error = %err, "accepting RPC client failed");
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }

        drop(self.listener);
        info!(
            open_handlers = handlers.len(),
            "RPC listener closed; draining client handlers"
        );
        for handler in handlers {
            if handler.join().is_err() {
                warn!("RPC client handler panicked");
            }
        }
    }
}

fn handle_client(stream: TcpStream, service: &ModemService, running: &AtomicBool) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(CLIENT_READ_SLICE))?;
    stream.set_write_timeout(Some(CLIENT_WRITE_TIMEOUT))?;
    stream.set_nodelay(true)?;

    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;
    let mut line: Vec<u8> = Vec::new();

    while running.load(Ordering::SeqCst) {
        // Never buffer more than one byte past the limit.
        let budget = (MAX_REQUEST_BYTES + 1 - line.len()) as u64;
        let read = (&mut reader).take(budget).read_until(b'\n', &mut line);
        if line.len() > MAX_REQUEST_BYTES && !line.ends_with(b"\n") {
            write_response(&mut writer, &Response::error(None, "request too large"))?;
            return Ok(());
        }
        match read {
            Ok(0) => return Ok(()),
            Ok(_) => {
                // Without a terminator this is either EOF (next read returns 0) or more to come.
                if !line.ends_with(b"\n") {
                    continue;
                }
                let request = String::from_utf8_lossy(&line).trim().to_string();
                line.clear();
                if request.is_empty() {
                    continue;
                }
                let response = dispatch(&request, service);
                write_response(&mut writer, &response)?;
            }
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

fn dispatch(request: &str, service: &ModemService) -> Response {
    let request = match serde_json::from_str::<Request>(request) {
        Ok(request) => request,
        Err(err) => {
            debug!(error = %err, "rejecting malformed request");
            return Response::error(None, format!("invalid request: {err}"));
        }
    };
    let result = match request.method {
        Method::NetworkStatus => Payload::NetworkStatus(service.network_status()),
        Method::GnssLocation => Payload::GnssLocation(service.gnss_location()),
    };
    Response {
        id: request.id,
        result,
    }
}

fn write_response(writer: &mut TcpStream, response: &Response) -> io::Result<()> {
    let line = encode_line(response).map_err(io::Error::other)?;
    writer.write_all(line.as_bytes())?;
    writer.flush()
}

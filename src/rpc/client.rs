use crate::modem::service::GnssLocation;
use crate::modem::status::NetworkStatusSnapshot;
use crate::rpc::protocol::{Method, Payload, Request, Response, encode_line};
use anyhow::{Context, Result, bail};
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

/// Blocking client for the daemon's RPC surface. Processes that want modem
/// data use this instead of opening the serial device themselves.
pub struct RpcClient {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    next_id: u64,
}

impl RpcClient {
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        let stream = TcpStream::connect_timeout(&addr, timeout)
            .with_context(|| format!("connecting to modem daemon failed: {addr}"))?;
        stream
            .set_read_timeout(Some(timeout))
            .context("setting RPC read timeout failed")?;
        stream
            .set_write_timeout(Some(timeout))
            .context("setting RPC write timeout failed")?;
        let reader = BufReader::new(
            stream
                .try_clone()
                .context("cloning RPC stream failed")?,
        );
        Ok(Self {
            reader,
            writer: stream,
            next_id: 1,
        })
    }

    pub fn network_status(&mut self) -> Result<NetworkStatusSnapshot> {
        match self.call(Method::NetworkStatus)? {
            Payload::NetworkStatus(snapshot) => Ok(snapshot),
            other => bail!("unexpected reply to network_status: {other:?}"),
        }
    }

    pub fn gnss_location(&mut self) -> Result<GnssLocation> {
        match self.call(Method::GnssLocation)? {
            Payload::GnssLocation(location) => Ok(location),
            other => bail!("unexpected reply to gnss_location: {other:?}"),
        }
    }

    fn call(&mut self, method: Method) -> Result<Payload> {
        let id = self.next_id;
        self.next_id += 1;

        let line = encode_line(&Request {
            id: Some(id),
            method,
        })
        .context("encoding RPC request failed")?;
        self.writer
            .write_all(line.as_bytes())
            .context("sending RPC request failed")?;

        let mut reply = String::new();
        let read = self
            .reader
            .read_line(&mut reply)
            .context("reading RPC response failed")?;
        if read == 0 {
            bail!("modem daemon closed the connection");
        }
        let response: Response =
            serde_json::from_str(reply.trim()).context("decoding RPC response failed")?;

        if response.id != Some(id) {
            bail!(
                "RPC response id mismatch: sent {id}, got {:?}",
                response.id
            );
        }
        if let Payload::Error { error } = response.result {
            bail!("modem daemon rejected request: {error}");
        }
        Ok(response.result)
    }
}

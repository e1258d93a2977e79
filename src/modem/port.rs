use std::io::{self, Read, Write};
use std::time::Duration;

/// A byte link to the modem. Reads are expected to time out after a short
/// slice (`io::ErrorKind::TimedOut`) rather than block forever.
pub trait Link: Read + Write + Send {}

impl<T: Read + Write + Send + ?Sized> Link for T {}

/// Opens device paths. Swapped for a scripted implementation in tests.
pub trait PortOpener: Send {
    fn open(&self, path: &str, baud_rate: u32, read_slice: Duration) -> io::Result<Box<dyn Link>>;
}

/// Opens real serial devices through `serialport`.
pub struct SerialOpener;

impl PortOpener for SerialOpener {
    fn open(&self, path: &str, baud_rate: u32, read_slice: Duration) -> io::Result<Box<dyn Link>> {
        let port = serialport::new(path, baud_rate)
            .timeout(read_slice)
            .open()
            .map_err(io::Error::from)?;
        Ok(Box::new(port))
    }
}

use std::fs;
use std::net::{SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub sysfs_usb_dir: PathBuf,
    pub usb_vendor_id: String,
    pub usb_product_id: Option<String>,
    pub reachability_endpoints: Vec<SocketAddr>,
    pub reachability_timeout: Duration,
}

/// Is the modem enumerated by the host right now?
pub trait PresenceProbe: Send {
    fn is_present(&self) -> bool;
}

/// Is the internet reachable, independently of the modem under test?
pub trait ReachabilityProbe: Send {
    fn is_reachable(&self) -> bool;
}

/// Presence check against the kernel's USB device listing.
pub struct SysfsPresence {
    usb_dir: PathBuf,
    vendor_id: String,
    product_id: Option<String>,
}

impl SysfsPresence {
    pub fn new(config: &ProbeConfig) -> Self {
        Self {
            usb_dir: config.sysfs_usb_dir.clone(),
            vendor_id: config.usb_vendor_id.trim().to_ascii_lowercase(),
            product_id: config
                .usb_product_id
                .as_ref()
                .map(|id| id.trim().to_ascii_lowercase()),
        }
    }

    fn device_matches(&self, device_dir: &Path) -> bool {
        if read_id(&device_dir.join("idVendor")).as_deref() != Some(self.vendor_id.as_str()) {
            return false;
        }
        match &self.product_id {
            Some(product) => read_id(&device_dir.join("idProduct")).as_ref() == Some(product),
            None => true,
        }
    }
}

impl PresenceProbe for SysfsPresence {
    fn is_present(&self) -> bool {
        let entries = match fs::read_dir(&self.usb_dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %self.usb_dir.display(), error = %err, "cannot list USB devices");
                return false;
            }
        };
        let present = entries
            .flatten()
            .any(|entry| self.device_matches(&entry.path()));
        debug!(vendor = %self.vendor_id, present, "presence check");
        present
    }
}

fn read_id(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|raw| raw.trim().to_ascii_lowercase())
}

/// Reachability check: a TCP handshake with any one of several well-known
/// endpoints counts as "internet works".
pub struct TcpReachability {
    endpoints: Vec<SocketAddr>,
    timeout: Duration,
}

impl TcpReachability {
    pub fn new(config: &ProbeConfig) -> Self {
        Self {
            endpoints: config.reachability_endpoints.clone(),
            timeout: config.reachability_timeout,
        }
    }
}

impl ReachabilityProbe for TcpReachability {
    fn is_reachable(&self) -> bool {
        self.endpoints.iter().any(|endpoint| {
            match TcpStream::connect_timeout(endpoint, self.timeout) {
                Ok(_) => {
                    debug!(%endpoint, "reachability endpoint answered");
                    true
                }
                Err(err) => {
                    debug!(%endpoint, error = %err, "reachability endpoint failed");
                    false
                }
            }
        })
    }
}

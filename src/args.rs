use clap::{ArgAction, Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::modem::transport::TransportConfig;
use crate::recovery::controller::RecoveryConfig;
use crate::recovery::probe::ProbeConfig;

// CLI root definition. One binary hosts the daemon and its two RPC clients.
#[derive(Parser, Debug)]
#[command(name = "modem-arbiter", version)]
#[command(about = "Serial AT modem arbitration daemon with connectivity recovery")]
pub struct Cli {
    #[command(subcommand)]
    pub command: AppCommand,
}

// Subcommands map directly to one module each under src/commands/.
#[derive(Subcommand, Debug)]
pub enum AppCommand {
    /// Own the modem serial port, serve RPC clients, and supervise cellular connectivity
    Serve(ServeArgs),
    /// Ask a running daemon for the current network status
    Status(ClientArgs),
    /// Ask a running daemon for the current GNSS location
    Location(ClientArgs),
}

// Daemon configuration. Every option can also come from the environment.
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Candidate AT serial devices, probed in order
    #[arg(
        long = "device",
        env = "MODEM_ARBITER_DEVICES",
        value_delimiter = ',',
        default_values = ["/dev/ttyUSB2", "/dev/ttyUSB3"]
    )]
    pub devices: Vec<String>,
    #[arg(long, env = "MODEM_ARBITER_BAUD_RATE", default_value_t = 115_200)]
    pub baud_rate: u32,
    #[arg(long, env = "MODEM_ARBITER_COMMAND_TIMEOUT_MS", default_value_t = 5_000)]
    pub command_timeout_ms: u64,
    #[arg(long, env = "MODEM_ARBITER_PROBE_TIMEOUT_MS", default_value_t = 1_000)]
    pub probe_timeout_ms: u64,
    #[arg(long, env = "MODEM_ARBITER_READ_SLICE_MS", default_value_t = 100)]
    pub read_slice_ms: u64,
    #[arg(long, env = "MODEM_ARBITER_QUEUE_TIMEOUT_MS", default_value_t = 30_000)]
    pub queue_timeout_ms: u64,
    #[arg(long, env = "MODEM_ARBITER_LISTEN", default_value = "127.0.0.1:7878")]
    pub listen: SocketAddr,
    #[arg(long, env = "MODEM_ARBITER_GNSS_ENABLE", default_value = "AT+CGPS=1")]
    pub gnss_enable_command: String,
    #[arg(long, env = "MODEM_ARBITER_GNSS_QUERY", default_value = "AT+CGNSSINFO")]
    pub gnss_query_command: String,
    /// AT commands issued in order as the lightweight software reset
    #[arg(
        long = "reset-command",
        env = "MODEM_ARBITER_RESET_COMMANDS",
        value_delimiter = ';',
        default_values = ["AT+CFUN=0", "AT+CFUN=1"]
    )]
    pub reset_commands: Vec<String>,
    #[arg(long, env = "MODEM_ARBITER_CHECK_INTERVAL_SECS", default_value_t = 30)]
    pub check_interval_secs: u64,
    #[arg(long, env = "MODEM_ARBITER_FAILURE_THRESHOLD", default_value_t = 3)]
    pub failure_threshold: u32,
    #[arg(long, env = "MODEM_ARBITER_RECOVERY_TIMEOUT_SECS", default_value_t = 60)]
    pub recovery_timeout_secs: u64,
    #[arg(long, env = "MODEM_ARBITER_MAX_ATTEMPTS", default_value_t = 3)]
    pub max_attempts: u32,
    #[arg(long, env = "MODEM_ARBITER_COOLDOWN_SECS", default_value_t = 1_800)]
    pub cooldown_secs: u64,
    /// USB vendor id the presence check looks for (hex, as in sysfs)
    #[arg(long, env = "MODEM_ARBITER_USB_VENDOR", default_value = "1e0e")]
    pub usb_vendor_id: String,
    #[arg(long, env = "MODEM_ARBITER_USB_PRODUCT")]
    pub usb_product_id: Option<String>,
    #[arg(long, env = "MODEM_ARBITER_SYSFS_USB", default_value = "/sys/bus/usb/devices")]
    pub sysfs_usb_dir: PathBuf,
    /// Independent endpoints used to confirm internet reachability
    #[arg(
        long = "reachability-endpoint",
        env = "MODEM_ARBITER_REACHABILITY_ENDPOINTS",
        value_delimiter = ',',
        default_values = ["8.8.8.8:53", "1.1.1.1:53"]
    )]
    pub reachability_endpoints: Vec<SocketAddr>,
    #[arg(long, env = "MODEM_ARBITER_REACHABILITY_TIMEOUT_MS", default_value_t = 3_000)]
    pub reachability_timeout_ms: u64,
    /// systemd unit of an external service that also opens the modem port
    #[arg(long, env = "MODEM_ARBITER_HANDOFF_UNIT")]
    pub handoff_unit: Option<String>,
    #[arg(long, env = "MODEM_ARBITER_HANDOFF_SETTLE_SECS", default_value_t = 10)]
    pub handoff_settle_secs: u64,
    #[arg(
        long,
        env = "MODEM_ARBITER_LOCK_FILE",
        default_value = "/run/modem-arbiter.lock"
    )]
    pub lock_file: PathBuf,
    #[arg(long = "no-recovery", action = ArgAction::SetFalse, default_value_t = true)]
    pub recovery: bool,
}

// Shared configuration for the one-shot RPC client subcommands.
#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    #[arg(long, env = "MODEM_ARBITER_LISTEN", default_value = "127.0.0.1:7878")]
    pub server: SocketAddr,
    #[arg(long, default_value_t = 45_000)]
    pub timeout_ms: u64,
}

impl ServeArgs {
    // Narrow the daemon options down to what the serial transport needs.
    pub fn to_transport_config(&self) -> TransportConfig {
        TransportConfig {
            candidates: self.devices.clone(),
            baud_rate: self.baud_rate,
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            read_slice: Duration::from_millis(self.read_slice_ms.max(1)),
            gnss_enable_command: Some(self.gnss_enable_command.clone())
                .filter(|command| !command.trim().is_empty()),
        }
    }

    // Build the recovery state machine thresholds.
    pub fn to_recovery_config(&self) -> RecoveryConfig {
        RecoveryConfig {
            failure_threshold: self.failure_threshold.max(1),
            recovery_timeout: Duration::from_secs(self.recovery_timeout_secs),
            max_attempts: self.max_attempts.max(1),
            cooldown: Duration::from_secs(self.cooldown_secs),
        }
    }

    // Build the presence and reachability probe settings.
    pub fn to_probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            sysfs_usb_dir: self.sysfs_usb_dir.clone(),
            usb_vendor_id: self.usb_vendor_id.clone(),
            usb_product_id: self.usb_product_id.clone(),
            reachability_endpoints: self.reachability_endpoints.clone(),
            reachability_timeout: Duration::from_millis(self.reachability_timeout_ms),
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> ServeArgs {
        let mut argv = vec!["modem-arbiter", "serve"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).map(|cli| cli.command) {
            Ok(AppCommand::Serve(args)) => args,
            other => panic!("expected serve args, got {other:?}"),
        }
    }

    #[test]
    fn serve_defaults_are_loopback_and_conservative() {
        let args = parse(&[]);
        assert_eq!(args.devices, vec!["/dev/ttyUSB2", "/dev/ttyUSB3"]);
        assert!(args.listen.ip().is_loopback());
        assert_eq!(args.listen.port(), 7878);
        assert_eq!(args.reset_commands, vec!["AT+CFUN=0", "AT+CFUN=1"]);
        assert_eq!(args.reachability_endpoints.len(), 2);
        assert!(args.recovery);
        assert!(args.handoff_unit.is_none());
    }

    #[test]
    fn candidate_list_is_comma_separated() {
        let args = parse(&["--device", "/dev/ttyACM0,/dev/ttyUSB1", "--no-recovery"]);
        assert_eq!(args.devices, vec!["/dev/ttyACM0", "/dev/ttyUSB1"]);
        assert!(!args.recovery);
    }

    #[test]
    fn zero_thresholds_are_clamped() {
        let args = parse(&["--failure-threshold", "0", "--max-attempts", "0"]);
        let config = args.to_recovery_config();
        assert_eq!(config.failure_threshold, 1);
        assert_eq!(config.max_attempts, 1);
    }

    #[test]
    fn empty_gnss_enable_command_disables_auto_enable() {
        let args = parse(&["--gnss-enable-command", ""]);
        assert!(args.to_transport_config().gnss_enable_command.is_none());
    }
}

use crate::args::ClientArgs;
use crate::rpc::client::RpcClient;
use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::time::Duration;

// Print the daemon's network status snapshot as JSON.
pub fn run_status(args: ClientArgs) -> Result<()> {
    let mut client = connect(&args)?;
    let snapshot = client.network_status()?;
    print_json(&snapshot)?;
    if let Some(error) = snapshot.error {
        bail!("network status unavailable: {error}");
    }
    Ok(())
}

// Print the daemon's GNSS location as JSON; no fix is reported as failure.
pub fn run_location(args: ClientArgs) -> Result<()> {
    let mut client = connect(&args)?;
    let location = client.gnss_location()?;
    print_json(&location)?;
    if !location.success {
        bail!(
            "no GNSS location: {}",
            location.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn connect(args: &ClientArgs) -> Result<RpcClient> {
    RpcClient::connect(args.server, Duration::from_millis(args.timeout_ms.max(1)))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("rendering reply as JSON failed")?;
    println!("{json}");
    Ok(())
}

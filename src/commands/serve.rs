use crate::args::ServeArgs;
use crate::modem::executor::spawn_executor;
use crate::modem::port::SerialOpener;
use crate::modem::service::ModemService;
use crate::modem::transport::SerialTransport;
use crate::recovery::controller::RecoveryController;
use crate::recovery::handoff::{ModemResetter, SystemdUnit};
use crate::recovery::monitor::spawn_monitor;
use crate::recovery::probe::{SysfsPresence, TcpReachability};
use crate::rpc::server::RpcServer;
use crate::shared::lock::InstanceLock;
use crate::shared::signal::install_shutdown_handler;
use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tracing::{info, warn};

// Public serve command entrypoint.
pub fn run_serve(args: ServeArgs) -> Result<()> {
    let running = install_shutdown_handler()?;
    run_serve_with_signal(args, running)
}

// Own the modem until the run flag clears: serial queue on one worker thread,
// RPC listener on this thread, connectivity monitor on a third.
pub(crate) fn run_serve_with_signal(args: ServeArgs, running: Arc<AtomicBool>) -> Result<()> {
    let _lock = InstanceLock::acquire(&args.lock_file)?;

    // Bind before touching the modem so a port clash fails fast.
    let server = RpcServer::bind(args.listen)?;
    info!(addr = %server.local_addr(), pid = std::process::id(), "modem daemon starting");

    let transport = SerialTransport::new(args.to_transport_config(), Box::new(SerialOpener));
    let (executor, worker) = spawn_executor(transport, args.queue_timeout());
    let service = ModemService::new(
        executor.clone(),
        args.command_timeout(),
        args.gnss_query_command.clone(),
    );

    // Initial contact enables GNSS; a missing modem is not fatal.
    match service.probe() {
        Ok(()) => info!("modem answered initial probe"),
        Err(err) => warn!(error = %err, "modem not reachable at startup; will retry on demand"),
    }

    let monitor = if args.recovery {
        let probe_config = args.to_probe_config();
        let mut resetter = ModemResetter::new(
            executor.clone(),
            args.reset_commands.clone(),
            args.command_timeout(),
        );
        if let Some(unit) = &args.handoff_unit {
            let unit = SystemdUnit::new(unit.clone(), Duration::from_secs(args.handoff_settle_secs));
            // Stop and start each get the full settle window.
            let budget = unit.settle_timeout() * 2;
            resetter = resetter.with_external_service(Arc::new(unit), budget);
        }
        let controller = RecoveryController::new(
            args.to_recovery_config(),
            SysfsPresence::new(&probe_config),
            TcpReachability::new(&probe_config),
            resetter,
        );
        Some(spawn_monitor(
            controller,
            args.check_interval(),
            Arc::clone(&running),
        ))
    } else {
        info!("connectivity recovery disabled");
        None
    };

    server.serve(service, Arc::clone(&running));

    if let Some(monitor) = monitor {
        if monitor.join().is_err() {
            warn!("connectivity monitor panicked");
        }
    }
    executor.shutdown();
    if worker.join().is_err() {
        warn!("serial executor panicked");
    }
    info!("modem daemon stopped");
    Ok(())
}

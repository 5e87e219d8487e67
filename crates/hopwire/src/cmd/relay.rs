use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use hopwire_route::{
    Acceptor, AcceptorConfig, AcceptorHandle, ManagerConfig, Message, Route, RouteManager,
};
use tracing::{debug, info, warn};

use crate::cmd::{RelayArgs, Transport};
use crate::exit::{route_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_message, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Run a relay node: forward routed traffic, print what is addressed here.
pub fn run(args: RelayArgs, format: OutputFormat) -> CliResult<i32> {
    let transports = args.transports()?;

    let manager = RouteManager::new(ManagerConfig {
        server_mode: args.server_mode(),
        default_hop_count: args.hop_count,
        node_id: args.node_id,
    });

    let (local_tx, local_rx) = mpsc::channel();
    let local_tx = Mutex::new(local_tx);
    manager.set_handler(move |manager: &RouteManager, mut message: Message| {
        let print = |message: Message| {
            let sender = local_tx.lock().unwrap_or_else(PoisonError::into_inner);
            if sender.send(message).is_err() {
                debug!("relay output closed; local message dropped");
            }
        };

        if message.is_local() {
            print(message);
            return;
        }
        if message.is_broadcast() {
            print(message.clone());
        }
        if !manager.deliver(&mut message) {
            debug!(msg_type = %message.msg_type, "message not relayed");
        }
    });

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut acceptors = Vec::new();
    let opened = open_transports(&manager, &transports, &args, &mut acceptors);
    if let Err(err) = opened {
        shutdown(&manager, acceptors);
        return Err(err);
    }

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        match local_rx.recv_timeout(POLL_INTERVAL) {
            Ok(message) => {
                print_message(&message, format);
                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    shutdown(&manager, acceptors);
    Ok(SUCCESS)
}

fn open_transports(
    manager: &RouteManager,
    transports: &[Transport],
    args: &RelayArgs,
    acceptors: &mut Vec<AcceptorHandle>,
) -> CliResult<()> {
    for transport in transports {
        match transport {
            Transport::Pipe { inbound, outbound } => {
                let code = manager
                    .free_port_id()
                    .map_err(|err| route_error("route id", err))?;
                let route = Route::pipe(code, inbound, outbound)
                    .map_err(|err| route_error("invalid -F parameters", err))?;
                manager
                    .open_port(&route)
                    .map_err(|err| route_error("pipe route", err))?;
            }
            Transport::Connect { host, port } => {
                let code = manager
                    .free_port_id()
                    .map_err(|err| route_error("route id", err))?;
                let route = Route::connect(code, host.as_str(), u32::from(*port))
                    .map_err(|err| route_error("invalid -C parameters", err))?;
                manager
                    .open_port(&route)
                    .map_err(|err| route_error("socket route", err))?;
            }
            Transport::Listen { bind, port } => {
                let config = AcceptorConfig {
                    max_connections: args.max_connections,
                    ..AcceptorConfig::default()
                };
                let addr = format!("{bind}:{port}");
                let handle = Acceptor::bind_with_config(addr.as_str(), manager.clone(), config)
                    .and_then(Acceptor::spawn)
                    .map_err(|err| route_error("listen failed", err))?;
                info!(addr = %handle.local_addr(), "accepting routes");
                acceptors.push(handle);
            }
        }
    }
    Ok(())
}

fn shutdown(manager: &RouteManager, acceptors: Vec<AcceptorHandle>) {
    for acceptor in acceptors {
        if let Err(err) = acceptor.shutdown() {
            warn!(error = %err, "acceptor did not stop cleanly");
        }
    }
    manager.shutdown();
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

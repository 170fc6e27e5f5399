//! Daemon bootstrap: bind the control plane, install signal handlers, run
//! the loops, tear down in order.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::AllowAll;
use crate::config::Config;
use crate::context::Context;
use crate::daemon::announce::{Announcer, UdpPublisher};
use crate::daemon::server::{handle_client, run_state_loop, ControlRequest, Node, SignalFlags};
use crate::engine::EngineFactory;
use crate::error::ConfigError;
use crate::storage::{MemoryStorage, Storage, StorageTag};

/// Run the node in the current process until a shutdown signal arrives.
pub fn run_node(config: Config, factory: Box<dyn EngineFactory>) -> crate::Result<()> {
    let context = Arc::new(build_context(config)?);

    let storage = build_storage(&context)?;
    let mut node = Node::new(context.clone(), storage, factory, Box::new(AllowAll));
    tracing::info!(route = %node.route(), "route to this node");

    // Reconciliation failures at startup are fatal.
    node.recover()?;

    let mut listeners = Vec::new();
    let mut socket_paths = Vec::new();
    for endpoint in &context.config.network.endpoints {
        let listener = context.io().bind(endpoint)?;
        listener.set_nonblocking(true).map_err(|source| {
            crate::context::ResourceError::Bind {
                endpoint: endpoint.clone(),
                source,
            }
        })?;
        tracing::info!(endpoint = %endpoint, "listening");
        socket_paths.push(context.io().endpoint(endpoint));
        listeners.push(listener);
    }

    let announcer = match &context.config.network.announce {
        Some(announce) => {
            let publisher = UdpPublisher::connect(&announce.endpoint).map_err(|err| {
                ConfigError::Invalid(format!("invalid announce endpoint - {err}"))
            })?;
            tracing::info!(endpoint = %announce.endpoint, "announcing");
            Some(Announcer::new(
                Box::new(publisher),
                Duration::from_secs(announce.interval_secs),
            ))
        }
        None => None,
    };

    let flags = SignalFlags::default();
    for signal in [
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGTERM,
        signal_hook::consts::SIGQUIT,
    ] {
        signal_hook::flag::register(signal, flags.shutdown.clone())
            .map_err(|e| crate::Error::Unexpected(format!("signal handler: {e}")))?;
    }
    signal_hook::flag::register(signal_hook::consts::SIGHUP, flags.reload.clone())
        .map_err(|e| crate::Error::Unexpected(format!("signal handler: {e}")))?;

    let (req_tx, req_rx) = crossbeam::channel::unbounded::<ControlRequest>();
    let state_flags = flags.clone();
    let state_handle =
        std::thread::spawn(move || run_state_loop(node, req_rx, announcer, state_flags));

    // Accept on every endpoint; one handler thread per connection.
    loop {
        if flags.shutdown.load(Ordering::Relaxed) {
            tracing::info!("shutdown signal received");
            break;
        }

        for listener in &listeners {
            match listener.accept() {
                Ok((stream, _addr)) => {
                    let _ = stream.set_nonblocking(false);
                    let req_tx = req_tx.clone();
                    std::thread::spawn(move || handle_client(stream, req_tx));
                }
                Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(err) => {
                    tracing::error!("accept error: {err}");
                }
            }
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    // The state loop observes the shutdown flag on its next tick.
    drop(req_tx);
    let _ = state_handle.join();

    for path in socket_paths {
        let _ = std::fs::remove_file(path);
    }
    tracing::info!("node stopped");
    Ok(())
}

fn build_context(config: Config) -> crate::Result<Context> {
    if config.loggers.contains_key("core") {
        Context::new(config, "core")
    } else {
        Context::with_logger(config, Arc::new(crate::logging::TracingSink::new()))
    }
}

/// The catalog persists through the storage instance named `core`; nodes
/// without one fall back to the process-local backend.
fn build_storage(context: &Context) -> crate::Result<Box<dyn Storage>> {
    match context.config.core_storage().cloned() {
        Some(component) => context.get::<StorageTag>(&component.kind, "core", &component.args),
        None => Ok(Box::new(MemoryStorage::new())),
    }
}

//! Wiring: proxy routing, the log, the termination hook, then hand-off to the chosen mode.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info};

use crate::ack_log::AckLog;
use crate::cli::Mode;
use crate::config::Config;
use crate::error::StressError;
use crate::proxy::{ProxyRouter, SystemSelector};
use crate::receiver;
use crate::sender::{Sender, SEND_INTERVAL};
use crate::shutdown::{self, Shutdown};
use crate::transport::amqp::AmqpTransport;
use crate::transport::Transport;

/// Run the stress client against the configured broker until the process is told to stop.
pub fn run(mode: Mode, config: &Config) -> Result<(), StressError> {
    info!("Starting up {}...", mode);
    info!("\n{}", config);

    let router = ProxyRouter::new(config.proxy.clone(), SystemSelector::from_env());
    let transport = AmqpTransport::connect(&config.broker, &config.queue, &router)?;

    // the previous run's log is only truncated once the broker is reachable
    let log = Arc::new(AckLog::open(mode.log_path())?);
    let shutdown = Shutdown::new();
    shutdown::install_handler(&shutdown, Arc::clone(&log))?;

    drive(mode, transport, log, &shutdown, SEND_INTERVAL)
}

/// Run `mode` over an already connected transport until `shutdown` fires, then close
/// the transport, wait for the delivery worker and close the log.
pub fn drive<T: Transport>(
    mode: Mode,
    mut transport: T,
    log: Arc<AckLog>,
    shutdown: &Shutdown,
    interval: Duration,
) -> Result<(), StressError> {
    let subscription = match mode {
        Mode::Send => {
            let publisher = transport.publisher()?;
            Sender::new(publisher, Arc::clone(&log), shutdown.clone())
                .interval(interval)
                .run();
            None
        }
        Mode::Receive => {
            let subscriber = transport.subscriber()?;
            let subscription = receiver::register(subscriber, Arc::clone(&log))?;
            info!("Waiting for messages. Press Ctrl-C to exit.");
            shutdown.wait();
            Some(subscription)
        }
    };

    if let Err(e) = transport.close() {
        error!("closing transport had failed: {}", e);
    }
    if let Some(subscription) = subscription {
        subscription.join();
    }
    log.close();
    Ok(())
}

//! Connection supervisor.
//!
//! Owns the transport lifecycle: `Disconnected → Connecting → Connected`,
//! back to `Disconnected` on any error, forever. There is no maximum
//! retry count — this is a long-lived service expected to self-heal.
//!
//! On entering `Connected` the supervisor announces readiness to the
//! service manager and starts pulsing the watchdog between packets; the
//! pulse loop shares the select with the packet read, so it only fires
//! while the pipeline is otherwise idle. Transport failures and
//! unexpected failures use separately configured retry delays, and every
//! failure logs its full error chain.

use crate::config::IngestConfig;
use crate::notify::SystemdNotifier;
use crate::pipeline::Dispatcher;
use crate::source::{SourceEvent, TcpSource};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Supervises the device connection and drives the dispatcher.
pub struct Supervisor {
    config: IngestConfig,
    dispatcher: Arc<Dispatcher>,
    notifier: SystemdNotifier,
}

impl Supervisor {
    /// Create a supervisor for the given configuration.
    pub fn new(config: IngestConfig, dispatcher: Arc<Dispatcher>, notifier: SystemdNotifier) -> Self {
        Self {
            config,
            dispatcher,
            notifier,
        }
    }

    /// Run the connect/serve/retry loop. Only returns if the process is
    /// being torn down around it (the caller typically races this against
    /// a shutdown signal).
    pub async fn run(&self) -> Result<()> {
        let mut watchdog = time::interval(self.config.watchdog_period);
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            match TcpSource::connect(&self.config.device_addr, self.config.connect_timeout).await {
                Ok(source) => {
                    self.notifier.ready();
                    let err = self.serve(source, &mut watchdog).await;
                    // The source is dropped by now; the socket is released
                    // before we dial again.
                    let delay = if err.is_transport() {
                        warn!("Connection lost or failed: {}", err);
                        self.config.reconnect_delay
                    } else {
                        error!("Unexpected failure: {}", err);
                        self.config.error_retry_delay
                    };
                    log_error_chain(&err);
                    info!("Reconnecting in {}s...", delay.as_secs());
                    self.notifier.watchdog();
                    time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(
                        "Connection to {} failed: {}",
                        self.config.device_addr, e
                    );
                    log_error_chain(&e);
                    info!("Reconnecting in {}s...", self.config.reconnect_delay.as_secs());
                    self.notifier.watchdog();
                    time::sleep(self.config.reconnect_delay).await;
                }
            }
        }
    }

    /// Serve one session until it fails, returning the terminating error.
    async fn serve(&self, mut source: TcpSource, watchdog: &mut time::Interval) -> Error {
        loop {
            tokio::select! {
                event = source.next_event() => match event {
                    Ok(SourceEvent::Connected { local_node }) => {
                        info!("Device session established; local node is {}", local_node);
                        self.dispatcher.set_local_node(local_node);
                    }
                    Ok(SourceEvent::Packet(packet)) => {
                        self.dispatcher.dispatch(&packet).await;
                    }
                    Err(e) => return e,
                },
                _ = watchdog.tick() => {
                    self.notifier.watchdog();
                    let stats = self.dispatcher.stats();
                    debug!(
                        "Pipeline: {} received, {} committed, {} rejected, {} failed, {} ignored",
                        stats.received, stats.committed, stats.rejected, stats.failed, stats.ignored
                    );
                }
            }
        }
    }
}

fn log_error_chain(err: &Error) {
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        error!("  caused by: {}", cause);
        source = cause.source();
    }
}

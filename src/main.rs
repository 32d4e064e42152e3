// SPDX-License-Identifier: MIT-0

use std::time::Duration;

use clap::Parser;
use crossbeam_channel::Receiver;
use dbus::blocking::Connection;
use tracing::{error, info, warn};

use moga_monitor::bus::{DBusLink, NameWatch};
use moga_monitor::config::Cli;
use moga_monitor::error::{BusError, MonitorError};
use moga_monitor::event::BusEvent;
use moga_monitor::logging;
use moga_monitor::monitor::{BusLink, Flow, PresenceMonitor};
use moga_monitor::shutdown;

const PROCESS_TIMEOUT: Duration = Duration::from_millis(1000);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init(cli.log_filter()).map_err(|e| e as Box<dyn std::error::Error>)?;

    let conn = match Connection::new_system() {
        Ok(conn) => conn,
        Err(e) => {
            error!(error = %e, "Error while connecting");
            return Err(BusError::Connect(e).into());
        }
    };

    let (tx, rx) = crossbeam_channel::unbounded();
    shutdown::spawn_listener(tx.clone())?;

    let mut watch = NameWatch::start(&conn, &cli.peer, cli.timeout(), tx.clone())?;
    let mut monitor = PresenceMonitor::new(DBusLink::new(&conn, tx), cli.signal_filter())
        .with_malformed_policy(cli.malformed_policy());
    info!(peer = %cli.peer, signal = %cli.signal, "monitoring");

    let result = run(&conn, &mut monitor, &rx);

    if let Err(e) = monitor.shutdown() {
        warn!(error = %e, "failed to release subscription");
    }
    watch.stop(&conn);

    result.map_err(Into::into)
}

/// Dispatches bus traffic and feeds the queued events to the monitor until a
/// shutdown is requested or something fatal happens.
fn run<L: BusLink>(
    conn: &Connection,
    monitor: &mut PresenceMonitor<L>,
    events: &Receiver<BusEvent>,
) -> Result<(), MonitorError> {
    loop {
        for event in events.try_iter() {
            if monitor.handle(event)? == Flow::Stop {
                info!(peer = %monitor.peer(), "stopped");
                return Ok(());
            }
        }

        conn.process(PROCESS_TIMEOUT).map_err(BusError::Dispatch)?;
    }
}

// SPDX-License-Identifier: MIT-0

use dbus::arg::RefArg;

/// One received signal, as handed over by the bus callbacks.
#[derive(Debug)]
pub struct PropertyChangeEvent {
    pub object_path: String,
    pub interface_name: String,
    pub signal_name: String,
    /// Signal body, one entry per top-level argument.
    pub payload: Vec<Box<dyn RefArg>>,
}

/// Notifications queued by the bus callbacks and consumed, in order, by the
/// monitor's loop.
#[derive(Debug)]
pub enum BusEvent {
    Appeared { owner: String },
    Vanished,
    Signal(PropertyChangeEvent),
    Shutdown,
}

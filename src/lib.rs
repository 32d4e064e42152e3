// SPDX-License-Identifier: MIT-0

//! Watches a peer on the system bus (by default `org.bluez`) and, while it
//! owns its name, logs `Connected` transitions carried by its
//! `PropertiesChanged` signals.
//!
//! The [`monitor::PresenceMonitor`] is the only stateful piece. Everything it
//! needs from the bus goes through the [`monitor::BusLink`] trait, and all
//! bus notifications reach it as [`event::BusEvent`]s drained on one thread.

pub mod bus;
pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod monitor;
pub mod payload;
pub mod shutdown;

#[cfg(test)]
mod test_support;

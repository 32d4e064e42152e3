// SPDX-License-Identifier: MIT-0

use thiserror::Error;

use crate::monitor::SubscriptionHandle;

/// Failures talking to the bus itself.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("error while connecting: {0}")]
    Connect(#[source] dbus::Error),

    #[error("invalid match filter: {0}")]
    InvalidFilter(String),

    #[error("failed to subscribe to {member} from {sender}: {source}")]
    Subscribe {
        sender: String,
        member: String,
        #[source]
        source: dbus::Error,
    },

    #[error("failed to release subscription {handle}: {source}")]
    Unsubscribe {
        handle: SubscriptionHandle,
        #[source]
        source: dbus::Error,
    },

    #[error("failed to watch name '{name}': {source}")]
    Watch {
        name: String,
        #[source]
        source: dbus::Error,
    },

    #[error("bus dispatch failed: {0}")]
    Dispatch(#[source] dbus::Error),
}

/// A `PropertiesChanged` payload that does not have the
/// `(s, a{sv}, as)` shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("expected {expected} payload elements, got {found}")]
    Arity { expected: usize, found: usize },

    #[error("payload element {index} has signature '{found}', expected '{expected}'")]
    ElementType {
        index: usize,
        expected: &'static str,
        found: String,
    },

    #[error("property '{key}' has signature '{found}', expected a boolean")]
    NotBoolean { key: String, found: String },
}

/// Anything that stops the monitor's event loop.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("protocol violation: {0}")]
    Protocol(#[from] PayloadError),
}

// SPDX-License-Identifier: MIT-0

//! Peer presence tracking and the `PropertiesChanged` subscription that goes
//! with it.
//!
//! A [`PresenceMonitor`] holds a live subscription exactly while the watched
//! peer owns its name. It never touches the bus directly; subscribe and
//! unsubscribe go through a [`BusLink`].

use std::fmt;

use tracing::{debug, error, info, warn};

use crate::error::{BusError, MonitorError, PayloadError};
use crate::event::{BusEvent, PropertyChangeEvent};
use crate::payload::{self, ConnectedTransition, PropertiesChanged};

pub const DEFAULT_PEER: &str = "org.bluez";
pub const PROPERTIES_CHANGED: &str = "PropertiesChanged";

/// Identifies one active signal filter on the link that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(usize);

impl SubscriptionHandle {
    pub fn new(id: usize) -> Self {
        SubscriptionHandle(id)
    }

    pub fn id(self) -> usize {
        self.0
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which signals a subscription delivers. `None` leaves a field unconstrained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalFilter {
    pub sender: String,
    pub interface: Option<String>,
    pub member: String,
    pub path: Option<String>,
}

impl SignalFilter {
    /// Every `member` signal sent by `sender`, on any object and interface.
    pub fn from_sender(sender: impl Into<String>, member: impl Into<String>) -> Self {
        SignalFilter {
            sender: sender.into(),
            interface: None,
            member: member.into(),
            path: None,
        }
    }
}

/// The subset of bus operations the monitor drives.
pub trait BusLink {
    fn subscribe_signal(&mut self, filter: &SignalFilter) -> Result<SubscriptionHandle, BusError>;
    fn unsubscribe_signal(&mut self, handle: SubscriptionHandle) -> Result<(), BusError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerPresence {
    #[default]
    Absent,
    Present,
}

/// What happens to a signal whose body does not decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MalformedPolicy {
    /// Stop the monitor with [`MonitorError::Protocol`].
    #[default]
    Fatal,
    /// Log the violation and keep going.
    Tolerate,
}

/// Whether the event loop should keep draining events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

pub struct PresenceMonitor<L: BusLink> {
    link: L,
    filter: SignalFilter,
    presence: PeerPresence,
    subscription: Option<SubscriptionHandle>,
    malformed: MalformedPolicy,
}

impl<L: BusLink> PresenceMonitor<L> {
    pub fn new(link: L, filter: SignalFilter) -> Self {
        PresenceMonitor {
            link,
            filter,
            presence: PeerPresence::Absent,
            subscription: None,
            malformed: MalformedPolicy::default(),
        }
    }

    pub fn with_malformed_policy(mut self, policy: MalformedPolicy) -> Self {
        self.malformed = policy;
        self
    }

    pub fn presence(&self) -> PeerPresence {
        self.presence
    }

    pub fn subscription(&self) -> Option<SubscriptionHandle> {
        self.subscription
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn peer(&self) -> &str {
        &self.filter.sender
    }

    /// Routes one queued event to the matching handler.
    pub fn handle(&mut self, event: BusEvent) -> Result<Flow, MonitorError> {
        match event {
            BusEvent::Appeared { owner } => {
                debug!(peer = %self.filter.sender, %owner, "name owner appeared");
                self.on_peer_appeared()?;
            }
            BusEvent::Vanished => {
                if let Err(e) = self.on_peer_vanished() {
                    warn!(peer = %self.filter.sender, error = %e, "failed to release subscription");
                }
            }
            BusEvent::Signal(signal) => match self.on_property_change_signal(&signal) {
                Ok(_) => {}
                Err(e) if self.malformed == MalformedPolicy::Tolerate => {
                    warn!(path = %signal.object_path, error = %e, "ignoring malformed signal");
                }
                Err(e) => {
                    error!(path = %signal.object_path, error = %e, "malformed signal");
                    return Err(e.into());
                }
            },
            BusEvent::Shutdown => {
                if let Err(e) = self.shutdown() {
                    warn!(peer = %self.filter.sender, error = %e, "failed to release subscription");
                }
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    pub fn on_peer_appeared(&mut self) -> Result<(), BusError> {
        if self.presence == PeerPresence::Present {
            debug!(peer = %self.filter.sender, "duplicate appear notification");
            return Ok(());
        }

        let handle = self.link.subscribe_signal(&self.filter)?;
        self.subscription = Some(handle);
        self.presence = PeerPresence::Present;
        info!(peer = %self.filter.sender, subscription = %handle, "{} appeared", self.filter.sender);
        Ok(())
    }

    pub fn on_peer_vanished(&mut self) -> Result<(), BusError> {
        if self.presence == PeerPresence::Absent {
            debug!(peer = %self.filter.sender, "duplicate vanish notification");
            return Ok(());
        }

        self.presence = PeerPresence::Absent;
        info!(peer = %self.filter.sender, "{} vanished", self.filter.sender);
        self.release()
    }

    /// Logs the raw signal, then the `Connected` transition it carries, if any.
    pub fn on_property_change_signal(
        &mut self,
        signal: &PropertyChangeEvent,
    ) -> Result<Option<ConnectedTransition>, PayloadError> {
        debug!(
            "{}: {}.{} {}",
            signal.object_path,
            signal.interface_name,
            signal.signal_name,
            payload::render(&signal.payload)
        );

        if self.presence == PeerPresence::Absent {
            debug!(path = %signal.object_path, "peer absent, signal dropped");
            return Ok(None);
        }

        let decoded = PropertiesChanged::decode(&signal.payload)?;
        let transition = decoded.transition();
        if let Some(transition) = transition {
            info!(path = %signal.object_path, "{}", transition.message());
        }
        Ok(transition)
    }

    /// Releases the subscription, if any. Safe to call more than once.
    pub fn shutdown(&mut self) -> Result<(), BusError> {
        self.presence = PeerPresence::Absent;
        self.release()
    }

    fn release(&mut self) -> Result<(), BusError> {
        match self.subscription.take() {
            Some(handle) => {
                debug!(subscription = %handle, "releasing subscription");
                self.link.unsubscribe_signal(handle)
            }
            None => Ok(()),
        }
    }
}

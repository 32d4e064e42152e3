// SPDX-License-Identifier: MIT-0

//! The system-bus side: a [`BusLink`] over a blocking `dbus` connection and a
//! name watch built on `NameOwnerChanged`.
//!
//! Callbacks registered here never call into the monitor. They only push
//! [`BusEvent`]s, which the loop drains after each `Connection::process`.

use std::time::Duration;

use crossbeam_channel::Sender;
use dbus::arg;
use dbus::blocking::Connection;
use dbus::channel::Token;
use dbus::message::{MatchRule, MessageType};
use dbus::strings::{BusName, Interface, Member, Path};
use dbus::Message;
use tracing::{debug, warn};

use crate::error::BusError;
use crate::event::{BusEvent, PropertyChangeEvent};
use crate::monitor::{BusLink, SignalFilter, SubscriptionHandle};

const DBUS_NAME: &str = "org.freedesktop.DBus";
const DBUS_PATH: &str = "/org/freedesktop/DBus";

pub struct NameOwnerChangedSignal {
    pub name: String,
    pub old_owner: String,
    pub new_owner: String,
}

impl arg::AppendAll for NameOwnerChangedSignal {
    fn append(&self, i: &mut arg::IterAppend) {
        arg::RefArg::append(&self.name, i);
        arg::RefArg::append(&self.old_owner, i);
        arg::RefArg::append(&self.new_owner, i);
    }
}

impl arg::ReadAll for NameOwnerChangedSignal {
    fn read(i: &mut arg::Iter) -> Result<Self, arg::TypeMismatchError> {
        Ok(NameOwnerChangedSignal {
            name: i.read()?,
            old_owner: i.read()?,
            new_owner: i.read()?,
        })
    }
}

impl dbus::message::SignalArgs for NameOwnerChangedSignal {
    const NAME: &'static str = "NameOwnerChanged";
    const INTERFACE: &'static str = "org.freedesktop.DBus";
}

/// Presence events implied by one ownership change of a watched name.
///
/// An owner handing the name straight to another owner counts as a vanish
/// followed by an appear.
pub fn owner_change_events(old_owner: &str, new_owner: &str) -> Vec<BusEvent> {
    let mut events = Vec::new();
    if !old_owner.is_empty() {
        events.push(BusEvent::Vanished);
    }
    if !new_owner.is_empty() {
        events.push(BusEvent::Appeared {
            owner: new_owner.to_string(),
        });
    }
    events
}

/// Builds the match rule for `filter`, rejecting names the bus would refuse.
pub fn match_rule(filter: &SignalFilter) -> Result<MatchRule<'static>, BusError> {
    let sender = BusName::new(filter.sender.clone()).map_err(BusError::InvalidFilter)?;
    let member = Member::new(filter.member.clone()).map_err(BusError::InvalidFilter)?;

    let mut rule = MatchRule::new()
        .with_type(MessageType::Signal)
        .with_sender(sender)
        .with_member(member);
    if let Some(interface) = &filter.interface {
        rule = rule.with_interface(Interface::new(interface.clone()).map_err(BusError::InvalidFilter)?);
    }
    if let Some(path) = &filter.path {
        rule = rule.with_path(Path::new(path.clone()).map_err(BusError::InvalidFilter)?);
    }
    Ok(rule)
}

impl PropertyChangeEvent {
    pub fn from_message(msg: &Message) -> Self {
        let mut payload = Vec::new();
        let mut iter = msg.iter_init();
        while let Some(item) = iter.get_refarg() {
            payload.push(item);
            if !iter.next() {
                break;
            }
        }

        PropertyChangeEvent {
            object_path: msg.path().map(|p| p.to_string()).unwrap_or_default(),
            interface_name: msg.interface().map(|i| i.to_string()).unwrap_or_default(),
            signal_name: msg.member().map(|m| m.to_string()).unwrap_or_default(),
            payload,
        }
    }
}

fn handle_for(token: Token) -> SubscriptionHandle {
    SubscriptionHandle::new(token.0)
}

fn token_for(handle: SubscriptionHandle) -> Token {
    Token(handle.id())
}

/// Subscriptions made directly on a system-bus connection. Matching signals
/// are queued on `events`.
pub struct DBusLink<'c> {
    conn: &'c Connection,
    events: Sender<BusEvent>,
}

impl<'c> DBusLink<'c> {
    pub fn new(conn: &'c Connection, events: Sender<BusEvent>) -> Self {
        DBusLink { conn, events }
    }
}

impl BusLink for DBusLink<'_> {
    fn subscribe_signal(&mut self, filter: &SignalFilter) -> Result<SubscriptionHandle, BusError> {
        let rule = match_rule(filter)?;
        let events = self.events.clone();
        let token = self
            .conn
            .add_match(rule, move |_: (), _: &Connection, msg: &Message| {
                events
                    .send(BusEvent::Signal(PropertyChangeEvent::from_message(msg)))
                    .is_ok()
            })
            .map_err(|source| BusError::Subscribe {
                sender: filter.sender.clone(),
                member: filter.member.clone(),
                source,
            })?;

        let handle = handle_for(token);
        debug!(subscription = %handle, sender = %filter.sender, member = %filter.member, "match added");
        Ok(handle)
    }

    fn unsubscribe_signal(&mut self, handle: SubscriptionHandle) -> Result<(), BusError> {
        self.conn
            .remove_match(token_for(handle))
            .map_err(|source| BusError::Unsubscribe { handle, source })?;
        debug!(subscription = %handle, "match removed");
        Ok(())
    }
}

/// Owner from a `GetNameOwner` reply. `NameHasNoOwner` means nobody owns it.
fn initial_owner(reply: Result<(String,), dbus::Error>) -> Result<Option<String>, dbus::Error> {
    match reply {
        Ok((owner,)) if owner.is_empty() => Ok(None),
        Ok((owner,)) => Ok(Some(owner)),
        Err(e) if e.name() == Some("org.freedesktop.DBus.Error.NameHasNoOwner") => Ok(None),
        Err(e) => Err(e),
    }
}

fn queue_initial_owner(events: &Sender<BusEvent>, name: &str, owner: String) {
    if events.send(BusEvent::Appeared { owner }).is_err() {
        warn!(%name, "event queue closed, initial owner not reported");
    }
}

/// Reports a well-known name gaining and losing its owner as
/// [`BusEvent::Appeared`] / [`BusEvent::Vanished`].
pub struct NameWatch {
    name: String,
    token: Option<Token>,
}

impl NameWatch {
    /// Starts watching `name`. If it already has an owner, an `Appeared` event
    /// is queued right away.
    pub fn start(
        conn: &Connection,
        name: &str,
        timeout: Duration,
        events: Sender<BusEvent>,
    ) -> Result<Self, BusError> {
        let watch_error = |source: dbus::Error| BusError::Watch {
            name: name.to_string(),
            source,
        };

        let bus = conn.with_proxy(DBUS_NAME, DBUS_PATH, timeout);

        let watched = name.to_string();
        let signal_events = events.clone();
        let token = bus
            .match_signal(
                move |signal: NameOwnerChangedSignal, _: &Connection, _: &Message| {
                    if signal.name != watched {
                        return true;
                    }
                    owner_change_events(&signal.old_owner, &signal.new_owner)
                        .into_iter()
                        .all(|event| signal_events.send(event).is_ok())
                },
            )
            .map_err(watch_error)?;

        let owner = match initial_owner(bus.method_call(DBUS_NAME, "GetNameOwner", (name,))) {
            Ok(owner) => owner,
            Err(e) => {
                if let Err(cleanup) = conn.remove_match(token) {
                    warn!(%name, error = %cleanup, "failed to drop name watch match");
                }
                return Err(watch_error(e));
            }
        };

        if let Some(owner) = owner {
            queue_initial_owner(&events, name, owner);
        }
        debug!(%name, "watching name");

        Ok(NameWatch {
            name: name.to_string(),
            token: Some(token),
        })
    }

    /// Drops the `NameOwnerChanged` match. Only the first call does anything.
    pub fn stop(&mut self, conn: &Connection) {
        if let Some(token) = self.token.take() {
            match conn.remove_match(token) {
                Ok(()) => debug!(name = %self.name, "stopped watching name"),
                Err(e) => warn!(name = %self.name, error = %e, "failed to stop name watch"),
            }
        }
    }
}

// SPDX-License-Identifier: MIT-0

//! Fakes shared by the unit tests: an in-memory bus link, payload builders and
//! a tracing layer that records emitted log lines.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use dbus::arg::{PropMap, RefArg, Variant};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use crate::error::BusError;
use crate::event::PropertyChangeEvent;
use crate::monitor::{BusLink, SignalFilter, SubscriptionHandle};

pub const DEVICE_PATH: &str = "/org/bluez/hci0/dev_00_11_22_33_44_55";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkCall {
    Subscribe(SubscriptionHandle),
    Unsubscribe(SubscriptionHandle),
}

/// Records subscribe/unsubscribe calls and hands out increasing handles.
#[derive(Debug, Default)]
pub struct FakeLink {
    next_id: usize,
    pub calls: Vec<LinkCall>,
    pub live: Vec<SubscriptionHandle>,
    pub filters: Vec<SignalFilter>,
    pub fail_subscribe: bool,
    pub fail_unsubscribe: bool,
}

impl FakeLink {
    pub fn subscribe_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| matches!(call, LinkCall::Subscribe(_)))
            .count()
    }

    pub fn unsubscribe_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| matches!(call, LinkCall::Unsubscribe(_)))
            .count()
    }
}

impl BusLink for FakeLink {
    fn subscribe_signal(&mut self, filter: &SignalFilter) -> Result<SubscriptionHandle, BusError> {
        if self.fail_subscribe {
            return Err(BusError::Subscribe {
                sender: filter.sender.clone(),
                member: filter.member.clone(),
                source: dbus::Error::new_failed("AddMatch rejected"),
            });
        }
        self.next_id += 1;
        let handle = SubscriptionHandle::new(self.next_id);
        self.calls.push(LinkCall::Subscribe(handle));
        self.live.push(handle);
        self.filters.push(filter.clone());
        Ok(handle)
    }

    fn unsubscribe_signal(&mut self, handle: SubscriptionHandle) -> Result<(), BusError> {
        self.calls.push(LinkCall::Unsubscribe(handle));
        if self.fail_unsubscribe {
            return Err(BusError::Unsubscribe {
                handle,
                source: dbus::Error::new_failed("RemoveMatch rejected"),
            });
        }
        self.live.retain(|live| *live != handle);
        Ok(())
    }
}

pub fn prop(key: &str, value: impl RefArg + 'static) -> (String, Box<dyn RefArg>) {
    (key.to_string(), Box::new(value))
}

/// `("org.bluez.Device1", {changed...}, [])`
pub fn device_payload(changed: Vec<(String, Box<dyn RefArg>)>) -> Vec<Box<dyn RefArg>> {
    let mut props: PropMap = HashMap::new();
    for (key, value) in changed {
        props.insert(key, Variant(value));
    }
    vec![
        Box::new("org.bluez.Device1".to_string()),
        Box::new(props),
        Box::new(Vec::<String>::new()),
    ]
}

pub fn with_extra_element(mut payload: Vec<Box<dyn RefArg>>) -> Vec<Box<dyn RefArg>> {
    payload.push(Box::new("unexpected".to_string()));
    payload
}

pub fn signal_event(payload: Vec<Box<dyn RefArg>>) -> PropertyChangeEvent {
    PropertyChangeEvent {
        object_path: DEVICE_PATH.to_string(),
        interface_name: "org.freedesktop.DBus.Properties".to_string(),
        signal_name: "PropertiesChanged".to_string(),
        payload,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub level: Level,
    pub message: String,
}

#[derive(Clone, Default)]
struct LogCapture {
    lines: Arc<Mutex<Vec<LogLine>>>,
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.lines.lock().unwrap().push(LogLine {
            level: *event.metadata().level(),
            message: visitor.message,
        });
    }
}

/// Runs `f` with a thread-local subscriber and returns what it logged.
pub fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, Vec<LogLine>) {
    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let result = tracing::subscriber::with_default(subscriber, f);
    let lines = capture.lines.lock().unwrap().clone();
    (result, lines)
}

pub fn info_lines(lines: &[LogLine]) -> Vec<&str> {
    lines
        .iter()
        .filter(|line| line.level == Level::INFO)
        .map(|line| line.message.as_str())
        .collect()
}

pub fn debug_lines(lines: &[LogLine]) -> Vec<&str> {
    lines
        .iter()
        .filter(|line| line.level == Level::DEBUG)
        .map(|line| line.message.as_str())
        .collect()
}

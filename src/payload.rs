// SPDX-License-Identifier: MIT-0

//! Typed view of an `org.freedesktop.DBus.Properties.PropertiesChanged` body.
//!
//! The body arrives as loose [`RefArg`]s. [`PropertiesChanged::decode`] checks
//! the `(s, a{sv}, as)` shape before anything is read from it, and only the
//! `Connected` entry of the changed-properties dict is looked at.

use std::fmt::Write as _;

use dbus::arg::{ArgType, RefArg};

use crate::error::PayloadError;

/// The one changed property the monitor reports on.
pub const CONNECTED: &str = "Connected";

const ARITY: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectedTransition {
    Connected,
    Disconnected,
}

impl ConnectedTransition {
    pub fn from_connected(connected: bool) -> Self {
        if connected {
            ConnectedTransition::Connected
        } else {
            ConnectedTransition::Disconnected
        }
    }

    /// Log line emitted for this transition.
    pub fn message(self) -> &'static str {
        match self {
            ConnectedTransition::Connected => "Device connected",
            ConnectedTransition::Disconnected => "Device disconnected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertiesChanged {
    pub interface_name: String,
    /// Value of `Connected` if it was among the changed properties.
    pub connected: Option<bool>,
    pub invalidated: Vec<String>,
}

impl PropertiesChanged {
    pub fn decode(payload: &[Box<dyn RefArg>]) -> Result<Self, PayloadError> {
        if payload.len() != ARITY {
            return Err(PayloadError::Arity {
                expected: ARITY,
                found: payload.len(),
            });
        }

        let interface_name = expect_signature(payload, 0, "s")?
            .as_str()
            .unwrap_or_default()
            .to_string();

        let changed = expect_signature(payload, 1, "a{sv}")?;
        let mut connected = None;
        if let Some(mut entries) = changed.as_iter() {
            while let (Some(key), Some(value)) = (entries.next(), entries.next()) {
                if key.as_str() == Some(CONNECTED) {
                    connected = Some(read_bool(CONNECTED, value)?);
                }
            }
        }

        let invalidated = expect_signature(payload, 2, "as")?
            .as_iter()
            .map(|names| {
                names
                    .filter_map(|name| name.as_str().map(str::to_string))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        Ok(PropertiesChanged {
            interface_name,
            connected,
            invalidated,
        })
    }

    pub fn transition(&self) -> Option<ConnectedTransition> {
        self.connected.map(ConnectedTransition::from_connected)
    }
}

fn expect_signature<'a>(
    payload: &'a [Box<dyn RefArg>],
    index: usize,
    expected: &'static str,
) -> Result<&'a dyn RefArg, PayloadError> {
    let arg: &dyn RefArg = &*payload[index];
    let found = arg.signature();
    if &*found != expected {
        return Err(PayloadError::ElementType {
            index,
            expected,
            found: found.to_string(),
        });
    }
    Ok(arg)
}

fn unwrap_variant(value: &dyn RefArg) -> &dyn RefArg {
    if value.arg_type() == ArgType::Variant {
        if let Some(inner) = value.as_iter().and_then(|mut it| it.next()) {
            return inner;
        }
    }
    value
}

fn read_bool(key: &str, value: &dyn RefArg) -> Result<bool, PayloadError> {
    let value = unwrap_variant(value);
    match (value.arg_type(), value.as_u64()) {
        (ArgType::Boolean, Some(raw)) => Ok(raw != 0),
        _ => Err(PayloadError::NotBoolean {
            key: key.to_string(),
            found: value.signature().to_string(),
        }),
    }
}

/// Renders a signal body the way `gdbus monitor` prints one, e.g.
/// `('org.bluez.Device1', {'Connected': <true>}, [])`.
pub fn render(payload: &[Box<dyn RefArg>]) -> String {
    let mut out = String::from("(");
    for (i, arg) in payload.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        render_arg(&mut out, &**arg);
    }
    out.push(')');
    out
}

fn render_arg(out: &mut String, arg: &dyn RefArg) {
    match arg.arg_type() {
        ArgType::Boolean => {
            out.push_str(if arg.as_u64().unwrap_or(0) != 0 { "true" } else { "false" })
        }
        ArgType::String | ArgType::ObjectPath | ArgType::Signature => {
            let _ = write!(out, "'{}'", arg.as_str().unwrap_or_default());
        }
        ArgType::Byte | ArgType::UInt16 | ArgType::UInt32 | ArgType::UInt64 => {
            let _ = write!(out, "{}", arg.as_u64().unwrap_or_default());
        }
        ArgType::Int16 | ArgType::Int32 | ArgType::Int64 => {
            let _ = write!(out, "{}", arg.as_i64().unwrap_or_default());
        }
        ArgType::Double => {
            let _ = write!(out, "{}", arg.as_f64().unwrap_or_default());
        }
        ArgType::Variant => {
            out.push('<');
            if let Some(inner) = arg.as_iter().and_then(|mut it| it.next()) {
                render_arg(out, inner);
            }
            out.push('>');
        }
        ArgType::Array if arg.signature().starts_with("a{") => {
            out.push('{');
            if let Some(mut entries) = arg.as_iter() {
                let mut first = true;
                while let (Some(key), Some(value)) = (entries.next(), entries.next()) {
                    if !first {
                        out.push_str(", ");
                    }
                    first = false;
                    render_arg(out, key);
                    out.push_str(": ");
                    render_arg(out, value);
                }
            }
            out.push('}');
        }
        ArgType::Array | ArgType::Struct => {
            let (open, close) = if arg.arg_type() == ArgType::Array {
                ('[', ']')
            } else {
                ('(', ')')
            };
            out.push(open);
            if let Some(items) = arg.as_iter() {
                for (i, item) in items.enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    render_arg(out, item);
                }
            }
            out.push(close);
        }
        _ => {
            let _ = write!(out, "{:?}", arg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{device_payload, prop, with_extra_element};

    #[test]
    fn test_decode_connected_true() {
        let payload = device_payload(vec![prop("Connected", true)]);
        let decoded = PropertiesChanged::decode(&payload).unwrap();
        assert_eq!(decoded.interface_name, "org.bluez.Device1");
        assert_eq!(decoded.connected, Some(true));
        assert!(decoded.invalidated.is_empty());
        assert_eq!(decoded.transition(), Some(ConnectedTransition::Connected));
    }

    #[test]
    fn test_decode_connected_false() {
        let payload = device_payload(vec![prop("Connected", false)]);
        let decoded = PropertiesChanged::decode(&payload).unwrap();
        assert_eq!(decoded.transition(), Some(ConnectedTransition::Disconnected));
    }

    #[test]
    fn test_decode_ignores_other_keys() {
        let payload = device_payload(vec![prop("RSSI", -60i16)]);
        let decoded = PropertiesChanged::decode(&payload).unwrap();
        assert_eq!(decoded.connected, None);
        assert_eq!(decoded.transition(), None);
    }

    #[test]
    fn test_decode_connected_alongside_other_keys() {
        let payload = device_payload(vec![
            prop("ServicesResolved", true),
            prop("Connected", false),
            prop("RSSI", -71i16),
        ]);
        let decoded = PropertiesChanged::decode(&payload).unwrap();
        assert_eq!(decoded.connected, Some(false));
    }

    #[test]
    fn test_decode_rejects_two_elements() {
        let mut payload = device_payload(vec![prop("Connected", true)]);
        payload.pop();
        assert_eq!(
            PropertiesChanged::decode(&payload),
            Err(PayloadError::Arity {
                expected: 3,
                found: 2
            })
        );
    }

    #[test]
    fn test_decode_rejects_four_elements() {
        let payload = with_extra_element(device_payload(vec![prop("Connected", true)]));
        assert_eq!(
            PropertiesChanged::decode(&payload),
            Err(PayloadError::Arity {
                expected: 3,
                found: 4
            })
        );
    }

    #[test]
    fn test_decode_rejects_wrong_element_type() {
        let mut payload = device_payload(vec![]);
        payload[0] = Box::new(7u32);
        match PropertiesChanged::decode(&payload) {
            Err(PayloadError::ElementType {
                index: 0,
                expected: "s",
                found,
            }) => assert_eq!(found, "u"),
            other => panic!("unexpected decode result: {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_non_boolean_connected() {
        let payload = device_payload(vec![prop("Connected", "yes".to_string())]);
        assert_eq!(
            PropertiesChanged::decode(&payload),
            Err(PayloadError::NotBoolean {
                key: "Connected".to_string(),
                found: "s".to_string()
            })
        );
    }

    #[test]
    fn test_decode_reads_invalidated() {
        let mut payload = device_payload(vec![]);
        payload[2] = Box::new(vec!["Alias".to_string(), "Icon".to_string()]);
        let decoded = PropertiesChanged::decode(&payload).unwrap();
        assert_eq!(decoded.invalidated, vec!["Alias", "Icon"]);
    }

    #[test]
    fn test_render_full_payload() {
        let payload = device_payload(vec![prop("Connected", true)]);
        assert_eq!(
            render(&payload),
            "('org.bluez.Device1', {'Connected': <true>}, [])"
        );
    }

    #[test]
    fn test_render_signed_value() {
        let payload = device_payload(vec![prop("RSSI", -60i16)]);
        assert_eq!(render(&payload), "('org.bluez.Device1', {'RSSI': <-60>}, [])");
    }

    #[test]
    fn test_transition_messages() {
        assert_eq!(ConnectedTransition::Connected.message(), "Device connected");
        assert_eq!(
            ConnectedTransition::Disconnected.message(),
            "Device disconnected"
        );
    }
}

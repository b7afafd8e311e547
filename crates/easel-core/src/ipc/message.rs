//! Message and envelope types
//!
//! A [`Message`] is what a caller hands to the router. An [`Envelope`] is
//! what actually travels over a [`MessagePort`](super::MessagePort) to a
//! destination, including the session id for request/reply forms.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::error::IpcError;

/// Private key marking a trailing wire argument as routing options
pub const OPTIONS_MARKER: &str = "__easel_ipc_options__";

/// Identifier of a renderer window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(pub u32);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "window-{}", self.0)
    }
}

/// Identifier of a panel hosted by some window
pub type PanelId = String;

/// A concrete process a message can be posted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum Endpoint {
    /// The coordinating main process
    Main,
    /// A renderer window
    Window(WindowId),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Main => write!(f, "main"),
            Endpoint::Window(id) => write!(f, "{id}"),
        }
    }
}

/// Logical addressing of a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Main,
    Window(WindowId),
    Panel(PanelId),
    AllWindows,
    AllExcludingSelf,
    All,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Main => write!(f, "main"),
            Address::Window(id) => write!(f, "{id}"),
            Address::Panel(id) => write!(f, "panel:{id}"),
            Address::AllWindows => write!(f, "all-windows"),
            Address::AllExcludingSelf => write!(f, "all-excluding-self"),
            Address::All => write!(f, "all"),
        }
    }
}

/// Per-send routing options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Reply timeout; the router's default applies when unset
    pub timeout: Option<Duration>,
    /// Skip the sending endpoint when fanning out
    pub exclude_self: bool,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout_ms(self, millis: u64) -> Self {
        self.timeout(Duration::from_millis(millis))
    }

    pub fn exclude_self(mut self) -> Self {
        self.exclude_self = true;
        self
    }

    /// Encode as the marked trailing argument understood by [`split_wire_args`]
    pub fn to_wire(&self, wait_for_reply: bool) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert(OPTIONS_MARKER.to_string(), Value::Bool(true));
        obj.insert("excludeSelf".to_string(), Value::Bool(self.exclude_self));
        obj.insert("waitForReply".to_string(), Value::Bool(wait_for_reply));
        if let Some(timeout) = self.timeout {
            obj.insert("timeout".to_string(), Value::from(timeout.as_millis() as u64));
        }
        Value::Object(obj)
    }
}

/// Options recovered from a wire argument list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireOptions {
    pub options: SendOptions,
    pub wait_for_reply: bool,
}

/// Split a trailing marked options object off a raw argument list
///
/// Objects without the marker are ordinary payload and stay in place.
pub fn split_wire_args(mut args: Vec<Value>) -> (Vec<Value>, Option<WireOptions>) {
    let is_options = args
        .last()
        .and_then(|v| v.get(OPTIONS_MARKER))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !is_options {
        return (args, None);
    }

    let Some(raw) = args.pop() else {
        return (args, None);
    };
    let flag = |key: &str| raw.get(key).and_then(Value::as_bool).unwrap_or(false);

    let options = SendOptions {
        timeout: raw
            .get("timeout")
            .and_then(Value::as_u64)
            .map(Duration::from_millis),
        exclude_self: flag("excludeSelf"),
    };
    let wire = WireOptions {
        options,
        wait_for_reply: flag("waitForReply"),
    };
    (args, Some(wire))
}

/// A message as constructed by a caller
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub channel: String,
    pub args: Vec<Value>,
    pub address: Address,
    pub options: SendOptions,
}

impl Message {
    pub fn new(channel: impl Into<String>, address: Address) -> Self {
        Self {
            channel: channel.into(),
            args: Vec::new(),
            address,
            options: SendOptions::default(),
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn with_options(mut self, options: SendOptions) -> Self {
        self.options = options;
        self
    }
}

/// What an envelope carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EnvelopeKind {
    /// Fire-and-forget
    Send,
    /// Expects a reply correlated by `session_id`
    Request { session_id: u64 },
    /// Answer to an earlier request
    Reply {
        session_id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<IpcError>,
    },
}

/// Serialized unit delivered to a single destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub channel: String,
    #[serde(default)]
    pub args: Vec<Value>,
    pub sender: Endpoint,
    /// Target panel when the message was panel-addressed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panel: Option<PanelId>,
    #[serde(flatten)]
    pub kind: EnvelopeKind,
}

impl Envelope {
    pub fn session_id(&self) -> Option<u64> {
        match self.kind {
            EnvelopeKind::Send => None,
            EnvelopeKind::Request { session_id } | EnvelopeKind::Reply { session_id, .. } => {
                Some(session_id)
            }
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self.kind, EnvelopeKind::Request { .. })
    }
}

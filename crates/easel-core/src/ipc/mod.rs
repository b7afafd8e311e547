//! Cross-process messaging
//!
//! - `message`: addressing, send options and the wire envelope
//! - `session`: request/reply correlation with timeouts
//! - `registry`: live windows, panel hosting and message ports
//! - `router`: address resolution, fan-out and reply delivery
//! - `dispatch`: inbound listener tables and the inbox loop

pub mod dispatch;
pub mod message;
pub mod registry;
pub mod router;
pub mod session;

pub use dispatch::{Dispatcher, Incoming, Replier};
pub use message::{
    split_wire_args, Address, Endpoint, Envelope, EnvelopeKind, Message, PanelId, SendOptions,
    WindowId, WireOptions,
};
pub use registry::{ChannelPort, MessagePort, TransportError, WindowRegistry};
pub use router::{RawSend, Router};
pub use session::{ReplyCallback, ReplyResult, SessionRegistry};

//! Event Sink Trait
//!
//! This module provides the EventSink trait for decoupling notification
//! fan-out from the transport. The selection, undo and package services
//! publish through it; a process wires in its [`Router`], a local-only
//! instance wires in [`NoOpEventSink`], the CLI prints to stdout and tests
//! record into memory.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::ipc::{Address, Message, Router};

/// Event sink for publishing notifications
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publish `args` on `channel` to everything `address` resolves to
    async fn emit(&self, address: Address, channel: &str, args: Vec<Value>) -> Result<(), String>;
}

#[async_trait]
impl EventSink for Router {
    async fn emit(&self, address: Address, channel: &str, args: Vec<Value>) -> Result<(), String> {
        self.send(Message::new(channel, address).with_args(args))
            .await;
        Ok(())
    }
}

/// No-op event sink for local-only services
#[derive(Default, Clone)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(
        &self,
        _address: Address,
        _channel: &str,
        _args: Vec<Value>,
    ) -> Result<(), String> {
        Ok(())
    }
}

/// Stdout event sink for CLI mode - prints events to console
#[derive(Default, Clone)]
pub struct StdoutEventSink {
    /// Whether to print in JSON format
    pub json_output: bool,
}

impl StdoutEventSink {
    pub fn new(json_output: bool) -> Self {
        Self { json_output }
    }
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    event: &'a str,
    to: String,
    args: &'a [Value],
}

#[async_trait]
impl EventSink for StdoutEventSink {
    async fn emit(&self, address: Address, channel: &str, args: Vec<Value>) -> Result<(), String> {
        if self.json_output {
            let line = serde_json::to_string(&JsonEvent {
                event: channel,
                to: address.to_string(),
                args: &args,
            })
            .map_err(|e| e.to_string())?;
            println!("{line}");
        } else {
            println!("{}", text_line(channel, &args));
        }
        Ok(())
    }
}

/// A notification captured by [`MemoryEventSink`]
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedEvent {
    pub address: Address,
    pub channel: String,
    pub args: Vec<Value>,
}

/// Records every emitted event; used as a message spy
#[derive(Default, Clone)]
pub struct MemoryEventSink {
    events: Arc<Mutex<Vec<EmittedEvent>>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<EmittedEvent> {
        self.events.lock().await.clone()
    }

    /// Channels in emission order
    pub async fn channels(&self) -> Vec<String> {
        self.events
            .lock()
            .await
            .iter()
            .map(|e| e.channel.clone())
            .collect()
    }

    /// Take and clear everything recorded so far
    pub async fn take(&self) -> Vec<EmittedEvent> {
        std::mem::take(&mut *self.events.lock().await)
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn emit(&self, address: Address, channel: &str, args: Vec<Value>) -> Result<(), String> {
        self.events.lock().await.push(EmittedEvent {
            address,
            channel: channel.to_string(),
            args,
        });
        Ok(())
    }
}

/// `[HH:MM:SS.mmm] channel arg arg ...` in local time
fn text_line(channel: &str, args: &[Value]) -> String {
    let rendered: Vec<String> = args.iter().map(Value::to_string).collect();
    format!(
        "[{}] {} {}",
        chrono::Local::now().format("%H:%M:%S%.3f"),
        channel,
        rendered.join(" ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::{ChannelPort, Endpoint, SessionRegistry, WindowId, WindowRegistry};
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_noop_sink() {
        let sink = NoOpEventSink;
        assert!(sink
            .emit(Address::All, "package:loaded", vec![json!("a")])
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_memory_sink_records_in_order() {
        let sink = MemoryEventSink::new();
        sink.emit(Address::All, "a", vec![]).await.unwrap();
        sink.emit(Address::AllWindows, "b", vec![json!(1)]).await.unwrap();

        assert_eq!(sink.channels().await, vec!["a", "b"]);
        let taken = sink.take().await;
        assert_eq!(taken[1].address, Address::AllWindows);
        assert_eq!(taken[1].args, vec![json!(1)]);
        assert!(sink.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_router_sink_posts_messages() {
        let (main, _main_rx) = ChannelPort::pair("main");
        let (window, mut window_rx) = ChannelPort::pair("w1");
        let registry = Arc::new(WindowRegistry::new(main));
        registry.add_window(WindowId(1), window).await;
        let router = Router::new(
            Endpoint::Main,
            registry,
            SessionRegistry::new(),
            Duration::from_secs(1),
        );

        router
            .emit(Address::AllWindows, "package:loaded", vec![json!("core")])
            .await
            .unwrap();
        let envelope = window_rx.recv().await.unwrap();
        assert_eq!(envelope.channel, "package:loaded");
        assert_eq!(envelope.args, vec![json!("core")]);
    }

    #[test]
    fn test_text_line() {
        let line = text_line("package:loaded", &[json!("demo"), json!(2)]);
        let (stamp, rest) = line.split_once(' ').unwrap();
        assert_eq!(stamp.len(), "[00:00:00.000]".len());
        assert!(stamp.starts_with('[') && stamp.ends_with(']'));
        assert_eq!(rest, r#"package:loaded "demo" 2"#);
    }
}

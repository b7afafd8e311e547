//! Transport router
//!
//! Resolves a [`Message`]'s address to concrete endpoints using the
//! [`WindowRegistry`] and posts one [`Envelope`] per endpoint. Request forms
//! open a session first; replies travel back as `Reply` envelopes.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::message::{
    split_wire_args, Address, Endpoint, Envelope, EnvelopeKind, Message, PanelId,
};
use super::registry::{MessagePort, WindowRegistry};
use super::session::{ReplyResult, SessionRegistry};
use crate::error::IpcError;

struct Target {
    endpoint: Endpoint,
    port: Arc<dyn MessagePort>,
}

/// Outcome of [`Router::send_raw`]
#[derive(Debug, Clone, PartialEq)]
pub enum RawSend {
    /// Fire-and-forget; number of endpoints posted to
    Sent(usize),
    /// Request form; the reply or error
    Replied(ReplyResult),
}

/// Per-process message router
pub struct Router {
    origin: Endpoint,
    registry: Arc<WindowRegistry>,
    sessions: SessionRegistry,
    default_timeout: Duration,
}

impl Router {
    pub fn new(
        origin: Endpoint,
        registry: Arc<WindowRegistry>,
        sessions: SessionRegistry,
        default_timeout: Duration,
    ) -> Self {
        Self {
            origin,
            registry,
            sessions,
            default_timeout,
        }
    }

    /// The endpoint this router sends as
    pub fn origin(&self) -> Endpoint {
        self.origin
    }

    pub fn registry(&self) -> &Arc<WindowRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    async fn targets(
        &self,
        address: &Address,
        exclude_self: bool,
    ) -> Result<(Vec<Target>, Option<PanelId>), IpcError> {
        let main = || Target {
            endpoint: Endpoint::Main,
            port: self.registry.main_port(),
        };
        let windows = || async {
            self.registry
                .live_windows()
                .await
                .into_iter()
                .map(|(id, port)| Target {
                    endpoint: Endpoint::Window(id),
                    port,
                })
                .collect::<Vec<_>>()
        };

        let mut exclude_self = exclude_self;
        let mut panel = None;
        let mut targets = match address {
            Address::Main => vec![main()],
            Address::Window(id) => {
                let endpoint = Endpoint::Window(*id);
                match self.registry.port_of(endpoint).await {
                    Some(port) => vec![Target { endpoint, port }],
                    None => Vec::new(),
                }
            }
            Address::Panel(id) => {
                let host = self
                    .registry
                    .host_of(id)
                    .await
                    .ok_or_else(|| IpcError::NoPanel { panel: id.clone() })?;
                let endpoint = Endpoint::Window(host);
                let port = self
                    .registry
                    .port_of(endpoint)
                    .await
                    .ok_or_else(|| IpcError::NoPanel { panel: id.clone() })?;
                panel = Some(id.clone());
                vec![Target { endpoint, port }]
            }
            Address::AllWindows => windows().await,
            Address::AllExcludingSelf => {
                exclude_self = true;
                let mut all = vec![main()];
                all.extend(windows().await);
                all
            }
            Address::All => {
                let mut all = vec![main()];
                all.extend(windows().await);
                all
            }
        };

        if exclude_self {
            targets.retain(|t| t.endpoint != self.origin);
        }
        Ok((targets, panel))
    }

    async fn post_all(&self, targets: Vec<Target>, envelope: Envelope) -> usize {
        let mut delivered = 0;
        for target in targets {
            match target.port.post(envelope.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    "Failed to deliver '{}' to {}: {}",
                    envelope.channel, target.endpoint, e
                ),
            }
        }
        delivered
    }

    /// Fire-and-forget send; returns the number of endpoints posted to
    pub async fn send(&self, message: Message) -> usize {
        let (targets, panel) = match self
            .targets(&message.address, message.options.exclude_self)
            .await
        {
            Ok(resolved) => resolved,
            Err(e) => {
                debug!("Dropping '{}' to {}: {}", message.channel, message.address, e);
                return 0;
            }
        };

        let envelope = Envelope {
            channel: message.channel,
            args: message.args,
            sender: self.origin,
            panel,
            kind: EnvelopeKind::Send,
        };
        self.post_all(targets, envelope).await
    }

    /// Send with options encoded as a trailing marked argument
    ///
    /// A `waitForReply` option turns the send into a request and awaits it.
    pub async fn send_raw(&self, channel: &str, address: Address, args: Vec<Value>) -> RawSend {
        let (args, wire) = split_wire_args(args);
        let wait_for_reply = wire.map(|w| w.wait_for_reply).unwrap_or(false);
        let options = wire.map(|w| w.options).unwrap_or_default();
        let message = Message::new(channel, address)
            .with_args(args)
            .with_options(options);
        if wait_for_reply {
            RawSend::Replied(self.request_async(message).await)
        } else {
            RawSend::Sent(self.send(message).await)
        }
    }

    /// Send a request; `on_reply` runs exactly once with the reply or error
    ///
    /// Returns the session id, or `None` when routing failed up front (the
    /// callback has already run in that case). Multi-endpoint requests settle
    /// on the first reply.
    pub async fn request<F>(&self, message: Message, on_reply: F) -> Option<u64>
    where
        F: FnOnce(ReplyResult) + Send + 'static,
    {
        let timeout = message.options.timeout.unwrap_or(self.default_timeout);
        let (targets, panel) = match self
            .targets(&message.address, message.options.exclude_self)
            .await
        {
            Ok(resolved) => resolved,
            Err(e) => {
                debug!("Request '{}' failed: {}", message.channel, e);
                on_reply(Err(e));
                return None;
            }
        };

        let session_id = self
            .sessions
            .open(&message.channel, timeout, Box::new(on_reply))
            .await;

        let envelope = Envelope {
            channel: message.channel,
            args: message.args,
            sender: self.origin,
            panel,
            kind: EnvelopeKind::Request { session_id },
        };
        let channel = envelope.channel.clone();
        if self.post_all(targets, envelope).await == 0 {
            debug!(
                "No live destination for '{}'; session {} will time out",
                channel, session_id
            );
        }
        Some(session_id)
    }

    /// Send a request and await the outcome
    pub async fn request_async(&self, message: Message) -> ReplyResult {
        let channel = message.channel.clone();
        let timeout = message.options.timeout.unwrap_or(self.default_timeout);
        let (tx, rx) = oneshot::channel();

        let session_id = self
            .request(message, move |result| {
                let _ = tx.send(result);
            })
            .await;

        rx.await.unwrap_or_else(|_| {
            Err(IpcError::Timeout {
                channel,
                session_id: session_id.unwrap_or_default(),
                timeout_ms: timeout.as_millis() as u64,
            })
        })
    }

    /// Answer a request received from `to`
    pub async fn reply(
        &self,
        to: Endpoint,
        channel: &str,
        session_id: u64,
        result: ReplyResult,
    ) -> bool {
        if to == self.origin {
            return self.sessions.resolve(session_id, result).await;
        }

        let Some(port) = self.registry.port_of(to).await else {
            debug!("Reply to '{}' dropped: {} is gone", channel, to);
            return false;
        };

        let (args, error) = match result {
            Ok(values) => (values, None),
            Err(e) => (Vec::new(), Some(e)),
        };
        let envelope = Envelope {
            channel: channel.to_string(),
            args,
            sender: self.origin,
            panel: None,
            kind: EnvelopeKind::Reply { session_id, error },
        };

        match port.post(envelope).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to reply to {}: {}", to, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::message::{SendOptions, WindowId};
    use crate::ipc::registry::ChannelPort;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Harness {
        registry: Arc<WindowRegistry>,
        main_rx: UnboundedReceiver<Envelope>,
        window_rx: Vec<UnboundedReceiver<Envelope>>,
    }

    impl Harness {
        async fn new(windows: u32) -> Self {
            let (main, main_rx) = ChannelPort::pair("main");
            let registry = Arc::new(WindowRegistry::new(main));
            let mut window_rx = Vec::new();
            for i in 1..=windows {
                let (port, rx) = ChannelPort::pair(&format!("w{i}"));
                registry.add_window(WindowId(i), port).await;
                window_rx.push(rx);
            }
            Self {
                registry,
                main_rx,
                window_rx,
            }
        }

        fn router(&self, origin: Endpoint) -> Router {
            Router::new(
                origin,
                self.registry.clone(),
                SessionRegistry::new(),
                Duration::from_secs(5),
            )
        }
    }

    fn drain(rx: &mut UnboundedReceiver<Envelope>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            out.push(envelope.channel);
        }
        out
    }

    #[tokio::test]
    async fn test_fifo_per_destination() {
        let mut h = Harness::new(1).await;
        let router = h.router(Endpoint::Main);

        for i in 0..50 {
            let message = Message::new(format!("m{i}"), Address::Window(WindowId(1)));
            assert_eq!(router.send(message).await, 1);
        }

        let expected: Vec<String> = (0..50).map(|i| format!("m{i}")).collect();
        assert_eq!(drain(&mut h.window_rx[0]), expected);
    }

    #[tokio::test]
    async fn test_all_windows_skips_dead() {
        let mut h = Harness::new(3).await;
        h.registry.close_window(WindowId(2)).await;
        let router = h.router(Endpoint::Main);

        let sent = router
            .send(Message::new("asset:changed", Address::AllWindows).arg("uuid"))
            .await;
        assert_eq!(sent, 2);
        assert_eq!(drain(&mut h.window_rx[0]), vec!["asset:changed"]);
        assert!(drain(&mut h.window_rx[1]).is_empty());
        assert_eq!(drain(&mut h.window_rx[2]), vec!["asset:changed"]);
        assert!(drain(&mut h.main_rx).is_empty());
    }

    #[tokio::test]
    async fn test_all_excluding_self() {
        let mut h = Harness::new(3).await;
        let router = h.router(Endpoint::Window(WindowId(2)));

        let sent = router
            .send(Message::new("scene:saved", Address::AllExcludingSelf))
            .await;
        assert_eq!(sent, 3);
        assert_eq!(drain(&mut h.main_rx), vec!["scene:saved"]);
        assert_eq!(drain(&mut h.window_rx[0]), vec!["scene:saved"]);
        assert!(drain(&mut h.window_rx[1]).is_empty());
        assert_eq!(drain(&mut h.window_rx[2]), vec!["scene:saved"]);
    }

    #[tokio::test]
    async fn test_all_with_exclude_self_option() {
        let mut h = Harness::new(2).await;
        let router = h.router(Endpoint::Main);

        let everyone = router.send(Message::new("a", Address::All)).await;
        let others = router
            .send(Message::new("b", Address::All).with_options(SendOptions::new().exclude_self()))
            .await;
        assert_eq!(everyone, 3);
        assert_eq!(others, 2);
        assert_eq!(drain(&mut h.main_rx), vec!["a"]);
        assert_eq!(drain(&mut h.window_rx[0]), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_send_raw_strips_options() {
        let mut h = Harness::new(1).await;
        let router = h.router(Endpoint::Window(WindowId(1)));
        let options = SendOptions::new().exclude_self().to_wire(false);

        let sent = router
            .send_raw("log:info", Address::All, vec![json!("hello"), options])
            .await;
        assert_eq!(sent, RawSend::Sent(1));
        let envelope = h.main_rx.try_recv().unwrap();
        assert_eq!(envelope.args, vec![json!("hello")]);
        assert!(h.window_rx[0].try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_raw_waits_for_reply_when_asked() {
        let mut h = Harness::new(0).await;
        let router = Arc::new(h.router(Endpoint::Main));

        let answering = router.clone();
        let answer = tokio::spawn(async move {
            let envelope = h.main_rx.recv().await.unwrap();
            assert_eq!(envelope.args, vec![json!(20)]);
            let session_id = envelope.session_id().unwrap();
            answering
                .reply(envelope.sender, &envelope.channel, session_id, Ok(vec![json!(21)]))
                .await
        });

        let options = SendOptions::new().to_wire(true);
        let outcome = router
            .send_raw("count:next", Address::Main, vec![json!(20), options])
            .await;
        assert_eq!(outcome, RawSend::Replied(Ok(vec![json!(21)])));
        assert!(answer.await.unwrap());
    }

    #[tokio::test]
    async fn test_panel_routing() {
        let mut h = Harness::new(2).await;
        h.registry.attach_panel("inspector", WindowId(2)).await;
        let router = h.router(Endpoint::Main);

        let sent = router
            .send(Message::new("inspector:refresh", Address::Panel("inspector".into())))
            .await;
        assert_eq!(sent, 1);
        let envelope = h.window_rx[1].try_recv().unwrap();
        assert_eq!(envelope.panel.as_deref(), Some("inspector"));
        assert!(h.window_rx[0].try_recv().is_err());
    }

    #[tokio::test]
    async fn test_missing_panel() {
        let h = Harness::new(1).await;
        let router = h.router(Endpoint::Main);

        let sent = router
            .send(Message::new("x", Address::Panel("ghost".into())))
            .await;
        assert_eq!(sent, 0);

        let calls = Arc::new(StdMutex::new(Vec::new()));
        let sink = calls.clone();
        let session = router
            .request(Message::new("x", Address::Panel("ghost".into())), move |r| {
                sink.lock().unwrap().push(r)
            })
            .await;

        assert!(session.is_none());
        assert_eq!(router.sessions().pending_count().await, 0);
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].as_ref().unwrap_err().code(), "ENOPANEL");
    }

    #[tokio::test]
    async fn test_request_carries_session_and_reply_resolves() {
        let mut h = Harness::new(1).await;
        let main = h.router(Endpoint::Main);
        let window = h.router(Endpoint::Window(WindowId(1)));

        let calls = Arc::new(StdMutex::new(Vec::new()));
        let sink = calls.clone();
        let session = main
            .request(Message::new("scene:query", Address::Window(WindowId(1))), move |r| {
                sink.lock().unwrap().push(r)
            })
            .await
            .unwrap();
        assert_eq!(session, 1000);

        let request = h.window_rx[0].try_recv().unwrap();
        assert_eq!(request.kind, EnvelopeKind::Request { session_id: 1000 });
        assert_eq!(request.sender, Endpoint::Main);

        assert!(
            window
                .reply(request.sender, &request.channel, session, Ok(vec![json!(7)]))
                .await
        );
        let reply = h.main_rx.try_recv().unwrap();
        assert_eq!(reply.args, vec![json!(7)]);

        assert!(main.sessions().resolve(session, Ok(reply.args)).await);
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reply_to_self_resolves_locally() {
        let h = Harness::new(0).await;
        let main = h.router(Endpoint::Main);

        let rx = {
            let (tx, rx) = oneshot::channel();
            let session = main
                .request(Message::new("ping", Address::Main), move |r| {
                    let _ = tx.send(r);
                })
                .await
                .unwrap();
            assert!(main.reply(Endpoint::Main, "ping", session, Ok(vec![json!("pong")])).await);
            rx
        };
        assert_eq!(rx.await.unwrap().unwrap(), vec![json!("pong")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_to_dead_window_times_out() {
        let h = Harness::new(1).await;
        h.registry.close_window(WindowId(1)).await;
        let router = h.router(Endpoint::Main);

        let result = router
            .request_async(
                Message::new("scene:query", Address::Window(WindowId(1)))
                    .with_options(SendOptions::new().timeout_ms(50)),
            )
            .await;
        assert_eq!(result.unwrap_err().code(), "ETIMEOUT");
    }
}

//! Inbound dispatch
//!
//! Drains a process inbox, hands `Send`/`Request` envelopes to listeners
//! registered by channel (process-wide or per panel), and settles local
//! sessions when `Reply` envelopes arrive. Listeners run one envelope at a
//! time, so they observe each sender's messages in posting order.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::message::{split_wire_args, Endpoint, Envelope, EnvelopeKind, PanelId};
use super::router::Router;
use crate::error::IpcError;

type Handler = Arc<dyn Fn(Incoming) -> BoxFuture<'static, ()> + Send + Sync>;

/// Answers one request; only the first reply is delivered
#[derive(Clone)]
pub struct Replier {
    router: Arc<Router>,
    to: Endpoint,
    channel: String,
    session_id: u64,
    replied: Arc<AtomicBool>,
}

impl Replier {
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Reply with values; false if a reply was already sent
    pub async fn reply(&self, values: Vec<Value>) -> bool {
        self.settle(Ok(values)).await
    }

    /// Reply with an error; false if a reply was already sent
    pub async fn reply_error(&self, error: IpcError) -> bool {
        self.settle(Err(error)).await
    }

    pub fn has_replied(&self) -> bool {
        self.replied.load(Ordering::SeqCst)
    }

    async fn settle(&self, result: Result<Vec<Value>, IpcError>) -> bool {
        if self.replied.swap(true, Ordering::SeqCst) {
            debug!("Ignoring second reply to session {}", self.session_id);
            return false;
        }
        self.router
            .reply(self.to, &self.channel, self.session_id, result)
            .await
    }
}

/// A message as seen by a listener
#[derive(Clone)]
pub struct Incoming {
    pub channel: String,
    pub args: Vec<Value>,
    pub sender: Endpoint,
    pub panel: Option<PanelId>,
    /// Present for requests
    pub replier: Option<Replier>,
}

/// Listener table and inbox loop for one process
pub struct Dispatcher {
    router: Arc<Router>,
    listeners: RwLock<HashMap<String, Vec<Handler>>>,
    panels: RwLock<HashMap<PanelId, HashMap<String, Vec<Handler>>>>,
}

fn wrap<F, Fut>(f: F) -> Handler
where
    F: Fn(Incoming) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |incoming| f(incoming).boxed())
}

impl Dispatcher {
    pub fn new(router: Arc<Router>) -> Self {
        Self {
            router,
            listeners: RwLock::new(HashMap::new()),
            panels: RwLock::new(HashMap::new()),
        }
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Listen on a channel; listeners run in registration order
    pub async fn on<F, Fut>(&self, channel: &str, f: F)
    where
        F: Fn(Incoming) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.listeners
            .write()
            .await
            .entry(channel.to_string())
            .or_default()
            .push(wrap(f));
    }

    /// Remove every listener for a channel
    pub async fn off(&self, channel: &str) -> bool {
        self.listeners.write().await.remove(channel).is_some()
    }

    /// Listen on a channel within a panel hosted by this process
    pub async fn on_panel<F, Fut>(&self, panel: &str, channel: &str, f: F)
    where
        F: Fn(Incoming) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.panels
            .write()
            .await
            .entry(panel.to_string())
            .or_default()
            .entry(channel.to_string())
            .or_default()
            .push(wrap(f));
    }

    /// Drop a panel's listener table
    pub async fn remove_panel(&self, panel: &str) -> bool {
        self.panels.write().await.remove(panel).is_some()
    }

    /// Handle one inbound envelope
    pub async fn dispatch(&self, envelope: Envelope) {
        let session_id = match envelope.kind {
            EnvelopeKind::Reply { session_id, error } => {
                let result = match error {
                    Some(e) => Err(e),
                    None => Ok(envelope.args),
                };
                self.router.sessions().resolve(session_id, result).await;
                return;
            }
            EnvelopeKind::Request { session_id } => Some(session_id),
            EnvelopeKind::Send => None,
        };

        let replier = session_id.map(|session_id| Replier {
            router: self.router.clone(),
            to: envelope.sender,
            channel: envelope.channel.clone(),
            session_id,
            replied: Arc::new(AtomicBool::new(false)),
        });

        let handlers = match &envelope.panel {
            Some(panel) => {
                let panels = self.panels.read().await;
                match panels.get(panel) {
                    None => Err(IpcError::NoPanel {
                        panel: panel.clone(),
                    }),
                    Some(table) => table.get(&envelope.channel).cloned().ok_or_else(|| {
                        IpcError::NoMsg {
                            channel: envelope.channel.clone(),
                            panel: panel.clone(),
                        }
                    }),
                }
            }
            None => Ok(self
                .listeners
                .read()
                .await
                .get(&envelope.channel)
                .cloned()
                .unwrap_or_default()),
        };

        let handlers = match handlers {
            Ok(handlers) => handlers,
            Err(e) => {
                debug!("Cannot deliver '{}': {}", envelope.channel, e);
                if let Some(replier) = &replier {
                    replier.reply_error(e).await;
                }
                return;
            }
        };

        if handlers.is_empty() {
            debug!("No listener for '{}' from {}", envelope.channel, envelope.sender);
            return;
        }

        let (args, _) = split_wire_args(envelope.args);
        let incoming = Incoming {
            channel: envelope.channel,
            args,
            sender: envelope.sender,
            panel: envelope.panel,
            replier,
        };
        for handler in handlers {
            handler(incoming.clone()).await;
        }
    }

    /// Drain `inbox` until every sender is dropped
    ///
    /// Replies settle as soon as they arrive; everything else is queued for a
    /// second task that runs listeners in arrival order. A listener can then
    /// await a request of its own without starving the reply.
    pub fn spawn(self: Arc<Self>, mut inbox: mpsc::UnboundedReceiver<Envelope>) -> JoinHandle<()> {
        let (queue, mut queued) = mpsc::unbounded_channel::<Envelope>();
        let dispatcher = self.clone();
        let listeners = tokio::spawn(async move {
            while let Some(envelope) = queued.recv().await {
                dispatcher.dispatch(envelope).await;
            }
        });

        tokio::spawn(async move {
            while let Some(envelope) = inbox.recv().await {
                if matches!(envelope.kind, EnvelopeKind::Reply { .. }) {
                    self.dispatch(envelope).await;
                } else if queue.send(envelope).is_err() {
                    break;
                }
            }
            drop(queue);
            let _ = listeners.await;
            info!("Inbox for {} closed", self.router.origin());
        })
    }
}

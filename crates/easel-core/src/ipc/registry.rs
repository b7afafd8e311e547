//! Window/panel registry and message ports
//!
//! The registry is owned by the GUI layer: it knows which windows are alive
//! and which window currently hosts each panel. The router only reads it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use super::message::{Endpoint, Envelope, PanelId, WindowId};

/// Errors that can occur while posting to a port
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Port closed: {0}")]
    PortClosed(String),
}

/// Capability to deliver an envelope to one destination process
///
/// Implementations must preserve the order of `post` calls.
#[async_trait]
pub trait MessagePort: Send + Sync {
    async fn post(&self, envelope: Envelope) -> Result<(), TransportError>;
}

/// In-process port backed by an unbounded channel
pub struct ChannelPort {
    label: String,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl ChannelPort {
    /// Create a port and the inbox it feeds
    pub fn pair(label: &str) -> (Arc<Self>, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let port = Arc::new(Self {
            label: label.to_string(),
            tx,
        });
        (port, rx)
    }
}

#[async_trait]
impl MessagePort for ChannelPort {
    async fn post(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.tx
            .send(envelope)
            .map_err(|_| TransportError::PortClosed(self.label.clone()))
    }
}

/// Registered window
#[derive(Clone)]
pub struct WindowEntry {
    pub id: WindowId,
    pub port: Arc<dyn MessagePort>,
    pub alive: bool,
}

#[derive(Default)]
struct RegistryInner {
    /// Insertion order is the broadcast order
    windows: Vec<WindowEntry>,
    panels: HashMap<PanelId, WindowId>,
}

impl RegistryInner {
    fn live(&self, id: WindowId) -> Option<&WindowEntry> {
        self.windows.iter().find(|w| w.id == id && w.alive)
    }
}

/// Registry of live windows and the panels they host
pub struct WindowRegistry {
    main: Arc<dyn MessagePort>,
    inner: RwLock<RegistryInner>,
}

impl WindowRegistry {
    pub fn new(main: Arc<dyn MessagePort>) -> Self {
        Self {
            main,
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    pub fn main_port(&self) -> Arc<dyn MessagePort> {
        self.main.clone()
    }

    /// Register a window, or revive it in place if the id is known
    pub async fn add_window(&self, id: WindowId, port: Arc<dyn MessagePort>) {
        let mut inner = self.inner.write().await;
        match inner.windows.iter().position(|w| w.id == id) {
            Some(index) => {
                let entry = &mut inner.windows[index];
                entry.port = port;
                entry.alive = true;
            }
            None => inner.windows.push(WindowEntry {
                id,
                port,
                alive: true,
            }),
        }
        info!("Registered {}", id);
    }

    /// Mark a window dead and detach its panels
    pub async fn close_window(&self, id: WindowId) -> bool {
        let mut inner = self.inner.write().await;
        let Some(index) = inner.windows.iter().position(|w| w.id == id && w.alive) else {
            return false;
        };
        inner.windows[index].alive = false;
        inner.panels.retain(|_, host| *host != id);
        info!("Closed {}", id);
        true
    }

    /// Record that `window` hosts `panel`; fails if the window isn't alive
    pub async fn attach_panel(&self, panel: &str, window: WindowId) -> bool {
        let mut inner = self.inner.write().await;
        if inner.live(window).is_none() {
            debug!("Cannot attach panel {} to dead {}", panel, window);
            return false;
        }
        inner.panels.insert(panel.to_string(), window);
        true
    }

    pub async fn detach_panel(&self, panel: &str) -> Option<WindowId> {
        self.inner.write().await.panels.remove(panel)
    }

    /// Window currently hosting `panel`, if it is alive
    pub async fn host_of(&self, panel: &str) -> Option<WindowId> {
        let inner = self.inner.read().await;
        let host = *inner.panels.get(panel)?;
        inner.live(host).map(|w| w.id)
    }

    pub async fn is_alive(&self, id: WindowId) -> bool {
        self.inner.read().await.live(id).is_some()
    }

    /// Port for an endpoint, `None` for dead or unknown windows
    pub async fn port_of(&self, endpoint: Endpoint) -> Option<Arc<dyn MessagePort>> {
        match endpoint {
            Endpoint::Main => Some(self.main.clone()),
            Endpoint::Window(id) => self.inner.read().await.live(id).map(|w| w.port.clone()),
        }
    }

    /// Live windows in registration order
    pub async fn live_windows(&self) -> Vec<(WindowId, Arc<dyn MessagePort>)> {
        self.inner
            .read()
            .await
            .windows
            .iter()
            .filter(|w| w.alive)
            .map(|w| (w.id, w.port.clone()))
            .collect()
    }
}

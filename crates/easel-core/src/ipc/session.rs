//! Request/reply session registry
//!
//! Every request allocates a session id from a monotonic counter and parks
//! its reply callback here together with a timeout task. Whichever of
//! "reply arrives" and "timeout fires" happens first removes the entry, so
//! the callback runs at most once.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::defaults::DEFAULT_SESSION_SEED;
use crate::error::IpcError;

/// Outcome delivered to a reply callback
pub type ReplyResult = Result<Vec<Value>, IpcError>;

/// Callback invoked once with the reply or the failure
pub type ReplyCallback = Box<dyn FnOnce(ReplyResult) + Send + 'static>;

struct PendingSession {
    channel: String,
    callback: ReplyCallback,
    timer: JoinHandle<()>,
    timeout: Duration,
    created_at: Instant,
}

struct SessionTable {
    next_id: u64,
    pending: HashMap<u64, PendingSession>,
}

/// Registry of in-flight requests for one process
///
/// Clone-able; clones share the same table.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Mutex<SessionTable>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SESSION_SEED)
    }

    /// Create a registry whose first session id is `seed`
    pub fn with_seed(seed: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionTable {
                next_id: seed,
                pending: HashMap::new(),
            })),
        }
    }

    /// Park a callback and start its timeout; returns the session id
    pub async fn open(&self, channel: &str, timeout: Duration, callback: ReplyCallback) -> u64 {
        let mut table = self.inner.lock().await;
        let session_id = table.next_id;
        table.next_id += 1;

        // The timer needs the table lock, so it cannot fire before the insert below.
        let registry = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            registry.expire(session_id).await;
        });

        table.pending.insert(
            session_id,
            PendingSession {
                channel: channel.to_string(),
                callback,
                timer,
                timeout,
                created_at: Instant::now(),
            },
        );

        debug!("Opened session {} for '{}'", session_id, channel);
        session_id
    }

    /// Deliver a reply; returns false if the session is unknown or already settled
    pub async fn resolve(&self, session_id: u64, result: ReplyResult) -> bool {
        let Some(session) = self.inner.lock().await.pending.remove(&session_id) else {
            debug!("Dropping reply for settled session {}", session_id);
            return false;
        };

        session.timer.abort();
        debug!(
            "Session {} for '{}' settled after {:?}",
            session_id,
            session.channel,
            session.created_at.elapsed()
        );
        (session.callback)(result);
        true
    }

    async fn expire(&self, session_id: u64) {
        let Some(session) = self.inner.lock().await.pending.remove(&session_id) else {
            return;
        };

        warn!(
            "Session {} for '{}' timed out after {}ms",
            session_id,
            session.channel,
            session.timeout.as_millis()
        );
        (session.callback)(Err(IpcError::Timeout {
            channel: session.channel,
            session_id,
            timeout_ms: session.timeout.as_millis() as u64,
        }));
    }

    pub async fn is_pending(&self, session_id: u64) -> bool {
        self.inner.lock().await.pending.contains_key(&session_id)
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.lock().await.pending.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

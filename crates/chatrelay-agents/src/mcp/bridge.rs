use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use chatrelay_common::{Error, Result};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::tool_bridge::RemoteTool;
use super::transport::{
    CapabilityConnection, CapabilityTransport, RemoteCredentials, RemoteToolInfo,
};
use crate::tools::{Tool, ToolOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Disconnected,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
        }
    }
}

struct Live {
    connection: Arc<dyn CapabilityConnection>,
    tools: Vec<RemoteToolInfo>,
}

#[derive(Default)]
struct Slot {
    live: Option<Live>,
    /// Settle count and message of the most recent failed connect.
    failure: Option<(u64, String)>,
}

/// A connection to the remote capability server for one credential tuple.
///
/// `connect` holds the session's lock for the whole open + discover sequence.
/// Callers queued behind an attempt take its outcome, success or failure,
/// instead of starting their own.
pub struct RemoteSession {
    credentials: RemoteCredentials,
    transport: Arc<dyn CapabilityTransport>,
    state: AtomicU8,
    slot: Mutex<Slot>,
    /// Connect attempts that have finished, successfully or not.
    settled: AtomicU64,
    retired: AtomicBool,
    last_used_ms: AtomicU64,
}

impl RemoteSession {
    fn new(credentials: RemoteCredentials, transport: Arc<dyn CapabilityTransport>) -> Self {
        Self {
            credentials,
            transport,
            state: AtomicU8::new(SessionState::Disconnected.as_u8()),
            slot: Mutex::new(Slot::default()),
            settled: AtomicU64::new(0),
            retired: AtomicBool::new(false),
            last_used_ms: AtomicU64::new(0),
        }
    }

    pub fn credentials(&self) -> &RemoteCredentials {
        &self.credentials
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// True once the pool has dropped this session. A retired session never
    /// reopens.
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Open and discover if not already connected. A no-op on a live session.
    pub async fn connect(&self) -> Result<()> {
        let queued_at = self.settled.load(Ordering::Acquire);
        let mut slot = self.slot.lock().await;
        if self.is_retired() {
            return Err(Error::Mcp("remote session was closed".to_string()));
        }
        if let Some(current) = slot.live.as_ref() {
            if !current.connection.is_closed() {
                return Ok(());
            }
            debug!("remote session transport closed, reconnecting");
            current.connection.close().await;
            slot.live = None;
        }
        if let Some((settled, message)) = &slot.failure
            && *settled > queued_at
        {
            return Err(Error::Mcp(message.clone()));
        }

        self.set_state(SessionState::Connecting);
        let outcome = self.open_and_discover().await;
        let settled = self.settled.fetch_add(1, Ordering::AcqRel) + 1;
        match outcome {
            Ok(opened) => {
                info!(tools = opened.tools.len(), "remote capability session connected");
                slot.live = Some(opened);
                slot.failure = None;
                self.set_state(SessionState::Connected);
                Ok(())
            }
            Err(e) => {
                slot.failure = Some((settled, e.to_string()));
                self.set_state(SessionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn open_and_discover(&self) -> Result<Live> {
        let connection: Arc<dyn CapabilityConnection> =
            Arc::from(self.transport.open(&self.credentials).await?);
        match connection.list_tools().await {
            Ok(tools) => Ok(Live { connection, tools }),
            Err(e) => {
                connection.close().await;
                Err(e)
            }
        }
    }

    /// Cached catalogue from the last successful discovery.
    pub async fn tools(&self) -> Vec<RemoteToolInfo> {
        self.slot
            .lock()
            .await
            .live
            .as_ref()
            .map(|l| l.tools.clone())
            .unwrap_or_default()
    }

    async fn connection(&self) -> Option<Arc<dyn CapabilityConnection>> {
        self.slot
            .lock()
            .await
            .live
            .as_ref()
            .filter(|l| !l.connection.is_closed())
            .map(|l| Arc::clone(&l.connection))
    }

    /// Close the transport. Safe to call when already disconnected.
    pub async fn disconnect(&self) {
        let taken = self.slot.lock().await.live.take();
        self.set_state(SessionState::Disconnected);
        if let Some(live) = taken {
            live.connection.close().await;
            debug!("remote capability session disconnected");
        }
    }
}

/// Pool of remote sessions keyed by credential tuple.
pub struct RemoteCapabilityBridge {
    transport: Option<Arc<dyn CapabilityTransport>>,
    sessions: DashMap<RemoteCredentials, Arc<RemoteSession>>,
    max_sessions: usize,
    call_timeout: Duration,
    epoch: Instant,
}

impl RemoteCapabilityBridge {
    pub fn new(
        transport: Arc<dyn CapabilityTransport>,
        max_sessions: usize,
        call_timeout: Duration,
    ) -> Self {
        Self {
            transport: Some(transport),
            sessions: DashMap::new(),
            max_sessions: max_sessions.max(1),
            call_timeout,
            epoch: Instant::now(),
        }
    }

    /// A bridge with no remote endpoint. It contributes no tools.
    pub fn disabled() -> Self {
        Self {
            transport: None,
            sessions: DashMap::new(),
            max_sessions: 1,
            call_timeout: Duration::from_secs(60),
            epoch: Instant::now(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn touch(&self, session: &RemoteSession) {
        let now = self.epoch.elapsed().as_millis() as u64;
        session.last_used_ms.store(now, Ordering::Relaxed);
    }

    /// Return the connected session for `credentials`, connecting on first use.
    pub async fn ensure_connected(
        &self,
        credentials: &RemoteCredentials,
    ) -> Result<Arc<RemoteSession>> {
        let Some(transport) = &self.transport else {
            return Err(Error::Config(
                "remote capability server is not configured".to_string(),
            ));
        };

        let (session, created) = match self.sessions.entry(credentials.clone()) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => {
                let session = Arc::new(RemoteSession::new(
                    credentials.clone(),
                    Arc::clone(transport),
                ));
                entry.insert(Arc::clone(&session));
                (session, true)
            }
        };
        self.touch(&session);
        if created {
            self.enforce_capacity(credentials).await;
        }

        if let Err(e) = session.connect().await {
            self.sessions
                .remove_if(credentials, |_, existing| Arc::ptr_eq(existing, &session));
            return Err(e);
        }
        Ok(session)
    }

    /// Remote tools for this request. Connect failures degrade to an empty set.
    pub async fn remote_tools(
        self: &Arc<Self>,
        credentials: &RemoteCredentials,
    ) -> Vec<Arc<dyn Tool>> {
        if !self.is_enabled() {
            return Vec::new();
        }
        let session = match self.ensure_connected(credentials).await {
            Ok(session) => session,
            Err(e) => {
                warn!("remote tools unavailable for this request: {e}");
                return Vec::new();
            }
        };

        session
            .tools()
            .await
            .into_iter()
            .map(|info| {
                Arc::new(RemoteTool::new(info, Arc::clone(self), Arc::clone(&session)))
                    as Arc<dyn Tool>
            })
            .collect()
    }

    /// Call a remote tool. Transport and application failures come back as
    /// error content.
    pub async fn invoke(
        &self,
        session: &RemoteSession,
        name: &str,
        arguments: serde_json::Value,
    ) -> ToolOutput {
        if session.is_retired() {
            return ToolOutput::error("remote capability session was closed");
        }
        self.touch(session);
        let connection = match session.connection().await {
            Some(connection) => connection,
            None => {
                if let Err(e) = session.connect().await {
                    return ToolOutput::error(format!(
                        "remote capability server unavailable: {e}"
                    ));
                }
                match session.connection().await {
                    Some(connection) => connection,
                    None => return ToolOutput::error("remote capability server unavailable"),
                }
            }
        };

        match tokio::time::timeout(self.call_timeout, connection.call_tool(name, arguments)).await {
            Ok(Ok(result)) if result.is_error => ToolOutput::error(result.content),
            Ok(Ok(result)) => ToolOutput::success(result.content),
            Ok(Err(e)) => {
                warn!(tool = name, "remote call failed: {e}");
                if connection.is_closed() {
                    session.set_state(SessionState::Disconnected);
                }
                ToolOutput::error(e.to_string())
            }
            Err(_) => {
                warn!(tool = name, "remote call timed out");
                ToolOutput::error(format!(
                    "remote tool '{name}' timed out after {}s",
                    self.call_timeout.as_secs()
                ))
            }
        }
    }

    /// Close and drop the session for `credentials`, if any. Tools still
    /// holding the session report an error from then on.
    pub async fn disconnect(&self, credentials: &RemoteCredentials) {
        if let Some((_, session)) = self.sessions.remove(credentials) {
            session.retired.store(true, Ordering::Release);
            session.disconnect().await;
        }
    }

    pub async fn disconnect_all(&self) {
        let keys: Vec<RemoteCredentials> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.disconnect(&key).await;
        }
        info!("remote capability sessions closed");
    }

    async fn enforce_capacity(&self, keep: &RemoteCredentials) {
        while self.sessions.len() > self.max_sessions {
            let oldest = self
                .sessions
                .iter()
                .filter(|e| e.key() != keep)
                .min_by_key(|e| e.value().last_used_ms.load(Ordering::Relaxed))
                .map(|e| e.key().clone());
            let Some(oldest) = oldest else {
                break;
            };
            debug!("remote session pool full, closing least recently used");
            self.disconnect(&oldest).await;
        }
    }
}

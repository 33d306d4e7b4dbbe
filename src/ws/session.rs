//! Per-connection session state.
//!
//! A [`Session`] is created for every accepted connection and shared (via
//! `Arc`) between the reader loop, handler tasks, the heartbeat monitor
//! and any group broadcasting to it. Groups only hold weak references;
//! the connection's own task owns the session.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use super::heartbeat::HeartbeatState;
use super::messages::{Codec, Message};
use super::transport::{Frame, FrameSink};
use crate::domain::{GroupId, SessionId};
use crate::error::{CodecError, HubError, TransportError};

/// Request data captured at upgrade time.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    /// Request path the connection was upgraded on.
    pub path: String,
    /// Raw query string, if any.
    pub query: Option<String>,
    /// Request headers.
    pub headers: HeaderMap,
}

impl RequestMeta {
    /// Metadata for a connection on `path` with no headers.
    #[must_use]
    pub fn for_path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

/// Session knobs derived from the hub configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Upper bound on one write, lock acquisition included.
    pub send_timeout: Duration,
    /// Heartbeat retry budget, `None` when heartbeat is disabled.
    pub heartbeat_retry_times: Option<u32>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(5),
            heartbeat_retry_times: None,
        }
    }
}

#[derive(Debug)]
struct TimerEntry {
    generation: u64,
    handle: AbortHandle,
}

type TimerRegistry = Arc<Mutex<HashMap<String, TimerEntry>>>;

/// State of one live connection.
pub struct Session {
    id: SessionId,
    request: RequestMeta,
    connected_at: DateTime<Utc>,
    /// Send lock: the transport is not safe for concurrent writers.
    sink: tokio::sync::Mutex<Box<dyn FrameSink>>,
    codec: Arc<dyn Codec>,
    send_timeout: Duration,
    scratch: Mutex<HashMap<String, serde_json::Value>>,
    timers: TimerRegistry,
    timer_generation: AtomicU64,
    heartbeat: HeartbeatState,
    group: Mutex<Option<GroupId>>,
    closed: CancellationToken,
}

impl Session {
    /// Creates a session writing through `sink`.
    #[must_use]
    pub fn new(
        id: SessionId,
        request: RequestMeta,
        sink: Box<dyn FrameSink>,
        codec: Arc<dyn Codec>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            id,
            request,
            connected_at: Utc::now(),
            sink: tokio::sync::Mutex::new(sink),
            codec,
            send_timeout: settings.send_timeout,
            scratch: Mutex::new(HashMap::new()),
            timers: Arc::new(Mutex::new(HashMap::new())),
            timer_generation: AtomicU64::new(0),
            heartbeat: HeartbeatState::new(settings.heartbeat_retry_times),
            group: Mutex::new(None),
            closed: CancellationToken::new(),
        }
    }

    /// Unique, immutable session identifier.
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Upgrade request metadata.
    #[must_use]
    pub fn request(&self) -> &RequestMeta {
        &self.request
    }

    /// When the session was created.
    #[must_use]
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Encodes and sends a message.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Codec`] if encoding fails, otherwise see
    /// [`Session::send_frame`].
    pub async fn send(&self, message: &Message) -> Result<(), HubError> {
        let frame = self.codec.encode(message)?;
        self.send_frame(frame).await
    }

    /// Sends `data` under the routing key `path`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Codec`] if `data` cannot be serialized, otherwise
    /// see [`Session::send_frame`].
    pub async fn emit<T: Serialize + ?Sized>(&self, path: &str, data: &T) -> Result<(), HubError> {
        let data = serde_json::to_value(data).map_err(|e| CodecError::Encode(e.to_string()))?;
        self.send(&Message::new(path, data)).await
    }

    /// Writes a pre-encoded frame while holding the send lock.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Transport`] if the session is closed or the
    /// write fails, and [`HubError::SendTimeout`] if the lock and write did
    /// not complete within the send timeout. The session stays open either
    /// way; retrying or dropping is the caller's decision.
    pub async fn send_frame(&self, frame: Frame) -> Result<(), HubError> {
        if self.is_closed() {
            return Err(TransportError::Closed.into());
        }
        let write = async {
            let mut sink = self.sink.lock().await;
            sink.send_frame(frame).await
        };
        match tokio::time::timeout(self.send_timeout, write).await {
            Ok(result) => result.map_err(HubError::from),
            Err(_elapsed) => Err(HubError::SendTimeout(self.id.clone())),
        }
    }

    /// Stores a scratch value, replacing any previous one.
    pub fn set(&self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        let _ = self.scratch.lock().insert(key.into(), value.into());
    }

    /// Returns a copy of a scratch value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.scratch.lock().get(key).cloned()
    }

    /// Returns a scratch value deserialized as `T`, or `None` if it is
    /// missing or has a different shape.
    #[must_use]
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| serde_json::from_value(v).ok())
    }

    /// Removes and returns a scratch value.
    pub fn remove(&self, key: &str) -> Option<serde_json::Value> {
        self.scratch.lock().remove(key)
    }

    /// Runs `task` after `delay` unless cancelled first.
    ///
    /// Scheduling under an existing key cancels the earlier timer. A fired
    /// timer leaves the registry before `task` starts; a running `task` is
    /// still cut short when the session closes. Does nothing on a closed
    /// session. Must be called from within a Tokio runtime.
    pub fn set_timer<F>(&self, key: impl Into<String>, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let mut timers = self.timers.lock();
        // checked under the registry lock so clear_timers cannot miss it
        if self.is_closed() {
            tracing::debug!(session_id = %self.id, key = %key, "timer ignored on closed session");
            return;
        }

        let generation = self.timer_generation.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::clone(&self.timers);
        let closed = self.closed.clone();
        let fired_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut timers = registry.lock();
                if timers
                    .get(&fired_key)
                    .is_some_and(|entry| entry.generation == generation)
                {
                    let _ = timers.remove(&fired_key);
                }
            }
            tokio::select! {
                biased;
                () = closed.cancelled() => {}
                () = task => {}
            }
        })
        .abort_handle();

        if let Some(previous) = timers.insert(key, TimerEntry { generation, handle }) {
            previous.handle.abort();
        }
    }

    /// Cancels one timer. Returns `true` if it was still pending.
    pub fn cancel_timer(&self, key: &str) -> bool {
        match self.timers.lock().remove(key) {
            Some(entry) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancels every timer.
    pub fn clear_timers(&self) {
        for (_, entry) in self.timers.lock().drain() {
            entry.handle.abort();
        }
    }

    /// Number of timers scheduled that have neither fired nor been
    /// cancelled.
    #[must_use]
    pub fn timer_count(&self) -> usize {
        self.timers.lock().len()
    }

    /// Heartbeat counters and pong channel.
    #[must_use]
    pub fn heartbeat(&self) -> &HeartbeatState {
        &self.heartbeat
    }

    /// Shorthand for [`HeartbeatState::is_dead`].
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.heartbeat.is_dead()
    }

    /// Group currently holding this session.
    #[must_use]
    pub fn group_id(&self) -> Option<GroupId> {
        self.group.lock().clone()
    }

    #[cfg(test)]
    pub(crate) fn set_group(&self, group: Option<GroupId>) {
        *self.group.lock() = group;
    }

    /// Points the back-reference at `group` unless the session already
    /// belongs to one.
    pub(crate) fn claim_group(&self, group: &GroupId) -> Result<(), HubError> {
        let mut current = self.group.lock();
        if let Some(existing) = current.as_ref() {
            return Err(HubError::AlreadyInGroup(existing.clone()));
        }
        *current = Some(group.clone());
        Ok(())
    }

    /// Clears the back-reference only if it still points at `group`.
    pub(crate) fn clear_group_if(&self, group: &GroupId) {
        let mut current = self.group.lock();
        if current.as_ref() == Some(group) {
            *current = None;
        }
    }

    /// Asks the session to disconnect.
    ///
    /// The reader loop stops at its next await point and tears the session
    /// down; the heartbeat monitor stops; further writes fail.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// `true` once [`Session::close`] was called or teardown ran.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub(crate) fn close_token(&self) -> &CancellationToken {
        &self.closed
    }

    /// Best-effort close of the write half.
    pub(crate) async fn shutdown_sink(&self) {
        let close = async { self.sink.lock().await.close().await };
        match tokio::time::timeout(self.send_timeout, close).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(session_id = %self.id, error = %e, "sink close failed"),
            Err(_elapsed) => tracing::debug!(session_id = %self.id, "sink close timed out"),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("path", &self.request.path)
            .field("connected_at", &self.connected_at)
            .field("group", &self.group_id())
            .field("heartbeat", &self.heartbeat.phase())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) fn test_session(
    heartbeat_retry_times: Option<u32>,
) -> (Arc<Session>, super::transport::memory::MemoryPeer) {
    use super::messages::JsonCodec;
    use super::transport::memory;

    let (sink, _stream, peer) = memory::pair(16);
    let session = Session::new(
        SessionId::new(uuid::Uuid::new_v4().to_string()),
        RequestMeta::for_path("/ws"),
        Box::new(sink),
        Arc::new(JsonCodec),
        SessionSettings {
            heartbeat_retry_times,
            ..SessionSettings::default()
        },
    );
    (Arc::new(session), peer)
}

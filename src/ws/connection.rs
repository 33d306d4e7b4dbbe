//! Per-session dispatch engine.
//!
//! A [`Processor`] drives one session's reads; the hub runs the heartbeat
//! monitor next to it and tears the session down once it returns. The
//! default [`QueuedProcessor`] runs a reader loop that enqueues raw frames
//! in arrival order onto a bounded queue, and a processing loop that
//! spawns one task per frame, so handler execution order across frames of
//! the same session is not guaranteed. Handler tasks still running when
//! the session ends are aborted before teardown.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinError, JoinHandle, JoinSet};

use super::heartbeat::{HeartbeatResult, run_heartbeat};
use super::session::Session;
use super::transport::{Frame, FrameStream};
use crate::error::TransportError;
use crate::service::hub::{Hub, HubInner};

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The transport read failed (including a peer hang-up).
    ReadError(TransportError),
    /// The session was closed from our side.
    Closed,
}

/// Drives one session's inbound frames until the transport fails or the
/// session is closed.
///
/// Installed with [`crate::service::HubBuilder::processor`]. The hub
/// registers the session and fires the connect hooks before calling
/// [`Processor::process`], and closes, ungroups, unregisters and
/// disconnects the session after it returns. Implementations must not
/// leave tasks that touch the session running once they return.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Reads from `stream` on behalf of `session`.
    async fn process(
        &self,
        hub: &Hub,
        session: Arc<Session>,
        stream: Box<dyn FrameStream>,
    ) -> SessionOutcome;
}

/// The default processor: reader loop, bounded queue and per-frame
/// handler tasks, with the optional in-flight cap from
/// [`crate::config::HubConfig::max_in_flight`].
#[derive(Debug, Default, Clone, Copy)]
pub struct QueuedProcessor;

#[async_trait]
impl Processor for QueuedProcessor {
    async fn process(
        &self,
        hub: &Hub,
        session: Arc<Session>,
        stream: Box<dyn FrameStream>,
    ) -> SessionOutcome {
        let inner = hub.inner();
        let (tx, rx) = mpsc::channel::<Frame>(inner.config.message_queue_capacity);

        let reader = async {
            let outcome = read_frames(inner, &session, stream, tx).await;
            // stops the processing loop and aborts running handlers
            session.close();
            outcome
        };
        let (outcome, ()) = tokio::join!(reader, process_queue(inner, &session, rx));
        outcome
    }
}

/// Drives `session` until its transport fails or it is closed.
///
/// The session must already be registered with the hub. On return the
/// session has been closed, removed from its group and unregistered, and
/// the disconnect hooks have fired.
pub(crate) async fn run_session(
    hub: &Hub,
    session: Arc<Session>,
    stream: Box<dyn FrameStream>,
) -> SessionOutcome {
    let inner = hub.inner();
    let heartbeat = spawn_heartbeat(inner, &session);
    let processor = Arc::clone(&inner.processor);
    let outcome = processor.process(hub, Arc::clone(&session), stream).await;
    teardown(inner, &session, heartbeat).await;
    outcome
}

async fn read_frames(
    inner: &HubInner,
    session: &Session,
    mut stream: Box<dyn FrameStream>,
    tx: mpsc::Sender<Frame>,
) -> SessionOutcome {
    let closed = session.close_token().clone();
    loop {
        tokio::select! {
            biased;
            () = closed.cancelled() => return SessionOutcome::Closed,
            read = stream.next_frame() => match read {
                Ok(frame) => {
                    inner.hooks.fire_after_read(session, &frame);
                    // a full queue stalls the reader, which stalls transport reads
                    tokio::select! {
                        biased;
                        () = closed.cancelled() => return SessionOutcome::Closed,
                        sent = tx.send(frame) => {
                            if sent.is_err() {
                                return SessionOutcome::Closed;
                            }
                        }
                    }
                }
                Err(e) => {
                    match &e {
                        TransportError::Closed => inner.logger.debug(Some(session), "connection closed by peer"),
                        TransportError::Io(_) => inner.logger.error(Some(session), &format!("read failed: {e}")),
                    }
                    inner.hooks.fire_read_error(session, &e);
                    return SessionOutcome::ReadError(e);
                }
            }
        }
    }
}

fn spawn_heartbeat(inner: &Arc<HubInner>, session: &Arc<Session>) -> Option<JoinHandle<()>> {
    if !inner.config.heartbeat.enabled {
        return None;
    }
    let inner = Arc::clone(inner);
    let session = Arc::clone(session);
    let settings = inner.config.heartbeat.settings();
    Some(tokio::spawn(async move {
        if run_heartbeat(Arc::clone(&session), settings).await == HeartbeatResult::Dead {
            inner.logger.warn(Some(&session), "heartbeat retry budget exhausted");
            inner.hooks.fire_heartbeat_dead(&session);
        }
    }))
}

async fn process_queue(inner: &Arc<HubInner>, session: &Arc<Session>, mut rx: mpsc::Receiver<Frame>) {
    let limit = inner.config.max_in_flight.map(|n| Arc::new(Semaphore::new(n)));
    let closed = session.close_token().clone();
    let mut handlers = JoinSet::new();

    loop {
        let frame = tokio::select! {
            biased;
            () = closed.cancelled() => break,
            Some(finished) = handlers.join_next() => {
                report_handler_exit(session, finished);
                continue;
            }
            next = rx.recv() => match next {
                Some(frame) => frame,
                None => break,
            },
        };

        let permit = match &limit {
            Some(semaphore) => {
                let acquired = tokio::select! {
                    biased;
                    () = closed.cancelled() => break,
                    permit = Arc::clone(semaphore).acquire_owned() => permit,
                };
                match acquired {
                    Ok(permit) => Some(permit),
                    Err(_) => break,
                }
            }
            None => None,
        };

        let inner = Arc::clone(inner);
        let session = Arc::clone(session);
        let _ = handlers.spawn(async move {
            dispatch(&inner, session, &frame).await;
            drop(permit);
        });
    }

    handlers.abort_all();
    while let Some(finished) = handlers.join_next().await {
        report_handler_exit(session, finished);
    }
}

fn report_handler_exit(session: &Session, finished: Result<(), JoinError>) {
    if let Err(e) = finished
        && e.is_panic()
    {
        tracing::warn!(session_id = %session.id(), error = %e, "handler panicked");
    }
}

/// Decodes one frame and invokes its handler. Failures are logged and the
/// frame dropped; the session stays up.
pub(crate) async fn dispatch(inner: &HubInner, session: Arc<Session>, frame: &Frame) {
    let message = match inner.codec.decode(frame.as_bytes()) {
        Ok(message) => message,
        Err(e) => {
            inner.logger.error(Some(&session), &format!("parse message failed: {e}"));
            return;
        }
    };

    let Some(handler) = inner.router.get(message.routing_key()) else {
        inner
            .logger
            .error(Some(&session), &format!("handler not found: {}", message.routing_key()));
        return;
    };

    handler.call(session, message).await;
}

async fn teardown(inner: &HubInner, session: &Arc<Session>, heartbeat: Option<JoinHandle<()>>) {
    session.close();
    session.clear_timers();

    if let Some(heartbeat) = heartbeat
        && let Err(e) = heartbeat.await
    {
        tracing::warn!(session_id = %session.id(), error = %e, "heartbeat task ended abnormally");
    }

    if let Some(group_id) = inner.groups.leave_current(session).await {
        tracing::debug!(session_id = %session.id(), group_id = %group_id, "left group on disconnect");
    }
    inner.unregister(session.id()).await;
    session.shutdown_sink().await;

    inner.hooks.fire_disconnect(session);
    inner.logger.info(Some(session), "session closed");
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::config::HubConfig;
    use crate::logging::{HubLog, MemoryLog};
    use crate::service::hub::{Hub, HubBuilder};
    use crate::ws::messages::Message;
    use crate::ws::session::RequestMeta;
    use crate::ws::transport::memory::{self, MemoryPeer};

    fn echo_builder(log: &Arc<MemoryLog>) -> HubBuilder {
        let mut builder = HubBuilder::new(HubConfig::default());
        builder.logger(Arc::clone(log) as Arc<dyn HubLog>);
        builder.route("echo", |session: Arc<Session>, message: Message| async move {
            let _ = session.emit("echo", &message.data).await;
        });
        builder.route("ping", |session: Arc<Session>, _message: Message| async move {
            let _ = session.send(&Message::pong()).await;
        });
        builder
    }

    fn build(builder: HubBuilder) -> Hub {
        let Ok(hub) = builder.build() else {
            panic!("invalid hub configuration");
        };
        hub
    }

    fn connect(hub: &Hub) -> (JoinHandle<SessionOutcome>, MemoryPeer) {
        let (sink, stream, peer) = memory::pair(16);
        let hub = hub.clone();
        let task = tokio::spawn(async move {
            hub.serve(Box::new(sink), Box::new(stream), RequestMeta::for_path("/ws"))
                .await
        });
        (task, peer)
    }

    async fn wait_for_sessions(hub: &Hub, count: usize) {
        for _ in 0..200 {
            if hub.session_count().await == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} sessions");
    }

    async fn recv_message(peer: &mut MemoryPeer) -> Message {
        let Ok(Some(frame)) = tokio::time::timeout(Duration::from_secs(2), peer.recv()).await else {
            panic!("no frame received");
        };
        let Ok(message) = serde_json::from_slice::<Message>(frame.as_bytes()) else {
            panic!("undecodable frame");
        };
        message
    }

    #[tokio::test]
    async fn echo_round_trip() {
        let log = Arc::new(MemoryLog::new());
        let hub = build(echo_builder(&log));
        let (_task, mut peer) = connect(&hub);

        let Ok(()) = peer.send_text(r#"{"path":"echo","data":{"n":1,"tags":["a"]}}"#).await else {
            panic!("send failed");
        };
        let reply = recv_message(&mut peer).await;
        assert_eq!(reply.path, "echo");
        assert_eq!(reply.data, json!({"n": 1, "tags": ["a"]}));

        let Ok(()) = peer.send_text(r#"{"path":"echo","data":""}"#).await else {
            panic!("send failed");
        };
        assert_eq!(recv_message(&mut peer).await.data, json!(""));
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let log = Arc::new(MemoryLog::new());
        let hub = build(echo_builder(&log));
        let (_task, mut peer) = connect(&hub);

        let Ok(()) = peer.send_text(r#"{"path":"ping"}"#).await else {
            panic!("send failed");
        };
        let Ok(Some(Frame::Text(text))) =
            tokio::time::timeout(Duration::from_secs(2), peer.recv()).await
        else {
            panic!("expected a text frame");
        };
        assert_eq!(text, r#"{"path":"pong","data":null}"#);
        assert!(!log.contains("handler not found"));
    }

    #[tokio::test]
    async fn unknown_key_is_logged_and_session_survives() {
        let log = Arc::new(MemoryLog::new());
        let hub = build(echo_builder(&log));
        let (_task, mut peer) = connect(&hub);

        let Ok(()) = peer.send_text(r#"{"path":"nope","data":1}"#).await else {
            panic!("send failed");
        };
        let Ok(()) = peer.send_text(r#"{"path":"echo","data":2}"#).await else {
            panic!("send failed");
        };
        assert_eq!(recv_message(&mut peer).await.data, json!(2));
        assert!(log.contains("handler not found: nope"));
        assert_eq!(hub.session_count().await, 1);
    }

    #[tokio::test]
    async fn decode_failure_is_logged_and_session_survives() {
        let log = Arc::new(MemoryLog::new());
        let hub = build(echo_builder(&log));
        let (_task, mut peer) = connect(&hub);

        let Ok(()) = peer.send_text("not json").await else {
            panic!("send failed");
        };
        let Ok(()) = peer.send_text(r#"{"path":"echo","data":3}"#).await else {
            panic!("send failed");
        };
        assert_eq!(recv_message(&mut peer).await.data, json!(3));
        assert!(log.contains("parse message failed"));
    }

    #[tokio::test]
    async fn read_error_fires_hooks_and_tears_down() {
        let log = Arc::new(MemoryLog::new());
        let read_errors = Arc::new(AtomicUsize::new(0));
        let disconnects = Arc::new(AtomicUsize::new(0));
        let mut builder = echo_builder(&log);
        {
            let read_errors = Arc::clone(&read_errors);
            builder.hooks_mut().on_read_error(move |_, _| {
                let _ = read_errors.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let disconnects = Arc::clone(&disconnects);
            builder.hooks_mut().on_disconnect(move |session| {
                assert!(session.is_closed());
                assert_eq!(session.timer_count(), 0);
                let _ = disconnects.fetch_add(1, Ordering::SeqCst);
            });
        }
        let hub = build(builder);
        let (task, mut peer) = connect(&hub);
        wait_for_sessions(&hub, 1).await;

        let sessions = hub.sessions().await;
        let Some(session) = sessions.first() else {
            panic!("session not registered");
        };
        let Ok(group) = hub.groups().join_group(session).await else {
            panic!("join failed");
        };
        session.set_timer("idle", Duration::from_secs(60), async {});
        let group_id = group.id().clone();
        drop(sessions);

        peer.hang_up();
        let Ok(outcome) = task.await else {
            panic!("serve task panicked");
        };
        assert_eq!(outcome, SessionOutcome::ReadError(TransportError::Closed));
        assert_eq!(read_errors.load(Ordering::SeqCst), 1);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(hub.session_count().await, 0);

        let Some(group) = hub.groups().get(&group_id).await else {
            panic!("group vanished");
        };
        assert_eq!(group.current_count(), 0);
    }

    #[tokio::test]
    async fn disconnect_closes_the_session() {
        let log = Arc::new(MemoryLog::new());
        let hub = build(echo_builder(&log));
        let (task, mut peer) = connect(&hub);
        wait_for_sessions(&hub, 1).await;

        let ids: Vec<_> = hub.sessions().await.iter().map(|s| s.id().clone()).collect();
        let Some(id) = ids.first() else {
            panic!("no session");
        };
        let Ok(()) = hub.disconnect(id).await else {
            panic!("disconnect failed");
        };

        let Ok(outcome) = task.await else {
            panic!("serve task panicked");
        };
        assert_eq!(outcome, SessionOutcome::Closed);
        assert_eq!(hub.session_count().await, 0);
        // sink is closed on teardown
        assert_eq!(peer.recv().await, None);
        assert!(hub.disconnect(id).await.is_err());
    }

    #[tokio::test]
    async fn after_read_hooks_see_frames_in_arrival_order() {
        let log = Arc::new(MemoryLog::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut builder = echo_builder(&log);
        {
            let seen = Arc::clone(&seen);
            builder.hooks_mut().on_after_read(move |_, frame| {
                seen.lock().push(String::from_utf8_lossy(frame.as_bytes()).into_owned());
            });
        }
        let hub = build(builder);
        let (task, mut peer) = connect(&hub);

        for n in 0..5 {
            let Ok(()) = peer.send_text(format!(r#"{{"path":"x","data":{n}}}"#)).await else {
                panic!("send failed");
            };
        }
        peer.hang_up();
        let Ok(_) = task.await else {
            panic!("serve task panicked");
        };

        let expected: Vec<String> = (0..5)
            .map(|n| format!(r#"{{"path":"x","data":{n}}}"#))
            .collect();
        assert_eq!(*seen.lock(), expected);
    }

    #[tokio::test]
    async fn in_flight_cap_still_dispatches_everything() {
        let log = Arc::new(MemoryLog::new());
        let config = HubConfig {
            max_in_flight: Some(1),
            ..HubConfig::default()
        };
        let mut builder = HubBuilder::new(config);
        builder.logger(Arc::clone(&log) as Arc<dyn HubLog>);
        builder.route("echo", |session: Arc<Session>, message: Message| async move {
            let _ = session.emit("echo", &message.data).await;
        });
        let hub = build(builder);
        let (_task, mut peer) = connect(&hub);

        for n in 0..3 {
            let Ok(()) = peer.send_text(format!(r#"{{"path":"echo","data":{n}}}"#)).await else {
                panic!("send failed");
            };
        }
        let mut got = Vec::new();
        for _ in 0..3 {
            got.push(recv_message(&mut peer).await.data);
        }
        got.sort_by_key(|v| v.as_i64());
        assert_eq!(got, vec![json!(0), json!(1), json!(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_handlers_are_aborted_before_teardown() {
        let log = Arc::new(MemoryLog::new());
        let joined = Arc::new(AtomicUsize::new(0));
        let fired = Arc::new(AtomicUsize::new(0));
        let groups = Arc::new(crate::domain::GroupManager::new(2));

        let mut builder = echo_builder(&log);
        builder.group_manager(Arc::clone(&groups));
        {
            let joined = Arc::clone(&joined);
            let fired = Arc::clone(&fired);
            let groups = Arc::clone(&groups);
            builder.route("slow", move |session: Arc<Session>, _message: Message| {
                let joined = Arc::clone(&joined);
                let fired = Arc::clone(&fired);
                let groups = Arc::clone(&groups);
                async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    if groups.join_group(&session).await.is_ok() {
                        let _ = joined.fetch_add(1, Ordering::SeqCst);
                    }
                    session.set_timer("late", Duration::from_millis(50), async move {
                        let _ = fired.fetch_add(1, Ordering::SeqCst);
                    });
                }
            });
        }
        let hub = build(builder);
        let (task, mut peer) = connect(&hub);

        let Ok(()) = peer.send_text(r#"{"path":"slow"}"#).await else {
            panic!("send failed");
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        peer.hang_up();
        let Ok(outcome) = task.await else {
            panic!("serve task panicked");
        };
        assert_eq!(outcome, SessionOutcome::ReadError(TransportError::Closed));
        assert_eq!(hub.session_count().await, 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(joined.load(Ordering::SeqCst), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        for group in groups.groups().await {
            assert_eq!(group.current_count(), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_stops_the_reader() {
        let log = Arc::new(MemoryLog::new());
        let reads = Arc::new(AtomicUsize::new(0));
        let config = HubConfig {
            message_queue_capacity: 1,
            max_in_flight: Some(1),
            ..HubConfig::default()
        };
        let mut builder = HubBuilder::new(config);
        builder.logger(Arc::clone(&log) as Arc<dyn HubLog>);
        builder.route("block", |_session: Arc<Session>, _message: Message| async {
            std::future::pending::<()>().await;
        });
        {
            let reads = Arc::clone(&reads);
            builder.hooks_mut().on_after_read(move |_, _| {
                let _ = reads.fetch_add(1, Ordering::SeqCst);
            });
        }
        let hub = build(builder);
        let (task, peer) = connect(&hub);

        for _ in 0..10 {
            let Ok(()) = peer.send_text(r#"{"path":"block"}"#).await else {
                panic!("send failed");
            };
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        // one running, one waiting for a permit, one queued, one held by the reader
        assert_eq!(reads.load(Ordering::SeqCst), 4);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(reads.load(Ordering::SeqCst), 4);

        let ids: Vec<_> = hub.sessions().await.iter().map(|s| s.id().clone()).collect();
        let Some(id) = ids.first() else {
            panic!("no session");
        };
        let Ok(()) = hub.disconnect(id).await else {
            panic!("disconnect failed");
        };
        let Ok(outcome) = task.await else {
            panic!("serve task panicked");
        };
        assert_eq!(outcome, SessionOutcome::Closed);
        assert_eq!(hub.session_count().await, 0);
    }

    /// Handles frames one at a time on the connection task.
    #[derive(Debug)]
    struct InlineProcessor;

    #[async_trait]
    impl Processor for InlineProcessor {
        async fn process(
            &self,
            hub: &Hub,
            session: Arc<Session>,
            mut stream: Box<dyn FrameStream>,
        ) -> SessionOutcome {
            loop {
                match stream.next_frame().await {
                    Ok(frame) => hub.dispatch(Arc::clone(&session), &frame).await,
                    Err(e) => return SessionOutcome::ReadError(e),
                }
            }
        }
    }

    #[tokio::test]
    async fn custom_processor_replaces_the_pipeline() {
        let log = Arc::new(MemoryLog::new());
        let reads = Arc::new(AtomicUsize::new(0));
        let disconnects = Arc::new(AtomicUsize::new(0));
        let mut builder = echo_builder(&log);
        builder.processor(Arc::new(InlineProcessor));
        {
            let reads = Arc::clone(&reads);
            builder.hooks_mut().on_after_read(move |_, _| {
                let _ = reads.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let disconnects = Arc::clone(&disconnects);
            builder.hooks_mut().on_disconnect(move |_| {
                let _ = disconnects.fetch_add(1, Ordering::SeqCst);
            });
        }
        let hub = build(builder);
        let (task, mut peer) = connect(&hub);

        let Ok(()) = peer.send_text(r#"{"path":"echo","data":"inline"}"#).await else {
            panic!("send failed");
        };
        assert_eq!(recv_message(&mut peer).await.data, json!("inline"));
        // the reader loop and its hooks belong to the default processor
        assert_eq!(reads.load(Ordering::SeqCst), 0);

        peer.hang_up();
        let Ok(outcome) = task.await else {
            panic!("serve task panicked");
        };
        assert_eq!(outcome, SessionOutcome::ReadError(TransportError::Closed));
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(hub.session_count().await, 0);
        assert_eq!(peer.recv().await, None);
    }
}

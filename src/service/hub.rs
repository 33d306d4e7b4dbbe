//! The hub: engine object tying sessions, routing, groups and hooks together.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::HubConfig;
use crate::domain::{GroupHooks, GroupManager, Hooks, IdGenerator, SessionId, uuid_generator};
use crate::error::HubError;
use crate::logging::{HubLog, TracingLog};
use crate::ws::connection::{Processor, QueuedProcessor, SessionOutcome, dispatch, run_session};
use crate::ws::messages::{Codec, JsonCodec, Message, PONG};
use crate::ws::router::{Handler, Router};
use crate::ws::session::{RequestMeta, Session};
use crate::ws::transport::{Frame, FrameSink, FrameStream};

/// State shared by the hub handle and every session task.
pub(crate) struct HubInner {
    pub(crate) config: HubConfig,
    pub(crate) router: Router,
    pub(crate) hooks: Hooks,
    pub(crate) codec: Arc<dyn Codec>,
    pub(crate) logger: Arc<dyn HubLog>,
    pub(crate) groups: Arc<GroupManager>,
    pub(crate) processor: Arc<dyn Processor>,
    session_ids: IdGenerator,
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
}

impl HubInner {
    async fn register(&self, session: Arc<Session>) {
        let id = session.id().clone();
        if self.sessions.write().await.insert(id, session).is_some() {
            tracing::warn!("session id generator produced a duplicate id");
        }
    }

    pub(crate) async fn unregister(&self, id: &SessionId) {
        let _ = self.sessions.write().await.remove(id);
    }
}

/// Handle to a running hub. Cheap to clone.
///
/// Built with [`HubBuilder`]; routes and hooks are fixed from then on.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Starts a builder with the given configuration.
    #[must_use]
    pub fn builder(config: HubConfig) -> HubBuilder {
        HubBuilder::new(config)
    }

    /// Runs one connection to completion.
    ///
    /// Allocates a session, fires the before-connect hooks, registers the
    /// session, fires the after-connect hooks and then hands the stream to
    /// the configured [`Processor`] until the transport fails or the
    /// session is closed.
    pub async fn serve(
        &self,
        sink: Box<dyn FrameSink>,
        stream: Box<dyn FrameStream>,
        request: RequestMeta,
    ) -> SessionOutcome {
        let inner = &self.inner;
        let session = Arc::new(Session::new(
            SessionId::from((inner.session_ids)()),
            request,
            sink,
            Arc::clone(&inner.codec),
            inner.config.session_settings(),
        ));

        inner.hooks.fire_before_connect(&session);
        inner.register(Arc::clone(&session)).await;
        inner.hooks.fire_after_connect(&session);
        inner.logger.info(Some(&session), "session connected");

        run_session(self, session, stream).await
    }

    /// Decodes `frame` and runs its handler on the current task, the way
    /// the default processor does for every inbound frame. Decode failures
    /// and unknown keys are logged and the frame dropped.
    pub async fn dispatch(&self, session: Arc<Session>, frame: &Frame) {
        dispatch(&self.inner, session, frame).await;
    }

    pub(crate) fn inner(&self) -> &Arc<HubInner> {
        &self.inner
    }

    /// Looks up a live session.
    pub async fn session(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.inner.sessions.read().await.get(id).cloned()
    }

    /// All live sessions, sorted by ID.
    pub async fn sessions(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<_> = self.inner.sessions.read().await.values().cloned().collect();
        sessions.sort_by(|a, b| a.id().cmp(b.id()));
        sessions
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    /// Closes one session. Teardown runs on the session's own task.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::SessionNotFound`] if no such session is live.
    pub async fn disconnect(&self, id: &SessionId) -> Result<(), HubError> {
        let session = self
            .session(id)
            .await
            .ok_or_else(|| HubError::SessionNotFound(id.clone()))?;
        session.close();
        Ok(())
    }

    /// Closes every live session.
    pub async fn shutdown(&self) {
        let sessions = self.sessions().await;
        tracing::info!(count = sessions.len(), "closing all sessions");
        for session in sessions {
            session.close();
        }
    }

    /// Group manager.
    #[must_use]
    pub fn groups(&self) -> &Arc<GroupManager> {
        &self.inner.groups
    }

    /// Message router.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.inner.router
    }

    /// Connection hooks.
    #[must_use]
    pub fn hooks(&self) -> &Hooks {
        &self.inner.hooks
    }

    /// Payload codec.
    #[must_use]
    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.inner.codec
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Logging collaborator.
    #[must_use]
    pub fn logger(&self) -> &Arc<dyn HubLog> {
        &self.inner.logger
    }
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("config", &self.inner.config)
            .field("router", &self.inner.router)
            .field("hooks", &self.inner.hooks)
            .field("groups", &self.inner.groups)
            .finish_non_exhaustive()
    }
}

/// Collects routes, hooks and collaborators before the hub starts.
pub struct HubBuilder {
    config: HubConfig,
    router: Router,
    hooks: Hooks,
    group_hooks: GroupHooks,
    codec: Arc<dyn Codec>,
    logger: Arc<dyn HubLog>,
    session_ids: IdGenerator,
    group_ids: Option<IdGenerator>,
    groups: Option<Arc<GroupManager>>,
    processor: Arc<dyn Processor>,
}

impl HubBuilder {
    /// Starts from `config` with the JSON codec, the tracing logger and
    /// UUID identifiers.
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            router: Router::new(),
            hooks: Hooks::default(),
            group_hooks: GroupHooks::default(),
            codec: Arc::new(JsonCodec),
            logger: Arc::new(TracingLog),
            session_ids: uuid_generator(),
            group_ids: None,
            groups: None,
            processor: Arc::new(QueuedProcessor),
        }
    }

    /// Registers `handler` for routing key `key`. A later registration for
    /// the same key replaces the earlier one.
    pub fn route(&mut self, key: impl Into<String>, handler: impl Handler + 'static) -> &mut Self {
        let key = key.into();
        if self.router.route(key.clone(), handler).is_some() {
            tracing::debug!(key = %key, "route replaced");
        }
        self
    }

    /// Connection hooks, for registration.
    pub fn hooks_mut(&mut self) -> &mut Hooks {
        &mut self.hooks
    }

    /// Group hooks, for registration.
    pub fn group_hooks_mut(&mut self) -> &mut GroupHooks {
        &mut self.group_hooks
    }

    /// Replaces the payload codec.
    pub fn codec(&mut self, codec: Arc<dyn Codec>) -> &mut Self {
        self.codec = codec;
        self
    }

    /// Replaces the logging collaborator.
    pub fn logger(&mut self, logger: Arc<dyn HubLog>) -> &mut Self {
        self.logger = logger;
        self
    }

    /// Replaces the session ID generator.
    pub fn session_id_generator(&mut self, generator: IdGenerator) -> &mut Self {
        self.session_ids = generator;
        self
    }

    /// Replaces the group ID generator.
    pub fn group_id_generator(&mut self, generator: IdGenerator) -> &mut Self {
        self.group_ids = Some(generator);
        self
    }

    /// Uses an existing group manager, so handlers can capture it before the
    /// hub is built. Group hooks and the group ID generator then belong on
    /// the manager; setting them here as well fails the build.
    pub fn group_manager(&mut self, groups: Arc<GroupManager>) -> &mut Self {
        self.groups = Some(groups);
        self
    }

    /// Replaces the per-connection pipeline. Defaults to
    /// [`QueuedProcessor`].
    pub fn processor(&mut self, processor: Arc<dyn Processor>) -> &mut Self {
        self.processor = processor;
        self
    }

    /// Validates the configuration and starts the hub.
    ///
    /// With heartbeat enabled the reserved `pong` key is bound to the
    /// heartbeat signal, replacing any application route for it.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidConfig`] if the configuration is invalid,
    /// or if group hooks or a group ID generator were set together with an
    /// external group manager.
    pub fn build(self) -> Result<Hub, HubError> {
        self.config.validate()?;
        if self.groups.is_some() && (!self.group_hooks.is_empty() || self.group_ids.is_some()) {
            return Err(HubError::InvalidConfig(
                "group hooks and group ids must be configured on the external group manager".into(),
            ));
        }

        let mut router = self.router;
        if self.config.heartbeat.enabled
            && router
                .route(PONG, |session: Arc<Session>, _message: Message| async move {
                    let _ = session.heartbeat().signal_pong();
                })
                .is_some()
        {
            tracing::warn!("application route for `pong` replaced by the heartbeat handler");
        }

        let groups = match self.groups {
            Some(groups) => groups,
            None => Arc::new(
                GroupManager::new(self.config.group_capacity)
                    .with_id_generator(self.group_ids.unwrap_or_else(uuid_generator))
                    .with_hooks(self.group_hooks)
                    .with_codec(Arc::clone(&self.codec)),
            ),
        };

        tracing::debug!(routes = router.len(), heartbeat = self.config.heartbeat.enabled, "hub built");

        Ok(Hub {
            inner: Arc::new(HubInner {
                config: self.config,
                router,
                hooks: self.hooks,
                codec: self.codec,
                logger: self.logger,
                groups,
                processor: self.processor,
                session_ids: self.session_ids,
                sessions: RwLock::new(HashMap::new()),
            }),
        })
    }
}

impl fmt::Debug for HubBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubBuilder")
            .field("config", &self.config)
            .field("router", &self.router)
            .field("hooks", &self.hooks)
            .field("group_hooks", &self.group_hooks)
            .field("external_groups", &self.groups.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::task::JoinHandle;

    use super::*;
    use crate::logging::MemoryLog;
    use crate::ws::transport::memory::{self, MemoryPeer};

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

    #[test]
    fn invalid_config_is_rejected() {
        let config = HubConfig {
            message_queue_capacity: 0,
            ..HubConfig::default()
        };
        assert!(matches!(
            HubBuilder::new(config).build(),
            Err(HubError::InvalidConfig(_))
        ));
    }

    #[test]
    fn heartbeat_reserves_pong_route() {
        let mut config = HubConfig::default();
        config.heartbeat.enabled = true;
        let mut builder = HubBuilder::new(config);
        builder.route(PONG, |_session: Arc<Session>, _message: Message| async {});
        let Ok(hub) = builder.build() else {
            panic!("build failed");
        };
        assert!(hub.router().contains(PONG));
        assert_eq!(hub.router().len(), 1);
    }

    #[test]
    fn pong_route_is_free_without_heartbeat() {
        let Ok(hub) = HubBuilder::new(HubConfig::default()).build() else {
            panic!("build failed");
        };
        assert!(!hub.router().contains(PONG));
    }

    #[tokio::test]
    async fn connect_hooks_fire_before_loops_start() {
        let calls = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut builder = HubBuilder::new(HubConfig::default());
        {
            let calls = Arc::clone(&calls);
            builder.hooks_mut().on_before_connect(move |_| calls.lock().push("before"));
        }
        {
            let calls = Arc::clone(&calls);
            builder.hooks_mut().on_after_connect(move |_| calls.lock().push("after"));
        }
        let Ok(hub) = builder.build() else {
            panic!("build failed");
        };

        let (_task, _peer) = connect(&hub);
        wait_for_sessions(&hub, 1).await;
        assert_eq!(*calls.lock(), vec!["before", "after"]);
    }

    #[test]
    fn external_group_manager_is_shared() {
        let groups = Arc::new(GroupManager::new(2));
        let mut builder = HubBuilder::new(HubConfig::default());
        builder.group_manager(Arc::clone(&groups));
        let Ok(hub) = builder.build() else {
            panic!("build failed");
        };
        assert!(Arc::ptr_eq(hub.groups(), &groups));
        assert_eq!(hub.groups().capacity(), 2);
    }

    #[test]
    fn group_settings_conflict_with_external_manager() {
        let mut with_hooks = HubBuilder::new(HubConfig::default());
        with_hooks.group_manager(Arc::new(GroupManager::new(2)));
        with_hooks.group_hooks_mut().on_created(|_| {});
        assert!(matches!(with_hooks.build(), Err(HubError::InvalidConfig(_))));

        let mut with_ids = HubBuilder::new(HubConfig::default());
        with_ids.group_manager(Arc::new(GroupManager::new(2)));
        with_ids.group_id_generator(Arc::new(|| "g".to_string()));
        assert!(matches!(with_ids.build(), Err(HubError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn custom_session_ids_are_used() {
        let next = Arc::new(AtomicUsize::new(0));
        let mut builder = HubBuilder::new(HubConfig::default());
        builder.session_id_generator(Arc::new(move || {
            format!("s-{}", next.fetch_add(1, Ordering::SeqCst))
        }));
        let Ok(hub) = builder.build() else {
            panic!("build failed");
        };

        let (_a, _pa) = connect(&hub);
        let (_b, _pb) = connect(&hub);
        wait_for_sessions(&hub, 2).await;

        let ids: Vec<String> = hub.sessions().await.iter().map(|s| s.id().to_string()).collect();
        assert_eq!(ids, vec!["s-0", "s-1"]);
        assert!(hub.session(&SessionId::from("s-1")).await.is_some());
    }

    #[tokio::test]
    async fn shutdown_closes_every_session() {
        let log = Arc::new(MemoryLog::new());
        let mut builder = HubBuilder::new(HubConfig::default());
        builder.logger(Arc::clone(&log) as Arc<dyn HubLog>);
        let Ok(hub) = builder.build() else {
            panic!("build failed");
        };

        let (a, _pa) = connect(&hub);
        let (b, _pb) = connect(&hub);
        wait_for_sessions(&hub, 2).await;

        hub.shutdown().await;
        for task in [a, b] {
            let Ok(outcome) = task.await else {
                panic!("serve task panicked");
            };
            assert_eq!(outcome, SessionOutcome::Closed);
        }
        assert_eq!(hub.session_count().await, 0);
        assert!(log.contains("session closed"));
    }

    #[tokio::test]
    async fn disconnect_unknown_session_is_not_found() {
        let Ok(hub) = HubBuilder::new(HubConfig::default()).build() else {
            panic!("build failed");
        };
        let missing = SessionId::from("missing");
        assert!(matches!(
            hub.disconnect(&missing).await,
            Err(HubError::SessionNotFound(id)) if id == missing
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_client_is_reported_dead() {
        let dead = Arc::new(AtomicUsize::new(0));
        let mut config = HubConfig::default();
        config.heartbeat.enabled = true;
        let mut builder = HubBuilder::new(config);
        {
            let dead = Arc::clone(&dead);
            builder.hooks_mut().on_heartbeat_dead(move |_| {
                let _ = dead.fetch_add(1, Ordering::SeqCst);
            });
        }
        let Ok(hub) = builder.build() else {
            panic!("build failed");
        };

        let (_task, _peer) = connect(&hub);
        wait_for_sessions(&hub, 1).await;
        // three ticks of the default 10s unit
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert_eq!(dead.load(Ordering::SeqCst), 1);
        let sessions = hub.sessions().await;
        let Some(session) = sessions.first() else {
            panic!("session should stay registered");
        };
        assert!(session.is_dead());
    }
}

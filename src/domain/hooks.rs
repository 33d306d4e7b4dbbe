//! Observer callbacks fired at lifecycle points.
//!
//! Hooks are registered while the hub is built and only invoked
//! afterwards. Every list fires synchronously, in registration order, on
//! the task that reached the lifecycle point. Hooks observe; they cannot
//! veto the event. A panicking hook is not contained.

use std::fmt;
use std::sync::Arc;

use super::group::Group;
use crate::error::{HubError, TransportError};
use crate::ws::session::Session;
use crate::ws::transport::Frame;

type SessionHook = Arc<dyn Fn(&Session) + Send + Sync>;
type ReadHook = Arc<dyn Fn(&Session, &Frame) + Send + Sync>;
type ReadErrorHook = Arc<dyn Fn(&Session, &TransportError) + Send + Sync>;
type GroupHook = Arc<dyn Fn(&Group) + Send + Sync>;
type MembershipHook = Arc<dyn Fn(&Session, &Group) + Send + Sync>;
type SendFailedHook = Arc<dyn Fn(&Session, &Group, &HubError) + Send + Sync>;

/// Connection lifecycle hooks.
#[derive(Default, Clone)]
pub struct Hooks {
    before_connect: Vec<SessionHook>,
    after_connect: Vec<SessionHook>,
    after_read: Vec<ReadHook>,
    read_error: Vec<ReadErrorHook>,
    heartbeat_dead: Vec<SessionHook>,
    disconnect: Vec<SessionHook>,
}

impl Hooks {
    /// Fired right after the session is allocated, before it is registered.
    pub fn on_before_connect(&mut self, f: impl Fn(&Session) + Send + Sync + 'static) -> &mut Self {
        self.before_connect.push(Arc::new(f));
        self
    }

    /// Fired once the session is registered, before its loops start.
    pub fn on_after_connect(&mut self, f: impl Fn(&Session) + Send + Sync + 'static) -> &mut Self {
        self.after_connect.push(Arc::new(f));
        self
    }

    /// Fired by the reader loop for every frame, before it is queued.
    pub fn on_after_read(
        &mut self,
        f: impl Fn(&Session, &Frame) + Send + Sync + 'static,
    ) -> &mut Self {
        self.after_read.push(Arc::new(f));
        self
    }

    /// Fired when the transport read fails, before teardown.
    pub fn on_read_error(
        &mut self,
        f: impl Fn(&Session, &TransportError) + Send + Sync + 'static,
    ) -> &mut Self {
        self.read_error.push(Arc::new(f));
        self
    }

    /// Fired when the heartbeat retry budget is exhausted.
    pub fn on_heartbeat_dead(
        &mut self,
        f: impl Fn(&Session) + Send + Sync + 'static,
    ) -> &mut Self {
        self.heartbeat_dead.push(Arc::new(f));
        self
    }

    /// Fired at the end of teardown.
    pub fn on_disconnect(&mut self, f: impl Fn(&Session) + Send + Sync + 'static) -> &mut Self {
        self.disconnect.push(Arc::new(f));
        self
    }

    pub(crate) fn fire_before_connect(&self, session: &Session) {
        for f in &self.before_connect {
            f(session);
        }
    }

    pub(crate) fn fire_after_connect(&self, session: &Session) {
        for f in &self.after_connect {
            f(session);
        }
    }

    pub(crate) fn fire_after_read(&self, session: &Session, frame: &Frame) {
        for f in &self.after_read {
            f(session, frame);
        }
    }

    pub(crate) fn fire_read_error(&self, session: &Session, err: &TransportError) {
        for f in &self.read_error {
            f(session, err);
        }
    }

    pub(crate) fn fire_heartbeat_dead(&self, session: &Session) {
        for f in &self.heartbeat_dead {
            f(session);
        }
    }

    pub(crate) fn fire_disconnect(&self, session: &Session) {
        for f in &self.disconnect {
            f(session);
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("before_connect", &self.before_connect.len())
            .field("after_connect", &self.after_connect.len())
            .field("after_read", &self.after_read.len())
            .field("read_error", &self.read_error.len())
            .field("heartbeat_dead", &self.heartbeat_dead.len())
            .field("disconnect", &self.disconnect.len())
            .finish()
    }
}

/// Group lifecycle hooks, owned by the [`super::GroupManager`].
#[derive(Default, Clone)]
pub struct GroupHooks {
    created: Vec<GroupHook>,
    after_join: Vec<MembershipHook>,
    after_leave: Vec<MembershipHook>,
    send_failed: Vec<SendFailedHook>,
}

impl GroupHooks {
    /// Fired when a group is created.
    pub fn on_created(&mut self, f: impl Fn(&Group) + Send + Sync + 'static) -> &mut Self {
        self.created.push(Arc::new(f));
        self
    }

    /// Fired after a session joined a group.
    pub fn on_after_join(
        &mut self,
        f: impl Fn(&Session, &Group) + Send + Sync + 'static,
    ) -> &mut Self {
        self.after_join.push(Arc::new(f));
        self
    }

    /// Fired after a session left a group.
    pub fn on_after_leave(
        &mut self,
        f: impl Fn(&Session, &Group) + Send + Sync + 'static,
    ) -> &mut Self {
        self.after_leave.push(Arc::new(f));
        self
    }

    /// Fired for every member a broadcast could not reach.
    pub fn on_send_failed(
        &mut self,
        f: impl Fn(&Session, &Group, &HubError) + Send + Sync + 'static,
    ) -> &mut Self {
        self.send_failed.push(Arc::new(f));
        self
    }

    /// Returns `true` if no group hook is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
            && self.after_join.is_empty()
            && self.after_leave.is_empty()
            && self.send_failed.is_empty()
    }

    pub(crate) fn fire_created(&self, group: &Group) {
        for f in &self.created {
            f(group);
        }
    }

    pub(crate) fn fire_after_join(&self, session: &Session, group: &Group) {
        for f in &self.after_join {
            f(session, group);
        }
    }

    pub(crate) fn fire_after_leave(&self, session: &Session, group: &Group) {
        for f in &self.after_leave {
            f(session, group);
        }
    }

    pub(crate) fn fire_send_failed(&self, session: &Session, group: &Group, err: &HubError) {
        for f in &self.send_failed {
            f(session, group, err);
        }
    }
}

impl fmt::Debug for GroupHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupHooks")
            .field("created", &self.created.len())
            .field("after_join", &self.after_join.len())
            .field("after_leave", &self.after_leave.len())
            .field("send_failed", &self.send_failed.len())
            .finish()
    }
}

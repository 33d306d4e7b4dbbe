//! Capacity-bounded broadcast group.
//!
//! A [`Group`] holds weak references to its member sessions; it never
//! keeps a session alive. Membership changes and broadcasts serialize on
//! the group's own lock, so a join or leave waits for an in-flight
//! broadcast to finish. Capacity and the session's single-group rule are
//! enforced here, under that lock, not by the manager.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::GroupId;
use super::hooks::GroupHooks;
use crate::domain::SessionId;
use crate::error::HubError;
use crate::ws::session::Session;
use crate::ws::transport::Frame;

/// A named set of sessions with a fixed target capacity.
#[derive(Debug)]
pub struct Group {
    id: GroupId,
    capacity: usize,
    created_at: DateTime<Utc>,
    /// Mirrors `members.len()` so synchronous hooks can read it.
    count: AtomicUsize,
    /// Set once the group reached capacity; never cleared.
    full: AtomicBool,
    /// Set when the manager dropped the group.
    removed: AtomicBool,
    members: Mutex<HashMap<SessionId, Weak<Session>>>,
}

/// Outcome of a group broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Members the payload was written to.
    pub delivered: usize,
    /// Members whose write failed or timed out.
    pub failed: Vec<SessionId>,
}

impl Group {
    pub(crate) fn new(id: GroupId, capacity: usize) -> Self {
        Self {
            id,
            capacity,
            created_at: Utc::now(),
            count: AtomicUsize::new(0),
            full: AtomicBool::new(false),
            removed: AtomicBool::new(false),
            members: Mutex::new(HashMap::new()),
        }
    }

    /// Group identifier.
    #[must_use]
    pub fn id(&self) -> &GroupId {
        &self.id
    }

    /// Fixed target capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Creation timestamp.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Number of current members.
    #[must_use]
    pub fn current_count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// `true` once the group has reached capacity. A full group stays full
    /// even after members leave.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.full.load(Ordering::Acquire)
    }

    /// IDs of current members, sorted.
    pub async fn member_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.members.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Returns `true` if `session_id` is a member.
    pub async fn contains(&self, session_id: &SessionId) -> bool {
        self.members.lock().await.contains_key(session_id)
    }

    /// Adds `session` under the group lock and points its back-reference
    /// here. Returns `true` if this insert filled the group.
    ///
    /// Fails with [`HubError::GroupNotFound`] if the group was removed,
    /// [`HubError::GroupFull`] if it already reached capacity,
    /// [`HubError::AlreadyInGroup`] if the session belongs to a group and
    /// [`HubError::SessionClosed`] if the session is closed. Nothing
    /// changes on error.
    pub(crate) async fn insert(&self, session: &Arc<Session>) -> Result<bool, HubError> {
        let mut members = self.members.lock().await;
        if self.removed.load(Ordering::Acquire) {
            return Err(HubError::GroupNotFound(self.id.clone()));
        }
        if self.is_full() || members.len() >= self.capacity {
            return Err(HubError::GroupFull(self.id.clone()));
        }
        if session.is_closed() {
            return Err(HubError::SessionClosed(session.id().clone()));
        }
        session.claim_group(&self.id)?;
        let _ = members.insert(session.id().clone(), Arc::downgrade(session));

        // teardown may have read the back-reference before the claim
        if session.is_closed() {
            let _ = members.remove(session.id());
            session.clear_group_if(&self.id);
            return Err(HubError::SessionClosed(session.id().clone()));
        }

        self.count.store(members.len(), Ordering::Release);
        let filled = members.len() >= self.capacity;
        if filled {
            self.full.store(true, Ordering::Release);
        }
        Ok(filled)
    }

    /// Removes `session` if it is a member. Returns `true` if it was.
    pub(crate) async fn remove(&self, session: &Session) -> bool {
        let mut members = self.members.lock().await;
        let removed = members.remove(session.id()).is_some();
        if removed {
            session.clear_group_if(&self.id);
            self.count.store(members.len(), Ordering::Release);
        }
        removed
    }

    /// Drops every member, clearing their back-references. Later inserts
    /// fail with [`HubError::GroupNotFound`].
    pub(crate) async fn clear(&self) -> usize {
        let mut members = self.members.lock().await;
        self.removed.store(true, Ordering::Release);
        for session in members.values().filter_map(Weak::upgrade) {
            session.clear_group_if(&self.id);
        }
        let cleared = members.len();
        members.clear();
        self.count.store(0, Ordering::Release);
        cleared
    }

    /// Writes `frame` to every member except `except`, holding the group
    /// lock for the whole iteration.
    ///
    /// A failed member fires the send-failed hooks and the broadcast moves
    /// on. Members whose session was already dropped are pruned.
    pub(crate) async fn broadcast(
        &self,
        frame: &Frame,
        except: Option<&SessionId>,
        hooks: &GroupHooks,
    ) -> BroadcastReport {
        let mut members = self.members.lock().await;
        let mut report = BroadcastReport::default();
        let mut stale = Vec::new();

        for (id, weak) in members.iter() {
            if except == Some(id) {
                continue;
            }
            let Some(session) = weak.upgrade() else {
                stale.push(id.clone());
                continue;
            };
            match session.send_frame(frame.clone()).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::debug!(group_id = %self.id, session_id = %id, error = %e, "group send failed");
                    hooks.fire_send_failed(&session, self, &e);
                    report.failed.push(id.clone());
                }
            }
        }

        for id in stale {
            let _ = members.remove(&id);
        }
        self.count.store(members.len(), Ordering::Release);
        report
    }
}

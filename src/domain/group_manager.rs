//! Process-wide group registry with accepting and full partitions.
//!
//! [`GroupManager`] keeps every group in exactly one of two maps:
//! *accepting* (below capacity, eligible for untargeted joins) or *full*
//! (reached capacity, rejected with [`HubError::GroupFull`] on targeted
//! joins). The move from accepting to full is one-way.
//!
//! # Locking
//!
//! - The manager lock guards the two partition maps and is only held to
//!   read or change them, never across an await on a group.
//! - Each group has its own lock (see [`Group`]). The group re-checks
//!   capacity under that lock, so two sessions racing for the last slot
//!   cannot both win; the loser sees [`HubError::GroupFull`].
//! - A join takes the manager lock to pick the group, releases it, inserts
//!   under the group lock and takes the manager lock again only if the
//!   group filled up. A slow broadcast therefore only delays joins and
//!   leaves on its own group.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::group::{BroadcastReport, Group};
use super::hooks::GroupHooks;
use super::ids::{GroupId, IdGenerator, SessionId, uuid_generator};
use crate::error::HubError;
use crate::ws::messages::{Codec, JsonCodec, Message};
use crate::ws::session::Session;

#[derive(Debug, Default)]
struct Partitions {
    accepting: HashMap<GroupId, Arc<Group>>,
    full: HashMap<GroupId, Arc<Group>>,
}

impl Partitions {
    fn get(&self, id: &GroupId) -> Option<&Arc<Group>> {
        self.accepting.get(id).or_else(|| self.full.get(id))
    }
}

/// Registry of all groups.
pub struct GroupManager {
    capacity: usize,
    id_generator: IdGenerator,
    hooks: GroupHooks,
    codec: Arc<dyn Codec>,
    partitions: Mutex<Partitions>,
}

impl GroupManager {
    /// Creates a manager whose groups hold up to `capacity` sessions.
    ///
    /// A zero capacity is treated as one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            id_generator: uuid_generator(),
            hooks: GroupHooks::default(),
            codec: Arc::new(JsonCodec),
            partitions: Mutex::new(Partitions::default()),
        }
    }

    /// Replaces the group ID generator.
    #[must_use]
    pub fn with_id_generator(mut self, id_generator: IdGenerator) -> Self {
        self.id_generator = id_generator;
        self
    }

    /// Replaces the lifecycle hooks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: GroupHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Replaces the codec used to encode broadcasts.
    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    /// Capacity given to every new group.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Creates an empty group in the accepting partition.
    pub async fn new_group(&self) -> Arc<Group> {
        let mut parts = self.partitions.lock().await;
        self.create_locked(&mut parts)
    }

    fn create_locked(&self, parts: &mut Partitions) -> Arc<Group> {
        let group = Arc::new(Group::new(
            GroupId::from((self.id_generator)()),
            self.capacity,
        ));
        let _ = parts
            .accepting
            .insert(group.id().clone(), Arc::clone(&group));
        tracing::debug!(group_id = %group.id(), capacity = self.capacity, "group created");
        self.hooks.fire_created(&group);
        group
    }

    /// Joins any accepting group, creating one when none is available.
    ///
    /// No fairness is promised between accepting groups. If the picked
    /// group fills up or is removed before the insert, another one is
    /// tried.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::SessionClosed`] if the session is closed and
    /// [`HubError::AlreadyInGroup`] if it is already a member of a group.
    pub async fn join_group(&self, session: &Arc<Session>) -> Result<Arc<Group>, HubError> {
        loop {
            ensure_joinable(session)?;
            let group = {
                let mut parts = self.partitions.lock().await;
                match parts.accepting.values().next().map(Arc::clone) {
                    Some(group) => group,
                    None => self.create_locked(&mut parts),
                }
            };
            match self.insert_into(&group, session).await {
                Ok(()) => return Ok(group),
                Err(HubError::GroupFull(_) | HubError::GroupNotFound(_)) => {
                    tracing::trace!(group_id = %group.id(), "picked group went away, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Joins the group with the given ID.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::SessionClosed`] if the session is closed,
    /// [`HubError::GroupFull`] if the group is in the full partition (or
    /// fills up first), [`HubError::GroupNotFound`] if no group has that ID
    /// and [`HubError::AlreadyInGroup`] if the session already belongs to a
    /// group. Nothing changes on error.
    pub async fn join_group_by_id(
        &self,
        id: &GroupId,
        session: &Arc<Session>,
    ) -> Result<Arc<Group>, HubError> {
        if session.is_closed() {
            return Err(HubError::SessionClosed(session.id().clone()));
        }
        let group = {
            let parts = self.partitions.lock().await;
            if parts.full.contains_key(id) {
                return Err(HubError::GroupFull(id.clone()));
            }
            parts
                .accepting
                .get(id)
                .map(Arc::clone)
                .ok_or_else(|| HubError::GroupNotFound(id.clone()))?
        };
        ensure_joinable(session)?;
        self.insert_into(&group, session).await?;
        Ok(group)
    }

    async fn insert_into(&self, group: &Arc<Group>, session: &Arc<Session>) -> Result<(), HubError> {
        match group.insert(session).await {
            Ok(filled) => {
                if filled {
                    self.mark_full(group).await;
                }
                tracing::debug!(
                    group_id = %group.id(),
                    session_id = %session.id(),
                    count = group.current_count(),
                    "session joined group"
                );
                self.hooks.fire_after_join(session, group);
                Ok(())
            }
            Err(e) => {
                if matches!(e, HubError::GroupFull(_)) {
                    self.mark_full(group).await;
                }
                Err(e)
            }
        }
    }

    /// Moves `group` to the full partition. No-op if it already moved or
    /// was removed.
    async fn mark_full(&self, group: &Group) {
        let mut parts = self.partitions.lock().await;
        if let Some(filled) = parts.accepting.remove(group.id()) {
            tracing::debug!(group_id = %group.id(), "group reached capacity");
            let _ = parts.full.insert(filled.id().clone(), filled);
        }
    }

    /// Removes `session` from `group`. Returns `true` if it was a member.
    ///
    /// The group keeps its partition: a full group does not reopen, and an
    /// empty group is not deleted.
    pub async fn leave_group(&self, group: &Group, session: &Session) -> bool {
        let removed = group.remove(session).await;
        if removed {
            tracing::debug!(group_id = %group.id(), session_id = %session.id(), "session left group");
            self.hooks.fire_after_leave(session, group);
        }
        removed
    }

    /// Leaves whatever group `session` belongs to, returning its ID.
    pub async fn leave_current(&self, session: &Session) -> Option<GroupId> {
        let id = session.group_id()?;
        let group = self.get(&id).await?;
        self.leave_group(&group, session).await.then_some(id)
    }

    /// Broadcasts `message` to every member of `group`.
    ///
    /// Individual failures fire the send-failed hooks and never abort the
    /// broadcast.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Codec`] if the message cannot be encoded; nothing
    /// is sent in that case.
    pub async fn send_all(&self, group: &Group, message: &Message) -> Result<BroadcastReport, HubError> {
        let frame = self.codec.encode(message)?;
        Ok(group.broadcast(&frame, None, &self.hooks).await)
    }

    /// Broadcasts `message` to every member of `group` except `excluded`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Codec`] if the message cannot be encoded.
    pub async fn send_except(
        &self,
        group: &Group,
        excluded: &SessionId,
        message: &Message,
    ) -> Result<BroadcastReport, HubError> {
        let frame = self.codec.encode(message)?;
        Ok(group.broadcast(&frame, Some(excluded), &self.hooks).await)
    }

    /// Looks a group up in either partition.
    pub async fn get(&self, id: &GroupId) -> Option<Arc<Group>> {
        self.partitions.lock().await.get(id).map(Arc::clone)
    }

    /// All groups, accepting first, each partition sorted by ID.
    pub async fn groups(&self) -> Vec<Arc<Group>> {
        let parts = self.partitions.lock().await;
        let mut accepting: Vec<Arc<Group>> = parts.accepting.values().map(Arc::clone).collect();
        let mut full: Vec<Arc<Group>> = parts.full.values().map(Arc::clone).collect();
        accepting.sort_by(|a, b| a.id().cmp(b.id()));
        full.sort_by(|a, b| a.id().cmp(b.id()));
        accepting.append(&mut full);
        accepting
    }

    /// Number of groups below capacity.
    pub async fn accepting_count(&self) -> usize {
        self.partitions.lock().await.accepting.len()
    }

    /// Number of groups that reached capacity.
    pub async fn full_count(&self) -> usize {
        self.partitions.lock().await.full.len()
    }

    /// Deletes a group and detaches its members.
    ///
    /// Groups are never reclaimed automatically; this is the hook for an
    /// external cleanup policy. Leave hooks are not fired.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::GroupNotFound`] if no group has that ID.
    pub async fn remove_group(&self, id: &GroupId) -> Result<Arc<Group>, HubError> {
        let group = {
            let mut parts = self.partitions.lock().await;
            parts
                .accepting
                .remove(id)
                .or_else(|| parts.full.remove(id))
                .ok_or_else(|| HubError::GroupNotFound(id.clone()))?
        };
        let detached = group.clear().await;
        tracing::debug!(group_id = %id, detached, "group removed");
        Ok(group)
    }
}

fn ensure_joinable(session: &Session) -> Result<(), HubError> {
    if session.is_closed() {
        return Err(HubError::SessionClosed(session.id().clone()));
    }
    if let Some(current) = session.group_id() {
        return Err(HubError::AlreadyInGroup(current));
    }
    Ok(())
}

impl std::fmt::Debug for GroupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupManager")
            .field("capacity", &self.capacity)
            .field("hooks", &self.hooks)
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

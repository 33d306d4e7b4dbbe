//! Domain layer: identifiers, groups, and lifecycle hooks.
//!
//! This module contains the hub's shared model: type-safe session and
//! group identifiers, capacity-bounded groups, the group manager that
//! partitions them into accepting and full sets, and the hook registries
//! fired at connection and group lifecycle points.

pub mod group;
pub mod group_manager;
pub mod hooks;
pub mod ids;

pub use group::{BroadcastReport, Group};
pub use group_manager::GroupManager;
pub use hooks::{GroupHooks, Hooks};
pub use ids::{GroupId, IdGenerator, SessionId, uuid_generator};

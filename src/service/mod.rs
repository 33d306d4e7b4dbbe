//! Service layer: the hub engine.
//!
//! [`Hub`] owns the router, hooks, group manager and session registry and
//! runs every accepted connection through the dispatch engine.

pub mod hub;

pub use hub::{Hub, HubBuilder};

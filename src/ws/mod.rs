//! WebSocket layer: transport, wire messages, routing, sessions.
//!
//! The upgrade endpoint hands every accepted socket to the
//! [`crate::service::Hub`], which runs it through [`connection`].

pub mod connection;
pub mod handler;
pub mod heartbeat;
pub mod messages;
pub mod router;
pub mod session;
pub mod transport;

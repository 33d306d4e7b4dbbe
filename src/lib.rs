//! # socket-hub
//!
//! WebSocket application hub: routed message dispatch, capacity-bounded
//! broadcast groups and heartbeat liveness, served over axum.
//!
//! Every accepted connection becomes a [`ws::session::Session`]. The
//! default [`ws::connection::QueuedProcessor`] reads frames in arrival
//! order onto a bounded queue and spawns one handler task per frame,
//! looked up by the frame's routing key in the [`ws::router::Router`]. Sessions may join groups through the
//! [`domain::GroupManager`]; group broadcasts use the same per-session send
//! path as direct replies.
//!
//! ## Architecture
//!
//! ```text
//! Clients (WebSocket, HTTP admin)
//!     │
//!     ├── WS upgrade + UpgradePolicy (ws/handler)
//!     ├── REST Handlers (api/)
//!     │
//!     ├── Hub (service/)
//!     │     ├── Processor / dispatch engine (ws/connection)
//!     │     ├── Heartbeat monitor (ws/heartbeat)
//!     │     └── Router (ws/router)
//!     │
//!     ├── Sessions (ws/session)
//!     ├── GroupManager + Hooks (domain/)
//!     │
//!     └── Transport + Codec collaborators (ws/transport, ws/messages)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use socket_hub::config::HubConfig;
//! use socket_hub::service::HubBuilder;
//! use socket_hub::ws::messages::Message;
//! use socket_hub::ws::session::Session;
//!
//! let mut builder = HubBuilder::new(HubConfig::default());
//! builder.route("echo", |session: Arc<Session>, message: Message| async move {
//!     let _ = session.emit("echo", &message.data).await;
//! });
//! let hub = builder.build();
//! assert!(hub.is_ok());
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod service;
pub mod ws;

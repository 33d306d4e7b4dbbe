//! socket-hub server entry point.
//!
//! Starts the Axum HTTP server with the WebSocket endpoint and the admin
//! REST API. Ships a few demo routes: `ping`, `echo`, and group
//! `join`/`leave`/`say`.

use std::sync::Arc;

use serde_json::json;
use tracing_subscriber::EnvFilter;

use socket_hub::api;
use socket_hub::app_state::AppState;
use socket_hub::config::GatewayConfig;
use socket_hub::domain::{GroupId, GroupManager};
use socket_hub::service::{Hub, HubBuilder};
use socket_hub::ws::handler::UpgradePolicy;
use socket_hub::ws::messages::{Message, PING};
use socket_hub::ws::session::Session;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = GatewayConfig::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;
    tracing::info!(addr = %config.listen_addr, ws_path = %config.ws_path, "starting socket-hub");

    let hub = build_hub(&config)?;
    let app_state = AppState::new(hub.clone())
        .with_upgrade_policy(UpgradePolicy::allowed_origins(config.allowed_origins.clone()));
    let app = api::build_app(app_state, &config.ws_path);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(hub))
        .await?;

    Ok(())
}

fn build_hub(config: &GatewayConfig) -> anyhow::Result<Hub> {
    let groups = Arc::new(GroupManager::new(config.hub.group_capacity));
    let mut builder = HubBuilder::new(config.hub.clone());
    builder.group_manager(Arc::clone(&groups));

    builder.route(PING, |session: Arc<Session>, _message: Message| async move {
        if let Err(e) = session.send(&Message::pong()).await {
            tracing::debug!(session_id = %session.id(), error = %e, "pong failed");
        }
    });
    builder.route("echo", |session: Arc<Session>, message: Message| async move {
        if let Err(e) = session.emit("echo", &message.data).await {
            tracing::debug!(session_id = %session.id(), error = %e, "echo failed");
        }
    });

    // {"path":"join","data":{"group_id":"..."}} joins a specific group,
    // anything else joins the first group with room.
    let join_groups = Arc::clone(&groups);
    builder.route("join", move |session: Arc<Session>, message: Message| {
        let groups = Arc::clone(&join_groups);
        async move {
            let joined = match message.data.get("group_id").and_then(|v| v.as_str()) {
                Some(id) => groups.join_group_by_id(&GroupId::from(id), &session).await,
                None => groups.join_group(&session).await,
            };
            let reply = match joined {
                Ok(group) => json!({ "group_id": group.id(), "members": group.current_count() }),
                Err(e) => json!({ "error": e.to_string() }),
            };
            let _ = session.emit("joined", &reply).await;
        }
    });

    let leave_groups = Arc::clone(&groups);
    builder.route("leave", move |session: Arc<Session>, _message: Message| {
        let groups = Arc::clone(&leave_groups);
        async move {
            let left = groups.leave_current(&session).await;
            let _ = session.emit("left", &json!({ "group_id": left })).await;
        }
    });

    let say_groups = Arc::clone(&groups);
    builder.route("say", move |session: Arc<Session>, message: Message| {
        let groups = Arc::clone(&say_groups);
        async move {
            let Some(group) = session.group_id() else {
                let _ = session.emit("error", &json!({ "error": "not in a group" })).await;
                return;
            };
            let Some(group) = groups.get(&group).await else {
                return;
            };
            let said = Message::new("said", json!({ "from": session.id(), "data": message.data }));
            if let Err(e) = groups.send_except(&group, session.id(), &said).await {
                tracing::warn!(group_id = %group.id(), error = %e, "group broadcast failed");
            }
        }
    });

    builder.hooks_mut().on_heartbeat_dead(|session| {
        tracing::info!(session_id = %session.id(), "closing dead session");
        session.close();
    });

    let hub = builder.build()?;
    Ok(hub)
}

async fn shutdown_signal(hub: Hub) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received");
    hub.shutdown().await;
}

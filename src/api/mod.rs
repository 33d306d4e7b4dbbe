//! REST API layer: route handlers, DTOs, and router composition.
//!
//! Admin endpoints are mounted under `/api/v1`; `/health` and the
//! WebSocket upgrade path sit at the root.

pub mod dto;
pub mod handlers;

use axum::Router;
use axum::routing::get;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::app_state::AppState;
use crate::ws::handler::ws_handler;

/// OpenAPI document for the admin surface.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "socket-hub",
        description = "Admin API for the WebSocket hub: live sessions, groups and health."
    ),
    paths(
        handlers::system::health_handler,
        handlers::groups::list_groups,
        handlers::groups::create_group,
        handlers::groups::get_group,
        handlers::groups::delete_group,
        handlers::sessions::list_sessions,
        handlers::sessions::get_session,
        handlers::sessions::delete_session,
    ),
    components(schemas(
        handlers::system::HealthResponse,
        dto::GroupSummaryDto,
        dto::GroupListResponse,
        dto::GroupDetailResponse,
        dto::SessionSummaryDto,
        dto::SessionListResponse,
        crate::error::ErrorResponse,
        crate::error::ErrorBody,
    )),
    tags(
        (name = "System", description = "Health"),
        (name = "Groups", description = "Broadcast groups"),
        (name = "Sessions", description = "Live WebSocket sessions"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes())
}

/// Builds the full application: REST API, WebSocket upgrade on `ws_path`,
/// tracing and CORS layers, and Swagger UI when the `swagger-ui` feature
/// is enabled.
pub fn build_app(state: AppState, ws_path: &str) -> Router {
    let router = build_router().route(ws_path, get(ws_handler));

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_admin_paths() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        for expected in [
            "/health",
            "/api/v1/groups",
            "/api/v1/groups/{id}",
            "/api/v1/sessions",
            "/api/v1/sessions/{id}",
        ] {
            assert!(paths.iter().any(|p| p.as_str() == expected), "missing {expected}");
        }
    }
}

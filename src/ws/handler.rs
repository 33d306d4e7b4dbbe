//! Axum WebSocket upgrade handler.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::header::ORIGIN;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};

use super::session::RequestMeta;
use super::transport::split_axum;
use crate::app_state::AppState;

/// Predicate deciding whether an upgrade request is accepted.
pub type UpgradeCheck = Arc<dyn Fn(&RequestMeta) -> bool + Send + Sync>;

/// Admission rules applied before a connection becomes a session.
#[derive(Clone, Default)]
pub struct UpgradePolicy {
    check: Option<UpgradeCheck>,
    response_headers: HashMap<String, HeaderMap>,
}

impl UpgradePolicy {
    /// Accepts every request.
    #[must_use]
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Accepts requests for which `check` returns `true`.
    #[must_use]
    pub fn new(check: impl Fn(&RequestMeta) -> bool + Send + Sync + 'static) -> Self {
        Self {
            check: Some(Arc::new(check)),
            response_headers: HashMap::new(),
        }
    }

    /// Accepts requests whose `Origin` header is in `origins`. Requests
    /// without an `Origin` header (non-browser clients) are accepted; an
    /// empty list accepts everything.
    #[must_use]
    pub fn allowed_origins(origins: Vec<String>) -> Self {
        if origins.is_empty() {
            return Self::allow_all();
        }
        Self::new(move |request| match request.headers.get(ORIGIN) {
            None => true,
            Some(origin) => origin
                .to_str()
                .is_ok_and(|origin| origins.iter().any(|allowed| allowed == origin)),
        })
    }

    /// Attaches `headers` to every upgrade response on `path`.
    #[must_use]
    pub fn with_response_headers(mut self, path: impl Into<String>, headers: HeaderMap) -> Self {
        let _ = self.response_headers.insert(path.into(), headers);
        self
    }

    /// Returns `true` if `request` may upgrade.
    #[must_use]
    pub fn allows(&self, request: &RequestMeta) -> bool {
        self.check.as_ref().is_none_or(|check| check(request))
    }

    /// Extra response headers for `path`, if any were configured.
    #[must_use]
    pub fn response_headers(&self, path: &str) -> Option<&HeaderMap> {
        self.response_headers.get(path)
    }
}

impl fmt::Debug for UpgradePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpgradePolicy")
            .field("check", &self.check.is_some())
            .field("response_headers", &self.response_headers)
            .finish()
    }
}

/// `GET {ws_path}` — Upgrade HTTP connection to WebSocket.
///
/// Requests rejected by the [`UpgradePolicy`] get `403 Forbidden`; no
/// session is created and no hook fires. A failed handshake is dropped
/// silently.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let request = RequestMeta {
        path: uri.path().to_string(),
        query: uri.query().map(str::to_owned),
        headers,
    };

    if !state.upgrade.allows(&request) {
        tracing::debug!(path = %request.path, "upgrade rejected by policy");
        return StatusCode::FORBIDDEN.into_response();
    }

    let extra_headers = state.upgrade.response_headers(&request.path).cloned();
    let hub = state.hub.clone();

    let mut response = ws
        .on_failed_upgrade(|e| tracing::debug!(error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| async move {
            let (sink, stream) = split_axum(socket);
            let outcome = hub.serve(Box::new(sink), Box::new(stream), request).await;
            tracing::debug!(?outcome, "websocket session ended");
        });

    if let Some(extra) = extra_headers {
        response.headers_mut().extend(extra);
    }
    response
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn with_origin(origin: &'static str) -> RequestMeta {
        let mut request = RequestMeta::for_path("/ws");
        let _ = request
            .headers
            .insert(ORIGIN, HeaderValue::from_static(origin));
        request
    }

    #[test]
    fn default_policy_accepts_everything() {
        assert!(UpgradePolicy::default().allows(&with_origin("https://evil.example")));
    }

    #[test]
    fn origin_allow_list() {
        let policy = UpgradePolicy::allowed_origins(vec!["https://app.example".to_string()]);
        assert!(policy.allows(&with_origin("https://app.example")));
        assert!(!policy.allows(&with_origin("https://evil.example")));
        assert!(policy.allows(&RequestMeta::for_path("/ws")));
    }

    #[test]
    fn custom_check_sees_query() {
        let policy = UpgradePolicy::new(|request| {
            request.query.as_deref().is_some_and(|q| q.contains("token="))
        });
        let mut request = RequestMeta::for_path("/ws");
        assert!(!policy.allows(&request));
        request.query = Some("token=abc".to_string());
        assert!(policy.allows(&request));
    }

    #[test]
    fn response_headers_are_per_path() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert("x-hub", HeaderValue::from_static("1"));
        let policy = UpgradePolicy::allow_all().with_response_headers("/ws", headers);
        assert!(policy.response_headers("/ws").is_some());
        assert!(policy.response_headers("/other").is_none());
    }
}

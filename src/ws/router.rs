//! Routing-key to handler mapping.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use super::messages::Message;
use super::session::Session;

/// Trait implemented by every message handler.
///
/// Any `Fn(Arc<Session>, Message) -> impl Future<Output = ()>` closure is a
/// handler, so most routes are registered as plain async closures.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handles one decoded message for `session`.
    async fn call(&self, session: Arc<Session>, message: Message);
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Arc<Session>, Message) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn call(&self, session: Arc<Session>, message: Message) {
        (self)(session, message).await;
    }
}

/// Exact-match lookup from routing key to handler.
///
/// Populated while the hub is being built and read-only afterwards.
#[derive(Default, Clone)]
pub struct Router {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl Router {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `key`, returning the handler it replaced.
    pub fn route(
        &mut self,
        key: impl Into<String>,
        handler: impl Handler + 'static,
    ) -> Option<Arc<dyn Handler>> {
        self.handlers.insert(key.into(), Arc::new(handler))
    }

    /// Looks up the handler for `key`. Unknown keys return `None`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(key).map(Arc::clone)
    }

    /// Returns `true` if `key` has a handler.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.handlers.contains_key(key)
    }

    /// All registered routing keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.handlers.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of registered routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` if no route is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router").field("keys", &self.keys()).finish()
    }
}

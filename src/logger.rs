//! Logger Collaborator
//!
//! Callers may inject their own sink for pool and store events. Every method
//! defaults to a no-op, so an implementation only overrides what it cares
//! about. Internal diagnostics always go through `tracing` as well.

use std::sync::Arc;

/// Observability sink for pool and store events.
pub trait Logger: Send + Sync {
    fn debug(&self, _message: &str) {}
    fn log(&self, _message: &str) {}
    fn info(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl Logger for NoopLogger {}

/// Forwards to `tracing`, with `log` mapped to info.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn debug(&self, message: &str) {
        tracing::debug!(target: "redis_pool_cache::logger", "{}", message);
    }

    fn log(&self, message: &str) {
        tracing::info!(target: "redis_pool_cache::logger", "{}", message);
    }

    fn info(&self, message: &str) {
        tracing::info!(target: "redis_pool_cache::logger", "{}", message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "redis_pool_cache::logger", "{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "redis_pool_cache::logger", "{}", message);
    }
}

/// Shared logger handle; `None` falls back to `NoopLogger`.
pub fn shared(logger: Option<Arc<dyn Logger>>) -> Arc<dyn Logger> {
    logger.unwrap_or_else(|| Arc::new(NoopLogger))
}

//! Uplink Router Library
//!
//! This library provides adaptive request routing for the Uplink client including:
//! - Backend registry and statistics tracking
//! - Periodic and on-demand health probing
//! - Score based backend selection with optional regional affinity
//! - Retry pipeline with exponential backoff and circuit breaking
//! - Request, response and error interceptor chains

pub mod routing;

// Re-export commonly used types
pub use routing::{
    BackendRegistry, BackendSelector, BackendSnapshot, BackendStats, CircuitBreakerSnapshot,
    CircuitBreakerState, CounterSnapshot, ErrorInterceptor, HealthProber, HealthState,
    InterceptorChain, MetricsAggregator, MetricsSnapshot, RequestInterceptor,
    ResponseInterceptor, RouterError, RouterService, score_backend,
};

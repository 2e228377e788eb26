pub mod error;
pub mod interceptor;
pub mod metrics;
pub mod prober;
pub mod registry;
pub mod score;
pub mod selector;
pub mod service;

pub use error::RouterError;
pub use interceptor::{
    ErrorInterceptor, InterceptorChain, RequestInterceptor, ResponseInterceptor,
};
pub use metrics::{CounterSnapshot, MetricsAggregator, MetricsSnapshot};
pub use prober::HealthProber;
pub use registry::{
    BackendRegistry, BackendSnapshot, BackendStats, CircuitBreakerSnapshot, CircuitBreakerState,
    HealthState,
};
pub use score::{calculate_region_score, score_backend};
pub use selector::BackendSelector;
pub use service::RouterService;

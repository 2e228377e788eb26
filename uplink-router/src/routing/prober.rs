use futures::future::join_all;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};
use uplink_core::config::{Backend, RouterConfig};
use uplink_core::transport::{RequestOptions, Transport, TransportError};

use super::interceptor::InterceptorChain;
use super::registry::BackendRegistry;

/// 健康探测器
///
/// 对注册表中的后端发起轻量探测请求并把结果写回统计。
/// 熔断中的后端被跳过；冷却期已过的先复位再参与本轮探测。
pub struct HealthProber {
    registry: Arc<BackendRegistry>,
    transport: Arc<dyn Transport>,
    interceptors: Arc<InterceptorChain>,
}

impl HealthProber {
    pub fn new(
        registry: Arc<BackendRegistry>,
        transport: Arc<dyn Transport>,
        interceptors: Arc<InterceptorChain>,
    ) -> Self {
        Self {
            registry,
            transport,
            interceptors,
        }
    }

    /// 执行一轮完整的健康探测
    ///
    /// 所有探测并发进行、互相独立，单个探测的超时或失败
    /// 不会阻塞也不会取消其他探测。
    pub async fn probe_all(&self, config: &RouterConfig) {
        let cooldown = config.circuit_breaker_cooldown();
        let backends = self.registry.all();
        debug!("Starting health probe pass for {} backends", backends.len());

        let mut probes = Vec::with_capacity(backends.len());
        for (backend, stats) in backends {
            if stats.circuit_breaker.tripped {
                if stats.circuit_breaker.is_open(cooldown) {
                    debug!("Skipping circuit-tripped backend: {}", backend.url);
                    continue;
                }
                // 冷却期已过：先复位，再和其他后端一起探测
                self.registry.reset_breaker_if_cooled(&backend.url, cooldown);
            }
            probes.push(self.probe_one(backend, config));
        }

        join_all(probes).await;
    }

    /// 探测单个后端
    ///
    /// 探测请求同样经过请求拦截器链；任何失败（包括拦截器拒绝
    /// 和超时）都只折算进该后端的统计，从不向上传播。
    async fn probe_one(&self, backend: Backend, config: &RouterConfig) {
        let url = backend.url.clone();
        let threshold = config.circuit_breaker_threshold;

        let options = RequestOptions {
            method: Some(config.health_check_method.clone()),
            ..RequestOptions::default()
        };
        let options = match self.interceptors.apply_request(options) {
            Ok(options) => options,
            Err(e) => {
                warn!("Health probe interceptor rejected backend: {} - {}", url, e);
                self.registry.record_failure(&url, &e.to_string(), threshold);
                return;
            }
        };

        let probe_url = backend.endpoint_url(&config.health_check_endpoint);
        let started = Instant::now();

        match tokio::time::timeout(
            config.health_check_timeout(),
            self.transport.send(&probe_url, &options),
        )
        .await
        {
            Ok(Ok(response)) if response.is_success => {
                let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                self.registry.record_success(&url, latency_ms);
                debug!(
                    "Health probe succeeded for backend: {} ({:.0}ms)",
                    url, latency_ms
                );
            }
            Ok(Ok(response)) => {
                let error = TransportError::UnexpectedStatus(response.status);
                warn!("Health probe failed for backend: {} - {}", url, error);
                self.registry.record_failure(&url, &error.to_string(), threshold);
            }
            Ok(Err(error)) => {
                warn!("Health probe failed for backend: {} - {}", url, error);
                self.registry.record_failure(&url, &error.to_string(), threshold);
            }
            Err(_) => {
                let error = TransportError::Timeout(config.health_check_timeout_ms);
                warn!(
                    "Health probe timed out for backend: {} ({}ms)",
                    url, config.health_check_timeout_ms
                );
                self.registry.record_failure(&url, &error.to_string(), threshold);
            }
        }
    }
}

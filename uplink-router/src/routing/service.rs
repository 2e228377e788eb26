use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uplink_core::config::{BackendSpec, Config, ConfigPatch, RouterConfig};
use uplink_core::geo::{GeoLocator, HttpGeoLocator, UserLocation};
use uplink_core::transport::{HttpTransport, RequestOptions, Transport, TransportResponse};

use super::error::RouterError;
use super::interceptor::{
    ErrorInterceptor, InterceptorChain, RequestInterceptor, ResponseInterceptor,
};
use super::metrics::{MetricsAggregator, MetricsSnapshot};
use super::prober::HealthProber;
use super::registry::{BackendRegistry, BackendSnapshot};
use super::selector::BackendSelector;

/// 路由服务
///
/// 把注册表、探测器、选择器、指标和拦截器链组合成一个
/// 显式构造、显式传递的路由器实例，调用方通过普通所有权共享它。
/// 请求经 `execute` 发往当前最优后端，失败时按指数退避重试；
/// 连续重试次数攒满预算会强制触发一轮探测和重新选择。
pub struct RouterService {
    registry: Arc<BackendRegistry>,
    selector: Arc<BackendSelector>,
    prober: Arc<HealthProber>,
    metrics: Arc<MetricsAggregator>,
    interceptors: Arc<InterceptorChain>,
    config: Arc<RwLock<RouterConfig>>,
    user_location: Arc<RwLock<Option<UserLocation>>>,
    geo: Arc<dyn GeoLocator>,
    transport: Arc<dyn Transport>,
    /// 跨请求累计的连续重试计数，成功重选后清零
    retry_counter: Arc<AtomicU32>,
    is_running: AtomicBool,
    probe_handle: Mutex<Option<JoinHandle<()>>>,
}

impl RouterService {
    /// 用默认的 HTTP 传输和地理位置探测器创建路由服务
    pub fn new(config: Config) -> Result<Self, RouterError> {
        let geo = Arc::new(HttpGeoLocator::new(&config.settings.geo_lookup_url));
        Self::with_parts(config, Arc::new(HttpTransport::new()), geo)
    }

    /// 用外部注入的传输与地理位置探测器创建路由服务
    ///
    /// 测试和嵌入方通过这里替换网络实现。
    pub fn with_parts(
        config: Config,
        transport: Arc<dyn Transport>,
        geo: Arc<dyn GeoLocator>,
    ) -> Result<Self, RouterError> {
        // 配置和后端列表都在构造期一次性校验
        config.settings.validate()?;
        let registry = Arc::new(BackendRegistry::new(&config.backends)?);

        let interceptors = Arc::new(InterceptorChain::new());
        let selector = Arc::new(BackendSelector::new(registry.clone()));
        let prober = Arc::new(HealthProber::new(
            registry.clone(),
            transport.clone(),
            interceptors.clone(),
        ));

        info!("Router service created with {} backends", registry.len());

        Ok(Self {
            registry,
            selector,
            prober,
            metrics: Arc::new(MetricsAggregator::new()),
            interceptors,
            config: Arc::new(RwLock::new(config.settings)),
            user_location: Arc::new(RwLock::new(None)),
            geo,
            transport,
            retry_counter: Arc::new(AtomicU32::new(0)),
            is_running: AtomicBool::new(false),
            probe_handle: Mutex::new(None),
        })
    }

    /// 启动路由服务
    ///
    /// 立即执行一轮探测并完成首次选择，然后启动周期性探测任务。
    /// 重复调用不产生效果。
    pub async fn start(&self) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            warn!("Router service already running");
            return;
        }
        info!("Starting router service");

        if self.config.read().enable_regional_routing {
            self.spawn_location_lookup();
        }

        self.probe_now().await;
        *self.probe_handle.lock() = Some(self.spawn_probe_loop());

        info!("Router service started successfully");
    }

    /// 停止路由服务
    ///
    /// 取消探测定时任务、清空当前选择并把统计归零；
    /// 已在途的 `execute` 调用不受影响。可重复调用。
    pub fn shutdown(&self) {
        let was_running = self.is_running.swap(false, Ordering::SeqCst);
        if let Some(handle) = self.probe_handle.lock().take() {
            handle.abort();
        }
        self.selector.clear();
        self.registry.reset_stats();
        if was_running {
            info!("Router service stopped");
        }
    }

    /// 服务当前是否在运行
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// 立即执行一轮探测并重新选择
    ///
    /// 重选成功时清零连续重试计数。
    pub async fn probe_now(&self) {
        let cfg = self.config.read().clone();
        self.prober.probe_all(&cfg).await;
        let location = self.user_location.read().clone();
        if self.selector.reselect(&cfg, location.as_ref()).is_some() {
            self.retry_counter.store(0, Ordering::SeqCst);
        }
    }

    /// 执行一次带重试的请求
    ///
    /// 流程：确保有当前选择（必要时先探测）、合并默认选项、
    /// 过请求拦截器、发送并计量、按结果更新统计与指标。
    /// 传输失败按 `min(initial * 2^attempt, max)` 退避后重试，
    /// 重试用的是重试时刻的当前选择，未必是刚失败的那个后端。
    pub async fn execute(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<TransportResponse, RouterError> {
        let max_attempts = self.config.read().max_retry_attempts;
        let mut attempt: u32 = 0;

        loop {
            if attempt == 0 && self.selector.current().is_none() {
                debug!("No backend selected, forcing probe pass before first attempt");
                self.probe_now().await;
            }

            let Some(url) = self.selector.current() else {
                return Err(RouterError::NoAvailableBackend);
            };

            let cfg = self.config.read().clone();
            let merged = options.clone().merged_over(&cfg.default_request_options);
            // 拦截器拒绝的请求从未接触后端，不计入任何统计，也不重试
            let merged = self.interceptors.apply_request(merged)?;

            let Some((backend, _)) = self.registry.get(&url) else {
                // 选择指向的后端已被整体替换，视同没有可用选择
                return Err(RouterError::NoAvailableBackend);
            };
            let request_url = backend.endpoint_url(path);

            debug!(
                "Sending request to backend: {} (attempt {}/{})",
                request_url, attempt, max_attempts
            );
            let started = Instant::now();

            match self.transport.send(&request_url, &merged).await {
                Ok(response) => {
                    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                    self.registry.record_success(&url, latency_ms);
                    self.metrics.record(&url, path, true, latency_ms);
                    return self.interceptors.apply_response(response);
                }
                Err(transport_error) => {
                    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                    self.registry.record_failure(
                        &url,
                        &transport_error.to_string(),
                        cfg.circuit_breaker_threshold,
                    );
                    self.metrics.record(&url, path, false, latency_ms);
                    let processed = self
                        .interceptors
                        .apply_error(RouterError::Transport(transport_error));

                    if attempt < max_attempts {
                        let retries = self.retry_counter.fetch_add(1, Ordering::SeqCst) + 1;
                        if retries >= max_attempts {
                            warn!(
                                "Consecutive retry budget exhausted, forcing probe and reselection"
                            );
                            self.probe_now().await;
                        }
                        let delay = retry_delay(
                            attempt,
                            cfg.initial_retry_delay_ms,
                            cfg.max_retry_delay_ms,
                        );
                        warn!(
                            "Request to {} failed: {} - retrying in {:?}",
                            url, processed, delay
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    } else {
                        error!("Request failed after {} attempts: {}", attempt + 1, processed);
                        return Err(processed);
                    }
                }
            }
        }
    }

    /// 发送 GET 请求
    ///
    /// 只在调用方未显式指定方法时填入 GET。
    pub async fn get(
        &self,
        path: &str,
        mut options: RequestOptions,
    ) -> Result<TransportResponse, RouterError> {
        options.method.get_or_insert_with(|| "GET".to_string());
        self.execute(path, options).await
    }

    /// 发送 POST 请求
    ///
    /// 方法与请求体都遵循调用方优先的原则。
    pub async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
        mut options: RequestOptions,
    ) -> Result<TransportResponse, RouterError> {
        options.method.get_or_insert_with(|| "POST".to_string());
        options.body.get_or_insert(body);
        self.execute(path, options).await
    }

    /// 通用请求入口，`execute` 的别名
    pub async fn request(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<TransportResponse, RouterError> {
        self.execute(path, options).await
    }

    /// 注册请求拦截器
    pub fn add_request_interceptor<I: RequestInterceptor + 'static>(&self, interceptor: I) {
        self.interceptors.add_request(interceptor);
    }

    /// 注册响应拦截器
    pub fn add_response_interceptor<I: ResponseInterceptor + 'static>(&self, interceptor: I) {
        self.interceptors.add_response(interceptor);
    }

    /// 注册错误拦截器
    pub fn add_error_interceptor<I: ErrorInterceptor + 'static>(&self, interceptor: I) {
        self.interceptors.add_error(interceptor);
    }

    /// 当前全部后端的统计快照
    pub fn get_backend_stats(&self) -> Vec<BackendSnapshot> {
        self.registry.snapshot()
    }

    /// 当前指标快照
    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// 已探测到的用户位置
    ///
    /// 未启用地域路由或探测尚未完成时为 `None`。
    pub fn get_user_location(&self) -> Option<UserLocation> {
        self.user_location.read().clone()
    }

    /// 当前选中的后端 URL
    pub fn current_backend(&self) -> Option<String> {
        self.selector.current()
    }

    /// 当前生效的配置副本
    pub fn get_config(&self) -> RouterConfig {
        self.config.read().clone()
    }

    /// 应用一份部分配置
    ///
    /// 校验失败时原配置保持不变；探测间隔发生实际变化时
    /// 重启探测定时任务，下一轮探测按新间隔触发。
    pub fn update_config(&self, patch: &ConfigPatch) -> Result<(), RouterError> {
        let interval_changed = {
            let mut config = self.config.write();
            let mut updated = config.clone();
            patch.apply_to(&mut updated);
            updated.validate()?;
            let changed = updated.health_check_interval_ms != config.health_check_interval_ms;
            *config = updated;
            changed
        };

        if interval_changed && self.is_running() {
            info!("Health check interval changed, restarting probe timer");
            self.restart_probe_loop();
        }
        Ok(())
    }

    /// 整体替换后端列表
    ///
    /// 新列表统计从零开始，当前选择被清空，
    /// 下一次请求或探测会重新选择。
    pub fn reconfigure_backends(&self, specs: &[BackendSpec]) -> Result<(), RouterError> {
        self.registry.replace_all(specs)?;
        self.selector.clear();
        info!("Backend set replaced ({} backends)", self.registry.len());
        Ok(())
    }

    fn spawn_location_lookup(&self) {
        let geo = self.geo.clone();
        let user_location = self.user_location.clone();
        tokio::spawn(async move {
            match geo.locate().await {
                Ok(location) => {
                    info!(
                        "User location detected: {} / {}",
                        location.country, location.region
                    );
                    *user_location.write() = Some(location);
                }
                Err(e) => {
                    // 定位失败只降级地域评分，不算错误
                    warn!("User location lookup failed: {}", e);
                    *user_location.write() = Some(UserLocation::unknown());
                }
            }
        });
    }

    fn spawn_probe_loop(&self) -> JoinHandle<()> {
        let prober = self.prober.clone();
        let selector = self.selector.clone();
        let config = self.config.clone();
        let user_location = self.user_location.clone();
        let retry_counter = self.retry_counter.clone();

        tokio::spawn(async move {
            let period = config.read().health_check_interval();
            let mut ticker = tokio::time::interval(period);
            // 首个 tick 立即完成，消费掉它让首轮周期探测落在一个完整间隔之后
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let cfg = config.read().clone();
                prober.probe_all(&cfg).await;
                let location = user_location.read().clone();
                if selector.reselect(&cfg, location.as_ref()).is_some() {
                    retry_counter.store(0, Ordering::SeqCst);
                }
            }
        })
    }

    fn restart_probe_loop(&self) {
        let mut handle = self.probe_handle.lock();
        if let Some(old) = handle.take() {
            old.abort();
        }
        *handle = Some(self.spawn_probe_loop());
    }
}

impl Drop for RouterService {
    fn drop(&mut self) {
        if let Some(handle) = self.probe_handle.lock().take() {
            handle.abort();
        }
    }
}

/// 第 `attempt` 次重试前的等待时长
fn retry_delay(attempt: u32, initial_ms: u64, max_ms: u64) -> Duration {
    Duration::from_millis(
        initial_ms
            .saturating_mul(2u64.saturating_pow(attempt))
            .min(max_ms),
    )
}

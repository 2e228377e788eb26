use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};
use uplink_core::config::{validate_backend_specs, Backend, BackendSpec, ConfigError};

/// 后端健康状态
///
/// 由成功率推导得出，不单独存储任何隐式状态。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// 尚未有任何请求记录
    #[default]
    Unknown,
    /// 成功率 > 0.9
    Healthy,
    /// 成功率 > 0.7
    Degraded,
    /// 其余情况
    Unhealthy,
}

impl HealthState {
    /// 根据请求计数推导健康状态
    ///
    /// 这是一个纯函数：相同的计数永远得到相同的结果。
    pub fn from_counters(requests: u64, successes: u64) -> Self {
        if requests == 0 {
            return HealthState::Unknown;
        }
        let rate = successes as f64 / requests as f64;
        if rate > 0.9 {
            HealthState::Healthy
        } else if rate > 0.7 {
            HealthState::Degraded
        } else {
            HealthState::Unhealthy
        }
    }
}

/// 熔断器状态
///
/// 连续失败达到阈值后跳闸，冷却期结束后自动复位。
/// 没有半开试探阶段：冷却期一过即重新参与探测与选择。
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerState {
    /// 是否已跳闸
    pub tripped: bool,
    /// 跳闸时刻（单调时钟，用于冷却期计算）
    pub tripped_at: Option<Instant>,
    /// 跳闸时刻（挂钟时间，仅用于对外快照）
    pub tripped_at_utc: Option<DateTime<Utc>>,
    /// 当前连续失败次数
    pub consecutive_failures: u32,
}

impl CircuitBreakerState {
    /// 判断熔断器当前是否仍然阻断该后端
    ///
    /// 跳闸且冷却期未满时返回 true。冷却期一旦结束，
    /// 即便存储的状态还未被复位，读取方也视其为可用。
    pub fn is_open(&self, cooldown: Duration) -> bool {
        match (self.tripped, self.tripped_at) {
            (true, Some(at)) => at.elapsed() < cooldown,
            (true, None) => true,
            _ => false,
        }
    }

    /// 复位熔断器，连续失败计数清零
    pub fn reset(&mut self) {
        self.tripped = false;
        self.tripped_at = None;
        self.tripped_at_utc = None;
        self.consecutive_failures = 0;
    }
}

/// 单个后端的运行期统计
///
/// 只由健康探测器和请求管线在各自刚刚访问过的后端上更新，
/// 选择器只读。
#[derive(Debug, Clone, Default)]
pub struct BackendStats {
    /// 总请求数（成功 + 失败）
    pub requests: u64,
    /// 成功次数
    pub successes: u64,
    /// 失败次数
    pub failures: u64,
    /// 成功请求的延迟总和（毫秒），失败不计入
    pub total_latency_success_ms: f64,
    /// 最近一次失败的错误描述
    pub last_error: Option<String>,
    /// 最近一次收到响应（或判定失败）的时间
    pub last_response_at: Option<DateTime<Utc>>,
    /// 推导出的健康状态
    pub health: HealthState,
    /// 熔断器状态
    pub circuit_breaker: CircuitBreakerState,
}

impl BackendStats {
    /// 平均成功延迟（毫秒），没有成功记录时为 0
    pub fn avg_latency_ms(&self) -> f64 {
        if self.successes > 0 {
            self.total_latency_success_ms / self.successes as f64
        } else {
            0.0
        }
    }

    /// 成功率，没有任何请求时视为 1
    pub fn success_rate(&self) -> f64 {
        if self.requests > 0 {
            self.successes as f64 / self.requests as f64
        } else {
            1.0
        }
    }
}

/// 对外暴露的单后端统计快照
#[derive(Debug, Clone, Serialize)]
pub struct BackendSnapshot {
    pub url: String,
    pub region: String,
    pub weight: f64,
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub avg_latency_ms: f64,
    pub success_rate: f64,
    pub health: HealthState,
    pub last_error: Option<String>,
    pub last_response_at: Option<DateTime<Utc>>,
    pub circuit_breaker: CircuitBreakerSnapshot,
}

/// 熔断器快照
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub tripped: bool,
    pub tripped_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

struct RegistryEntry {
    backend: Backend,
    stats: BackendStats,
}

struct RegistryState {
    entries: Vec<RegistryEntry>,
    index: HashMap<String, usize>,
}

/// 后端注册表
///
/// 持有规范化后的后端列表及其运行期统计，是两者唯一的数据所有者。
/// 所有读写都经过同一把映射级读写锁，锁从不跨越 await 点。
/// 条目在路由器生命周期内不会被单独移除，重新配置会整体替换。
pub struct BackendRegistry {
    state: RwLock<RegistryState>,
}

impl BackendRegistry {
    /// 校验并注册一组后端
    ///
    /// 列表为空、URL 重复或权重非法时返回 `ConfigError`。
    pub fn new(specs: &[BackendSpec]) -> Result<Self, ConfigError> {
        let state = Self::build_state(specs)?;
        Ok(Self {
            state: RwLock::new(state),
        })
    }

    /// 用一组新的后端整体替换现有注册表
    ///
    /// 替换后所有统计从零开始。
    pub fn replace_all(&self, specs: &[BackendSpec]) -> Result<(), ConfigError> {
        let new_state = Self::build_state(specs)?;
        *self.state.write() = new_state;
        Ok(())
    }

    fn build_state(specs: &[BackendSpec]) -> Result<RegistryState, ConfigError> {
        validate_backend_specs(specs)?;

        let mut entries = Vec::with_capacity(specs.len());
        let mut index = HashMap::with_capacity(specs.len());
        for spec in specs {
            let backend = spec.normalize();
            index.insert(backend.url.clone(), entries.len());
            entries.push(RegistryEntry {
                backend,
                stats: BackendStats::default(),
            });
        }
        Ok(RegistryState { entries, index })
    }

    /// 按 URL 查找后端及其统计，O(1)
    pub fn get(&self, url: &str) -> Option<(Backend, BackendStats)> {
        let state = self.state.read();
        let idx = *state.index.get(url)?;
        let entry = &state.entries[idx];
        Some((entry.backend.clone(), entry.stats.clone()))
    }

    /// 按注册顺序返回全部后端及其统计
    ///
    /// 顺序稳定，选择器依赖它做同分优先判定。
    pub fn all(&self) -> Vec<(Backend, BackendStats)> {
        self.state
            .read()
            .entries
            .iter()
            .map(|e| (e.backend.clone(), e.stats.clone()))
            .collect()
    }

    /// 已注册后端数量
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// 注册表是否为空
    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    /// 记录一次成功结果
    ///
    /// 累加延迟、清除最近错误、连续失败清零，并重新推导健康状态。
    pub fn record_success(&self, url: &str, latency_ms: f64) {
        let mut state = self.state.write();
        let Some(entry) = lookup_mut(&mut state, url) else {
            return;
        };
        let stats = &mut entry.stats;
        stats.requests += 1;
        stats.successes += 1;
        stats.total_latency_success_ms += latency_ms;
        stats.last_error = None;
        stats.last_response_at = Some(Utc::now());
        stats.circuit_breaker.consecutive_failures = 0;
        stats.health = HealthState::from_counters(stats.requests, stats.successes);
    }

    /// 记录一次失败结果
    ///
    /// 连续失败达到阈值时跳闸；已跳闸状态下继续失败会刷新跳闸时刻，
    /// 相当于延长冷却期。
    pub fn record_failure(&self, url: &str, error: &str, threshold: u32) {
        let mut state = self.state.write();
        let Some(entry) = lookup_mut(&mut state, url) else {
            return;
        };
        let stats = &mut entry.stats;
        stats.requests += 1;
        stats.failures += 1;
        stats.last_error = Some(error.to_string());
        stats.last_response_at = Some(Utc::now());
        stats.circuit_breaker.consecutive_failures += 1;

        if stats.circuit_breaker.consecutive_failures >= threshold {
            stats.circuit_breaker.tripped = true;
            stats.circuit_breaker.tripped_at = Some(Instant::now());
            stats.circuit_breaker.tripped_at_utc = Some(Utc::now());
            stats.health = HealthState::Unhealthy;
            warn!(
                "Circuit breaker activated for backend: {} ({} consecutive failures)",
                url, stats.circuit_breaker.consecutive_failures
            );
        }
    }

    /// 冷却期已过时复位熔断器
    ///
    /// 返回是否真的发生了复位。
    pub fn reset_breaker_if_cooled(&self, url: &str, cooldown: Duration) -> bool {
        let mut state = self.state.write();
        let Some(entry) = lookup_mut(&mut state, url) else {
            return false;
        };
        let breaker = &mut entry.stats.circuit_breaker;
        if breaker.tripped && !breaker.is_open(cooldown) {
            breaker.reset();
            info!("Circuit breaker reset for backend: {}", url);
            return true;
        }
        false
    }

    /// 清空所有后端的统计，保留注册条目本身
    pub fn reset_stats(&self) {
        let mut state = self.state.write();
        for entry in state.entries.iter_mut() {
            entry.stats = BackendStats::default();
        }
    }

    /// 生成全量统计快照
    pub fn snapshot(&self) -> Vec<BackendSnapshot> {
        self.state
            .read()
            .entries
            .iter()
            .map(|entry| {
                let stats = &entry.stats;
                BackendSnapshot {
                    url: entry.backend.url.clone(),
                    region: entry.backend.region.clone(),
                    weight: entry.backend.weight,
                    requests: stats.requests,
                    successes: stats.successes,
                    failures: stats.failures,
                    avg_latency_ms: stats.avg_latency_ms(),
                    success_rate: stats.success_rate(),
                    health: stats.health,
                    last_error: stats.last_error.clone(),
                    last_response_at: stats.last_response_at,
                    circuit_breaker: CircuitBreakerSnapshot {
                        tripped: stats.circuit_breaker.tripped,
                        tripped_at: stats.circuit_breaker.tripped_at_utc,
                        consecutive_failures: stats.circuit_breaker.consecutive_failures,
                    },
                }
            })
            .collect()
    }
}

fn lookup_mut<'a>(state: &'a mut RegistryState, url: &str) -> Option<&'a mut RegistryEntry> {
    let idx = *state.index.get(url)?;
    state.entries.get_mut(idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uplink_core::config::BackendSpec;

    fn create_test_registry() -> BackendRegistry {
        let specs = vec![
            BackendSpec::Url("https://api-a.example.com".to_string()),
            BackendSpec::Url("https://api-b.example.com".to_string()),
        ];
        BackendRegistry::new(&specs).unwrap()
    }

    #[test]
    fn test_health_state_from_counters() {
        assert_eq!(HealthState::from_counters(0, 0), HealthState::Unknown);
        assert_eq!(HealthState::from_counters(100, 95), HealthState::Healthy);
        assert_eq!(HealthState::from_counters(100, 80), HealthState::Degraded);
        assert_eq!(HealthState::from_counters(100, 50), HealthState::Unhealthy);
        // 边界值：0.9 和 0.7 本身都不满足严格大于
        assert_eq!(HealthState::from_counters(10, 9), HealthState::Unhealthy);
        assert_eq!(HealthState::from_counters(10, 7), HealthState::Unhealthy);
        assert_eq!(HealthState::from_counters(10, 8), HealthState::Degraded);
    }

    #[test]
    fn test_registration_rejects_duplicates() {
        let specs = vec![
            BackendSpec::Url("https://api.example.com".to_string()),
            BackendSpec::Url("https://api.example.com".to_string()),
        ];
        assert!(BackendRegistry::new(&specs).is_err());
    }

    #[test]
    fn test_registration_order_is_stable() {
        let registry = create_test_registry();
        let all = registry.all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0.url, "https://api-a.example.com");
        assert_eq!(all[1].0.url, "https://api-b.example.com");
    }

    #[test]
    fn test_counters_stay_consistent() {
        let registry = create_test_registry();
        let url = "https://api-a.example.com";

        registry.record_success(url, 120.0);
        registry.record_failure(url, "connection refused", 5);
        registry.record_success(url, 80.0);

        let (_, stats) = registry.get(url).unwrap();
        assert_eq!(stats.requests, 3);
        assert_eq!(stats.successes + stats.failures, stats.requests);
        assert_eq!(stats.total_latency_success_ms, 200.0);
        assert_eq!(stats.avg_latency_ms(), 100.0);
        assert!(stats.last_error.is_none());
        assert!(stats.last_response_at.is_some());
    }

    #[test]
    fn test_failure_latency_not_accumulated() {
        let registry = create_test_registry();
        let url = "https://api-a.example.com";

        registry.record_failure(url, "timeout", 5);
        let (_, stats) = registry.get(url).unwrap();
        assert_eq!(stats.total_latency_success_ms, 0.0);
        assert_eq!(stats.avg_latency_ms(), 0.0);
        assert_eq!(stats.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_breaker_trips_at_threshold() {
        let registry = create_test_registry();
        let url = "https://api-a.example.com";

        for _ in 0..2 {
            registry.record_failure(url, "boom", 3);
        }
        let (_, stats) = registry.get(url).unwrap();
        assert!(!stats.circuit_breaker.tripped);

        registry.record_failure(url, "boom", 3);
        let (_, stats) = registry.get(url).unwrap();
        assert!(stats.circuit_breaker.tripped);
        assert_eq!(stats.health, HealthState::Unhealthy);
        assert_eq!(stats.circuit_breaker.consecutive_failures, 3);
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let registry = create_test_registry();
        let url = "https://api-a.example.com";

        registry.record_failure(url, "boom", 5);
        registry.record_failure(url, "boom", 5);
        registry.record_success(url, 50.0);

        let (_, stats) = registry.get(url).unwrap();
        assert_eq!(stats.circuit_breaker.consecutive_failures, 0);
        assert!(!stats.circuit_breaker.tripped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_resets_after_cooldown() {
        let registry = create_test_registry();
        let url = "https://api-a.example.com";
        let cooldown = Duration::from_millis(30_000);

        registry.record_failure(url, "boom", 1);
        let (_, stats) = registry.get(url).unwrap();
        assert!(stats.circuit_breaker.is_open(cooldown));
        assert!(!registry.reset_breaker_if_cooled(url, cooldown));

        tokio::time::advance(Duration::from_millis(30_000)).await;

        let (_, stats) = registry.get(url).unwrap();
        assert!(!stats.circuit_breaker.is_open(cooldown));
        assert!(registry.reset_breaker_if_cooled(url, cooldown));

        let (_, stats) = registry.get(url).unwrap();
        assert!(!stats.circuit_breaker.tripped);
        assert_eq!(stats.circuit_breaker.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_failures_extend_cooldown() {
        let registry = create_test_registry();
        let url = "https://api-a.example.com";
        let cooldown = Duration::from_millis(10_000);

        registry.record_failure(url, "boom", 1);
        tokio::time::advance(Duration::from_millis(8_000)).await;
        // 跳闸状态下再次失败会刷新跳闸时刻
        registry.record_failure(url, "boom", 1);
        tokio::time::advance(Duration::from_millis(8_000)).await;

        let (_, stats) = registry.get(url).unwrap();
        assert!(stats.circuit_breaker.is_open(cooldown));
    }

    #[test]
    fn test_reset_stats_keeps_entries() {
        let registry = create_test_registry();
        registry.record_success("https://api-a.example.com", 10.0);
        registry.reset_stats();

        assert_eq!(registry.len(), 2);
        let (_, stats) = registry.get("https://api-a.example.com").unwrap();
        assert_eq!(stats.requests, 0);
        assert_eq!(stats.health, HealthState::Unknown);
    }

    #[test]
    fn test_replace_all_starts_fresh() {
        let registry = create_test_registry();
        registry.record_success("https://api-a.example.com", 10.0);

        let specs = vec![BackendSpec::Url("https://api-c.example.com".to_string())];
        registry.replace_all(&specs).unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.get("https://api-a.example.com").is_none());
        let (backend, stats) = registry.get("https://api-c.example.com").unwrap();
        assert_eq!(backend.region, "global");
        assert_eq!(stats.requests, 0);
    }

    #[test]
    fn test_snapshot_reports_derived_fields() {
        let registry = create_test_registry();
        let url = "https://api-a.example.com";
        registry.record_success(url, 100.0);
        registry.record_success(url, 200.0);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].avg_latency_ms, 150.0);
        assert_eq!(snapshot[0].success_rate, 1.0);
        assert_eq!(snapshot[0].health, HealthState::Healthy);
        // 未被访问过的后端给出中性默认值
        assert_eq!(snapshot[1].requests, 0);
        assert_eq!(snapshot[1].success_rate, 1.0);
        assert_eq!(snapshot[1].health, HealthState::Unknown);
    }
}

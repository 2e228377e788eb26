use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;

/// 单维度的请求计数器
#[derive(Debug, Clone, Default)]
struct Counters {
    requests: u64,
    successes: u64,
    failures: u64,
    total_latency_success_ms: f64,
    last_latency_ms: f64,
}

impl Counters {
    fn record(&mut self, success: bool, latency_ms: f64) {
        self.requests += 1;
        if success {
            self.successes += 1;
            self.total_latency_success_ms += latency_ms;
        } else {
            self.failures += 1;
        }
        // 无论成败都刷新最近延迟，便于观察异常请求的耗时
        self.last_latency_ms = latency_ms;
    }

    fn to_snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            requests: self.requests,
            successes: self.successes,
            failures: self.failures,
            success_rate: if self.requests > 0 {
                self.successes as f64 / self.requests as f64
            } else {
                1.0
            },
            avg_latency_ms: if self.successes > 0 {
                self.total_latency_success_ms / self.successes as f64
            } else {
                0.0
            },
            last_latency_ms: self.last_latency_ms,
        }
    }
}

/// 计数器的导出视图，含派生字段
#[derive(Debug, Clone, Serialize)]
pub struct CounterSnapshot {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub last_latency_ms: f64,
}

/// 全量指标快照
///
/// 任何时刻都可安全生成：没有数据时成功率取 1、平均延迟取 0。
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    #[serde(flatten)]
    pub overall: CounterSnapshot,
    pub by_backend: HashMap<String, CounterSnapshot>,
    pub by_path: HashMap<String, CounterSnapshot>,
}

#[derive(Default)]
struct MetricsInner {
    overall: Counters,
    by_backend: HashMap<String, Counters>,
    by_path: HashMap<String, Counters>,
}

/// 指标聚合器
///
/// 按全局、后端、路径三个维度累计请求结果，只写不删，
/// 对外仅提供只读快照。
#[derive(Default)]
pub struct MetricsAggregator {
    inner: RwLock<MetricsInner>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次请求结果
    ///
    /// 成功时延迟计入总和，失败只计次数。
    pub fn record(&self, backend_url: &str, path: &str, success: bool, latency_ms: f64) {
        let mut inner = self.inner.write();
        inner.overall.record(success, latency_ms);
        inner
            .by_backend
            .entry(backend_url.to_string())
            .or_default()
            .record(success, latency_ms);
        inner
            .by_path
            .entry(path.to_string())
            .or_default()
            .record(success, latency_ms);
    }

    /// 生成当前指标的只读快照
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.read();
        MetricsSnapshot {
            overall: inner.overall.to_snapshot(),
            by_backend: inner
                .by_backend
                .iter()
                .map(|(k, v)| (k.clone(), v.to_snapshot()))
                .collect(),
            by_path: inner
                .by_path
                .iter()
                .map(|(k, v)| (k.clone(), v.to_snapshot()))
                .collect(),
        }
    }
}

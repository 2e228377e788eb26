use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uplink_core::config::RouterConfig;
use uplink_core::geo::UserLocation;

use super::registry::BackendRegistry;
use super::score::score_backend;

/// 后端选择器
///
/// 扫描注册表、逐个评分并缓存当前最优后端。
/// 只读取统计，从不修改；熔断器的冷却判定用读取时刻的时钟完成，
/// 因此冷却期一过后端立即重新参与选择，无需等待状态被复位。
pub struct BackendSelector {
    registry: Arc<BackendRegistry>,
    selected: RwLock<Option<String>>,
}

impl BackendSelector {
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self {
            registry,
            selected: RwLock::new(None),
        }
    }

    /// 当前缓存的选择
    pub fn current(&self) -> Option<String> {
        self.selected.read().clone()
    }

    /// 清空当前选择
    pub fn clear(&self) {
        *self.selected.write() = None;
    }

    /// 重新选择最优后端
    ///
    /// 按注册顺序遍历未熔断的后端，取严格最大分；
    /// 同分时先注册者胜出。没有可用后端时清空选择并返回 `None`。
    pub fn reselect(
        &self,
        config: &RouterConfig,
        user_location: Option<&UserLocation>,
    ) -> Option<String> {
        let cooldown = config.circuit_breaker_cooldown();
        let mut best: Option<(String, f64)> = None;

        for (backend, stats) in self.registry.all() {
            if stats.circuit_breaker.is_open(cooldown) {
                debug!("Excluding circuit-tripped backend: {}", backend.url);
                continue;
            }

            let score = score_backend(
                &backend,
                &stats,
                &config.scoring_weights,
                user_location,
                config.enable_regional_routing,
            );
            debug!("Backend {} scored {:.3}", backend.url, score);

            let better = match &best {
                Some((_, best_score)) => score > *best_score,
                None => true,
            };
            if better {
                best = Some((backend.url, score));
            }
        }

        match best {
            Some((url, score)) => {
                info!("Selected optimal backend: {} (score: {:.2})", url, score);
                *self.selected.write() = Some(url.clone());
                Some(url)
            }
            None => {
                warn!("No healthy backends available");
                *self.selected.write() = None;
                None
            }
        }
    }
}

use once_cell::sync::Lazy;
use std::collections::HashMap;
use uplink_core::config::{Backend, ScoringWeights};
use uplink_core::geo::UserLocation;

use super::registry::BackendStats;

/// 大洲与国家代码对照表，用于地域评分的同洲匹配
static CONTINENT_COUNTRIES: Lazy<HashMap<&'static str, &'static [&'static str]>> =
    Lazy::new(|| {
        let mut map: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
        map.insert("europe", &["de", "fr", "it", "es", "uk"]);
        map.insert("asia", &["cn", "jp", "kr", "in", "sg"]);
        map.insert("northamerica", &["us", "ca", "mx"]);
        map.insert("southamerica", &["br", "ar", "cl"]);
        map
    });

/// 计算单个后端的综合评分，分值越高越优
///
/// 纯函数，无副作用。四个加权项：
/// - 延迟项：有成功记录时取平均延迟的倒数，否则取 1
///   （没有数据按有利处理，避免新后端被饿死）
/// - 成功率项：无请求记录时视为 1
/// - 权重项：后端配置的静态权重原值
/// - 地域项：仅在启用地域路由且用户位置已知时参与，否则为 0
///
/// 熔断中的后端由调用方在评分前排除，而不是在这里扣分。
pub fn score_backend(
    backend: &Backend,
    stats: &BackendStats,
    weights: &ScoringWeights,
    user_location: Option<&UserLocation>,
    regional_routing: bool,
) -> f64 {
    let avg_latency = stats.avg_latency_ms();
    let latency_term = if stats.successes > 0 && avg_latency > 0.0 {
        1.0 / avg_latency
    } else {
        1.0
    };

    let success_rate_term = stats.success_rate();

    let region_term = match user_location {
        Some(location) if regional_routing && location.is_known() => {
            calculate_region_score(&backend.region, location)
        }
        _ => 0.0,
    };

    weights.latency * latency_term
        + weights.success_rate * success_rate_term
        + weights.weight * backend.weight
        + weights.region * region_term
}

/// 计算后端地域与用户位置的匹配度
///
/// 匹配优先级从高到低：
/// 精确匹配 1.0、用户地域前缀 0.8、国家代码 0.6、
/// 同洲 0.4、`"global"` 兜底 0.2，其余为 0。
pub fn calculate_region_score(backend_region: &str, location: &UserLocation) -> f64 {
    let region = backend_region.to_lowercase();
    let user_region = location.region.to_lowercase();
    let user_country = location.country.to_lowercase();

    if region == user_region {
        return 1.0;
    }
    if !user_region.is_empty() && region.starts_with(&user_region) {
        return 0.8;
    }
    if region == user_country {
        return 0.6;
    }
    if continent_match(&region, &user_country) {
        return 0.4;
    }
    if region == "global" {
        return 0.2;
    }
    0.0
}

fn continent_match(region: &str, user_country: &str) -> bool {
    CONTINENT_COUNTRIES
        .iter()
        .any(|(continent, countries)| region.contains(continent) && countries.contains(&user_country))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uplink_core::config::BackendSpec;

    fn create_test_backend(region: &str, weight: f64) -> Backend {
        let mut backend = BackendSpec::Url("https://api.example.com".to_string()).normalize();
        backend.region = region.to_string();
        backend.weight = weight;
        backend
    }

    fn stats_with(requests: u64, successes: u64, total_latency_ms: f64) -> BackendStats {
        BackendStats {
            requests,
            successes,
            failures: requests - successes,
            total_latency_success_ms: total_latency_ms,
            ..BackendStats::default()
        }
    }

    fn location(country: &str, region: &str) -> UserLocation {
        UserLocation {
            country: country.to_string(),
            region: region.to_string(),
            ..UserLocation::unknown()
        }
    }

    #[test]
    fn test_lower_latency_scores_strictly_higher() {
        let backend = create_test_backend("global", 1.0);
        let weights = ScoringWeights::default();

        let fast = score_backend(&backend, &stats_with(10, 10, 100.0), &weights, None, false);
        let slow = score_backend(&backend, &stats_with(10, 10, 500.0), &weights, None, false);
        assert!(fast > slow);
    }

    #[test]
    fn test_higher_success_rate_scores_strictly_higher() {
        let backend = create_test_backend("global", 1.0);
        let weights = ScoringWeights::default();

        // 平均延迟保持一致，只改变成功率
        let good = score_backend(&backend, &stats_with(10, 9, 900.0), &weights, None, false);
        let bad = score_backend(&backend, &stats_with(10, 5, 500.0), &weights, None, false);
        assert!(good > bad);
    }

    #[test]
    fn test_untested_backend_is_not_penalized() {
        let backend = create_test_backend("global", 1.0);
        let weights = ScoringWeights::default();

        // 没有数据时延迟项和成功率项都取 1
        let fresh = score_backend(&backend, &BackendStats::default(), &weights, None, false);
        let expected = weights.latency * 1.0 + weights.success_rate * 1.0 + weights.weight * 1.0;
        assert!((fresh - expected).abs() < 1e-9);
    }

    #[test]
    fn test_weight_term_uses_configured_weight() {
        let weights = ScoringWeights::default();
        let light = create_test_backend("global", 1.0);
        let heavy = create_test_backend("global", 5.0);

        let light_score =
            score_backend(&light, &BackendStats::default(), &weights, None, false);
        let heavy_score =
            score_backend(&heavy, &BackendStats::default(), &weights, None, false);
        assert!(heavy_score > light_score);
    }

    #[test]
    fn test_region_match_levels() {
        let loc = location("de", "eu-west");

        assert_eq!(calculate_region_score("eu-west", &loc), 1.0);
        assert_eq!(calculate_region_score("EU-West", &loc), 1.0);
        assert_eq!(calculate_region_score("eu-west-2", &loc), 0.8);
        assert_eq!(calculate_region_score("de", &loc), 0.6);
        assert_eq!(calculate_region_score("europe-central", &loc), 0.4);
        assert_eq!(calculate_region_score("global", &loc), 0.2);
        assert_eq!(calculate_region_score("us-east", &loc), 0.0);
    }

    #[test]
    fn test_region_prefix_match() {
        let loc = location("fr", "eu");
        assert_eq!(calculate_region_score("eu-west", &loc), 0.8);
        assert_eq!(calculate_region_score("eu", &loc), 1.0);
    }

    #[test]
    fn test_continent_match_requires_listed_country() {
        let loc_in_table = location("jp", "kanto");
        let loc_not_in_table = location("au", "nsw");

        assert_eq!(calculate_region_score("asia-east", &loc_in_table), 0.4);
        assert_eq!(calculate_region_score("asia-east", &loc_not_in_table), 0.0);
    }

    #[test]
    fn test_region_term_zero_when_disabled_or_unknown() {
        let backend = create_test_backend("eu-west", 1.0);
        let weights = ScoringWeights::default();
        let loc = location("de", "eu-west");

        let disabled =
            score_backend(&backend, &BackendStats::default(), &weights, Some(&loc), false);
        let no_location =
            score_backend(&backend, &BackendStats::default(), &weights, None, true);
        let sentinel = score_backend(
            &backend,
            &BackendStats::default(),
            &weights,
            Some(&UserLocation::unknown()),
            true,
        );

        assert_eq!(disabled, no_location);
        assert_eq!(disabled, sentinel);
    }

    #[test]
    fn test_exact_region_beats_global_all_else_equal() {
        let weights = ScoringWeights::default();
        let loc = location("de", "eu-west");
        let regional = create_test_backend("eu-west", 1.0);
        let global = create_test_backend("global", 1.0);
        let stats = stats_with(10, 10, 1000.0);

        let regional_score = score_backend(&regional, &stats, &weights, Some(&loc), true);
        let global_score = score_backend(&global, &stats, &weights, Some(&loc), true);

        assert!(regional_score > global_score);
        assert!((regional_score - global_score - weights.region * 0.8).abs() < 1e-9);
    }
}

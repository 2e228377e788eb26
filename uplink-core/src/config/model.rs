use crate::transport::RequestOptions;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use thiserror::Error;

/// 配置错误
///
/// 构造或更新路由器时输入非法产生的致命错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Backend list must not be empty")]
    EmptyBackendList,

    #[error("Backend url must not be empty")]
    EmptyBackendUrl,

    #[error("Duplicate backend url: {0}")]
    DuplicateBackendUrl(String),

    #[error("Backend '{url}' has non-positive weight: {weight}")]
    NonPositiveWeight { url: String, weight: f64 },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// 主配置结构
///
/// 候选后端列表加路由器行为设置,可由代码构造或从TOML加载
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub backends: Vec<BackendSpec>,
    #[serde(default)]
    pub settings: RouterConfig,
}

impl Config {
    /// 使用默认设置构造配置
    pub fn with_backends(backends: Vec<BackendSpec>) -> Self {
        Self {
            backends,
            settings: RouterConfig::default(),
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_backend_specs(&self.backends)?;
        self.settings.validate()
    }
}

/// 后端声明
///
/// 支持字符串简写(仅url,区域与权重取默认值)或完整表格形式
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(untagged)]
pub enum BackendSpec {
    Url(String),
    Detailed(Backend),
}

impl BackendSpec {
    /// 规范化为后端描述符
    pub fn normalize(&self) -> Backend {
        match self {
            BackendSpec::Url(url) => Backend {
                url: url.clone(),
                region: default_region(),
                weight: default_weight(),
                metadata: HashMap::new(),
            },
            BackendSpec::Detailed(backend) => backend.clone(),
        }
    }

    /// 后端唯一标识
    pub fn url(&self) -> &str {
        match self {
            BackendSpec::Url(url) => url,
            BackendSpec::Detailed(backend) => &backend.url,
        }
    }
}

/// 后端描述符
///
/// url 为唯一标识,注册后不可变,仅能通过整体替换更新
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Backend {
    pub url: String,

    /// 地理区域标签,如 "us-west" 或 "global"
    #[serde(default = "default_region")]
    pub region: String,

    /// 静态权重,作为评分的一项
    #[serde(default = "default_weight")]
    pub weight: f64,

    /// 不透明的附加信息,路由器不解释其内容
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Backend {
    /// 拼接后端地址与请求路径
    pub fn endpoint_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// 路由器行为设置
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RouterConfig {
    /// 健康检查路径
    #[serde(default = "default_health_check_endpoint")]
    pub health_check_endpoint: String,

    /// 单次探测超时(毫秒)
    #[serde(default = "default_health_check_timeout_ms")]
    pub health_check_timeout_ms: u64,

    /// 周期探测间隔(毫秒)
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,

    /// 探测使用的HTTP方法
    #[serde(default = "default_health_check_method")]
    pub health_check_method: String,

    /// 单次请求的最大重试次数(不含首次尝试)
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    /// 首次重试延迟(毫秒)
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,

    /// 重试延迟上限(毫秒)
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    /// 连续失败多少次后熔断
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_threshold: u32,

    /// 熔断冷却时间(毫秒)
    #[serde(default = "default_circuit_breaker_cooldown_ms")]
    pub circuit_breaker_cooldown_ms: u64,

    /// 是否启用区域路由
    #[serde(default)]
    pub enable_regional_routing: bool,

    /// 评分权重
    #[serde(default)]
    pub scoring_weights: ScoringWeights,

    /// 每个出站请求的默认选项,在拦截器之前合并
    #[serde(default = "default_request_options")]
    pub default_request_options: RequestOptions,

    /// 地理位置查询地址
    #[serde(default = "default_geo_lookup_url")]
    pub geo_lookup_url: String,
}

impl RouterConfig {
    /// 验证设置的有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.health_check_endpoint.is_empty() {
            return Err(ConfigError::Invalid(
                "health_check_endpoint must not be empty".to_string(),
            ));
        }
        if self.health_check_method.is_empty() {
            return Err(ConfigError::Invalid(
                "health_check_method must not be empty".to_string(),
            ));
        }
        if self.health_check_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "health_check_timeout_ms must be positive".to_string(),
            ));
        }
        if self.health_check_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "health_check_interval_ms must be positive".to_string(),
            ));
        }
        if self.circuit_breaker_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker_threshold must be positive".to_string(),
            ));
        }
        self.scoring_weights.validate()
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn initial_retry_delay(&self) -> Duration {
        Duration::from_millis(self.initial_retry_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    pub fn circuit_breaker_cooldown(&self) -> Duration {
        Duration::from_millis(self.circuit_breaker_cooldown_ms)
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            health_check_endpoint: default_health_check_endpoint(),
            health_check_timeout_ms: default_health_check_timeout_ms(),
            health_check_interval_ms: default_health_check_interval_ms(),
            health_check_method: default_health_check_method(),
            max_retry_attempts: default_max_retry_attempts(),
            initial_retry_delay_ms: default_initial_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            circuit_breaker_threshold: default_circuit_breaker_threshold(),
            circuit_breaker_cooldown_ms: default_circuit_breaker_cooldown_ms(),
            enable_regional_routing: false,
            scoring_weights: ScoringWeights::default(),
            default_request_options: default_request_options(),
            geo_lookup_url: default_geo_lookup_url(),
        }
    }
}

/// 评分权重
///
/// 四个评分项的权重,均要求非负
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ScoringWeights {
    /// 延迟项权重
    #[serde(default = "default_latency_weight")]
    pub latency: f64,

    /// 成功率项权重
    #[serde(default = "default_success_rate_weight")]
    pub success_rate: f64,

    /// 后端静态权重项的权重
    #[serde(default = "default_server_weight")]
    pub weight: f64,

    /// 区域接近度项权重
    #[serde(default = "default_region_weight")]
    pub region: f64,
}

impl ScoringWeights {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let weights = [
            ("latency", self.latency),
            ("success_rate", self.success_rate),
            ("weight", self.weight),
            ("region", self.region),
        ];
        for (name, value) in weights {
            // NaN 同样视为非法
            if value < 0.0 || value.is_nan() {
                return Err(ConfigError::Invalid(format!(
                    "scoring weight '{}' must be non-negative, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            latency: default_latency_weight(),
            success_rate: default_success_rate_weight(),
            weight: default_server_weight(),
            region: default_region_weight(),
        }
    }
}

/// 配置的部分更新
///
/// 所有字段可选,仅覆盖提供的项
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ConfigPatch {
    pub health_check_endpoint: Option<String>,
    pub health_check_timeout_ms: Option<u64>,
    pub health_check_interval_ms: Option<u64>,
    pub health_check_method: Option<String>,
    pub max_retry_attempts: Option<u32>,
    pub initial_retry_delay_ms: Option<u64>,
    pub max_retry_delay_ms: Option<u64>,
    pub circuit_breaker_threshold: Option<u32>,
    pub circuit_breaker_cooldown_ms: Option<u64>,
    pub enable_regional_routing: Option<bool>,
    pub scoring_weights: Option<ScoringWeights>,
    pub default_request_options: Option<RequestOptions>,
    pub geo_lookup_url: Option<String>,
}

impl ConfigPatch {
    /// 覆盖到现有设置上
    pub fn apply_to(&self, config: &mut RouterConfig) {
        if let Some(v) = &self.health_check_endpoint {
            config.health_check_endpoint = v.clone();
        }
        if let Some(v) = self.health_check_timeout_ms {
            config.health_check_timeout_ms = v;
        }
        if let Some(v) = self.health_check_interval_ms {
            config.health_check_interval_ms = v;
        }
        if let Some(v) = &self.health_check_method {
            config.health_check_method = v.clone();
        }
        if let Some(v) = self.max_retry_attempts {
            config.max_retry_attempts = v;
        }
        if let Some(v) = self.initial_retry_delay_ms {
            config.initial_retry_delay_ms = v;
        }
        if let Some(v) = self.max_retry_delay_ms {
            config.max_retry_delay_ms = v;
        }
        if let Some(v) = self.circuit_breaker_threshold {
            config.circuit_breaker_threshold = v;
        }
        if let Some(v) = self.circuit_breaker_cooldown_ms {
            config.circuit_breaker_cooldown_ms = v;
        }
        if let Some(v) = self.enable_regional_routing {
            config.enable_regional_routing = v;
        }
        if let Some(v) = &self.scoring_weights {
            config.scoring_weights = v.clone();
        }
        if let Some(v) = &self.default_request_options {
            config.default_request_options = v.clone();
        }
        if let Some(v) = &self.geo_lookup_url {
            config.geo_lookup_url = v.clone();
        }
    }
}

/// 验证后端列表:非空、url非空且不重复、权重为正
pub fn validate_backend_specs(specs: &[BackendSpec]) -> Result<(), ConfigError> {
    if specs.is_empty() {
        return Err(ConfigError::EmptyBackendList);
    }

    let mut seen = HashSet::new();
    for spec in specs {
        let backend = spec.normalize();
        if backend.url.is_empty() {
            return Err(ConfigError::EmptyBackendUrl);
        }
        if backend.weight <= 0.0 || backend.weight.is_nan() {
            return Err(ConfigError::NonPositiveWeight {
                url: backend.url,
                weight: backend.weight,
            });
        }
        if !seen.insert(backend.url.clone()) {
            return Err(ConfigError::DuplicateBackendUrl(backend.url));
        }
    }
    Ok(())
}

fn default_region() -> String {
    "global".to_string()
}

fn default_weight() -> f64 {
    1.0
}

fn default_health_check_endpoint() -> String {
    "/health".to_string()
}

fn default_health_check_timeout_ms() -> u64 {
    3000
}

fn default_health_check_interval_ms() -> u64 {
    60_000
}

fn default_health_check_method() -> String {
    "HEAD".to_string()
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    1000
}

fn default_max_retry_delay_ms() -> u64 {
    30_000
}

fn default_circuit_breaker_threshold() -> u32 {
    5
}

fn default_circuit_breaker_cooldown_ms() -> u64 {
    30_000
}

fn default_latency_weight() -> f64 {
    0.6
}

fn default_success_rate_weight() -> f64 {
    0.3
}

fn default_server_weight() -> f64 {
    0.1
}

fn default_region_weight() -> f64 {
    0.2
}

fn default_geo_lookup_url() -> String {
    "https://ipapi.co/json/".to_string()
}

fn default_request_options() -> RequestOptions {
    let mut headers = HashMap::new();
    headers.insert("Content-Type".to_string(), "application/json".to_string());
    headers.insert("X-Request-Source".to_string(), "uplink".to_string());
    RequestOptions {
        headers,
        ..RequestOptions::default()
    }
}

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uplink_core::config::{BackendSpec, Config};
use uplink_core::geo::{GeoLocator, UserLocation};
use uplink_core::transport::{RequestOptions, Transport, TransportError, TransportResponse};
use uplink_router::RouterService;

/// 单条 URL 前缀的模拟行为
#[derive(Clone)]
pub enum Behavior {
    /// 等待指定延迟后返回给定状态码
    Ok {
        status: u16,
        body: String,
        latency: Duration,
    },
    /// 立即返回传输错误
    Error(String),
    /// 长时间不返回，用于触发探测超时
    Hang,
    /// 先失败指定次数，之后恢复为给定状态码
    FailTimes { failures: u32, then_status: u16 },
}

/// 传输层收到的一次调用记录
#[derive(Clone)]
pub struct RecordedCall {
    pub url: String,
    pub options: RequestOptions,
}

/// 可编排的模拟传输
///
/// 行为按 URL 前缀匹配，后注册的前缀优先；
/// 没有匹配行为时默认返回 200。
#[derive(Default)]
pub struct MockTransport {
    behaviors: Mutex<Vec<(String, Behavior)>>,
    fail_counters: Mutex<HashMap<String, u32>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为一个 URL 前缀设置行为
    pub fn behave(&self, url_prefix: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .push((url_prefix.to_string(), behavior));
    }

    /// 全部调用记录
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// 匹配前缀的调用次数
    pub fn calls_to(&self, url_prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.url.starts_with(url_prefix))
            .count()
    }

    /// 最近一次调用
    pub fn last_call(&self) -> Option<RecordedCall> {
        self.calls.lock().last().cloned()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<TransportResponse, TransportError> {
        self.calls.lock().push(RecordedCall {
            url: url.to_string(),
            options: options.clone(),
        });

        let matched = {
            let behaviors = self.behaviors.lock();
            behaviors
                .iter()
                .rev()
                .find(|(prefix, _)| url.starts_with(prefix.as_str()))
                .map(|(prefix, behavior)| (prefix.clone(), behavior.clone()))
        };

        match matched {
            None => Ok(TransportResponse::new(200, HashMap::new(), "ok".to_string())),
            Some((_, Behavior::Ok {
                status,
                body,
                latency,
            })) => {
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
                Ok(TransportResponse::new(status, HashMap::new(), body))
            }
            Some((_, Behavior::Error(message))) => Err(TransportError::Other(message)),
            Some((_, Behavior::Hang)) => {
                tokio::time::sleep(Duration::from_secs(86_400)).await;
                Err(TransportError::Other("hung".to_string()))
            }
            Some((prefix, Behavior::FailTimes {
                failures,
                then_status,
            })) => {
                let mut counters = self.fail_counters.lock();
                let seen = counters.entry(prefix).or_insert(0);
                if *seen < failures {
                    *seen += 1;
                    Err(TransportError::Other("induced failure".to_string()))
                } else {
                    Ok(TransportResponse::new(
                        then_status,
                        HashMap::new(),
                        "recovered".to_string(),
                    ))
                }
            }
        }
    }
}

/// 总是返回固定位置的定位器
pub struct FixedLocator(pub UserLocation);

#[async_trait]
impl GeoLocator for FixedLocator {
    async fn locate(&self) -> Result<UserLocation, TransportError> {
        Ok(self.0.clone())
    }
}

/// 总是失败的定位器
pub struct FailingLocator;

#[async_trait]
impl GeoLocator for FailingLocator {
    async fn locate(&self) -> Result<UserLocation, TransportError> {
        Err(TransportError::Other("lookup refused".to_string()))
    }
}

/// 用模拟传输和哑定位器组装路由服务
pub fn build_router(config: Config, transport: Arc<MockTransport>) -> RouterService {
    RouterService::with_parts(
        config,
        transport,
        Arc::new(FixedLocator(UserLocation::unknown())),
    )
    .unwrap()
}

/// 用一组 URL 构造测试配置，其余设置保持默认
pub fn test_config(urls: &[&str]) -> Config {
    let backends = urls
        .iter()
        .map(|u| BackendSpec::Url(u.to_string()))
        .collect();
    Config::with_backends(backends)
}

/// 构造一个已知的用户位置
pub fn location(country: &str, region: &str) -> UserLocation {
    UserLocation {
        ip: Some("203.0.113.7".to_string()),
        country: country.to_string(),
        country_name: None,
        region: region.to_string(),
        city: None,
        latitude: None,
        longitude: None,
    }
}

/// 让已唤醒的后台任务跑完当前批次
///
/// 暂停时钟下 spawn 出来的任务要等主任务让出才会被轮询，
/// 断言计数前先多让几轮。
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

/// 初始化测试日志输出，重复调用安全
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

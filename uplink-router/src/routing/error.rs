use thiserror::Error;
use uplink_core::config::ConfigError;
use uplink_core::transport::TransportError;

/// 路由层错误类型
///
/// 覆盖请求路由全链路的失败情况：没有可用后端、传输失败、
/// 拦截器中止以及配置更新被拒绝。
#[derive(Debug, Error)]
pub enum RouterError {
    /// 注册表中没有任何可被选中的后端
    #[error("No available backends")]
    NoAvailableBackend,

    /// 底层传输失败（连接、超时、协议错误等）
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// 拦截器主动中止了请求处理
    #[error("Interceptor error: {0}")]
    Interceptor(String),

    /// 配置校验失败
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl RouterError {
    /// 判断错误是否来自传输层
    ///
    /// 传输层错误会参与重试与熔断统计，其余错误直接向调用方返回。
    pub fn is_transport(&self) -> bool {
        matches!(self, RouterError::Transport(_))
    }
}

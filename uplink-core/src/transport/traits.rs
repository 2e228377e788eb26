use super::types::{RequestOptions, TransportError, TransportResponse};
use async_trait::async_trait;

/// HTTP传输端口
///
/// 路由器通过该端口发送探测与业务请求;实现方负责连接管理,
/// 并在设置了 `timeout_ms` 时实施按请求超时
#[async_trait]
pub trait Transport: Send + Sync {
    /// 发送一次HTTP请求,返回完整响应或传输错误
    async fn send(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<TransportResponse, TransportError>;
}

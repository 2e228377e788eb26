use super::types::UserLocation;
use crate::transport::TransportError;
use async_trait::async_trait;

/// 地理位置查询端口
///
/// 失败由调用方降级为哨兵位置,不会中断路由
#[async_trait]
pub trait GeoLocator: Send + Sync {
    /// 查询当前进程的大致地理位置
    async fn locate(&self) -> Result<UserLocation, TransportError>;
}

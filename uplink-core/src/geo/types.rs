use serde::{Deserialize, Serialize};

pub(crate) const UNKNOWN: &str = "unknown";

/// 用户地理位置
///
/// 由外部查询服务提供,仅参与评分的区域项。
/// 查询失败时使用哨兵位置,区域项恒为0
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct UserLocation {
    #[serde(default)]
    pub ip: Option<String>,

    /// 国家代码,如 "US"
    pub country: String,

    #[serde(default)]
    pub country_name: Option<String>,

    /// 区域标签,如 "us-west" 或省/州名
    pub region: String,

    #[serde(default)]
    pub city: Option<String>,

    #[serde(default)]
    pub latitude: Option<f64>,

    #[serde(default)]
    pub longitude: Option<f64>,
}

impl UserLocation {
    /// 查询失败时的哨兵位置
    pub fn unknown() -> Self {
        Self {
            ip: None,
            country: UNKNOWN.to_string(),
            country_name: None,
            region: UNKNOWN.to_string(),
            city: None,
            latitude: None,
            longitude: None,
        }
    }

    /// 是否为有效位置;哨兵位置不参与区域评分
    pub fn is_known(&self) -> bool {
        self.country != UNKNOWN
    }
}

use super::traits::GeoLocator;
use super::types::{UserLocation, UNKNOWN};
use crate::transport::TransportError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// ipapi.co 风格的HTTP地理位置查询
pub struct HttpGeoLocator {
    client: Client,
    lookup_url: String,
}

/// 查询服务返回的原始字段,全部可缺省
#[derive(Debug, Deserialize)]
struct GeoApiResponse {
    #[serde(default)]
    ip: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    country_name: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
}

impl HttpGeoLocator {
    pub fn new(lookup_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            lookup_url: lookup_url.into(),
        }
    }
}

#[async_trait]
impl GeoLocator for HttpGeoLocator {
    async fn locate(&self) -> Result<UserLocation, TransportError> {
        debug!("Looking up user location via {}", self.lookup_url);
        let response = self.client.get(&self.lookup_url).send().await?;
        let data: GeoApiResponse = response.json().await?;

        Ok(UserLocation {
            ip: data.ip,
            country: data.country.unwrap_or_else(|| UNKNOWN.to_string()),
            country_name: data.country_name,
            region: data.region.unwrap_or_else(|| UNKNOWN.to_string()),
            city: data.city,
            latitude: data.latitude,
            longitude: data.longitude,
        })
    }
}

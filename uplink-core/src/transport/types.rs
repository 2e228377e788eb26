use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// 传输层错误
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("无效的HTTP方法: {0}")]
    InvalidMethod(String),

    #[error("请求头解析失败: {0}")]
    InvalidHeader(String),

    #[error("HTTP请求失败: {0}")]
    Request(#[from] reqwest::Error),

    #[error("请求超时: {0}ms")]
    Timeout(u64),

    #[error("非预期的HTTP状态码: {0}")]
    UnexpectedStatus(u16),

    #[error("传输失败: {0}")]
    Other(String),
}

/// 出站请求选项
///
/// 与默认选项浅合并:标量字段未设置时继承默认值,
/// 非空的请求头映射整体覆盖默认请求头
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct RequestOptions {
    /// HTTP方法,未设置时为GET
    #[serde(default)]
    pub method: Option<String>,

    /// 请求头
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// JSON请求体
    #[serde(default)]
    pub body: Option<serde_json::Value>,

    /// 单次请求超时(毫秒)
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl RequestOptions {
    /// GET请求选项
    pub fn get() -> Self {
        Self {
            method: Some("GET".to_string()),
            ..Self::default()
        }
    }

    /// POST请求选项,附带JSON请求体
    pub fn post(body: serde_json::Value) -> Self {
        Self {
            method: Some("POST".to_string()),
            body: Some(body),
            ..Self::default()
        }
    }

    /// 设置单个请求头
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// 设置请求超时
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// 实际使用的HTTP方法
    pub fn method_or_default(&self) -> &str {
        self.method.as_deref().unwrap_or("GET")
    }

    /// 浅合并:未设置的字段继承默认选项
    pub fn merged_over(mut self, defaults: &RequestOptions) -> RequestOptions {
        if self.method.is_none() {
            self.method = defaults.method.clone();
        }
        if self.headers.is_empty() {
            self.headers = defaults.headers.clone();
        }
        if self.body.is_none() {
            self.body = defaults.body.clone();
        }
        if self.timeout_ms.is_none() {
            self.timeout_ms = defaults.timeout_ms;
        }
        self
    }
}

/// 传输层响应
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
    /// 状态码是否在2xx范围
    pub is_success: bool,
}

impl TransportResponse {
    pub fn new(status: u16, headers: HashMap<String, String>, body: String) -> Self {
        let is_success = (200..300).contains(&status);
        Self {
            status,
            headers,
            body,
            is_success,
        }
    }

    /// 将响应体解析为JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

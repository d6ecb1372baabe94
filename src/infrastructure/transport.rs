// RPC 传输层
// 统一 JSON-RPC 与 REST 两种调用方式，供各链处理器使用；
// 测试中可注入脚本化的实现替代真实节点。

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

use crate::error::TransportError;

/// 节点调用接口
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// 节点基础地址（日志用）
    fn endpoint(&self) -> &str;

    /// JSON-RPC 2.0 调用，返回 `result` 字段
    async fn json_rpc(&self, method: &str, params: Value) -> Result<Value, TransportError>;

    /// REST GET，`path` 相对于基础地址
    async fn get(&self, path: &str) -> Result<Value, TransportError>;

    /// REST POST (JSON body)
    async fn post(&self, path: &str, body: Value) -> Result<Value, TransportError>;
}

/// 基于 reqwest 的 HTTP 传输
pub struct HttpTransport {
    http_client: reqwest::Client,
    base_url: String,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Self {
        Self::with_headers(base_url, HeaderMap::new())
    }

    /// 附带 API Key 头（例如 TronGrid 的 `TRON-PRO-API-KEY`、toncenter 的 `X-API-Key`）
    pub fn with_api_key(base_url: &str, header: &'static str, api_key: Option<&str>) -> Self {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key {
            match HeaderValue::from_str(key) {
                Ok(value) => {
                    headers.insert(HeaderName::from_static(header), value);
                }
                Err(e) => tracing::warn!(error = %e, header, "Ignoring malformed API key"),
            }
        }
        Self::with_headers(base_url, headers)
    }

    fn with_headers(base_url: &str, headers: HeaderMap) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .default_headers(headers)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http_client: client,
            base_url: base_url.trim_end_matches('/').to_string(),
            next_id: AtomicU64::new(1),
        }
    }

    fn url(&self, path: &str) -> String {
        if path.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    /// 读取响应：404 → NotFound，其他非 2xx → Status
    async fn read_json(response: reqwest::Response, path: &str) -> Result<Value, TransportError> {
        let status = response.status();
        let body = response.text().await?;

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(TransportError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: body.chars().take(512).collect(),
            });
        }

        serde_json::from_str(&body).map_err(|e| TransportError::decode(e.to_string()))
    }
}

/// 解析 JSON-RPC 响应信封
pub fn unwrap_json_rpc(json: Value) -> Result<Value, TransportError> {
    if let Some(error) = json.get("error").filter(|e| !e.is_null()) {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown RPC error")
            .to_string();
        let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(-1);
        return Err(TransportError::Rpc {
            code,
            message,
            data: error.get("data").cloned().or_else(|| error.get("cause").cloned()),
        });
    }

    json.get("result")
        .cloned()
        .ok_or_else(|| TransportError::decode("missing result field in RPC response"))
}

#[async_trait]
impl RpcTransport for HttpTransport {
    fn endpoint(&self) -> &str {
        &self.base_url
    }

    async fn json_rpc(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        tracing::trace!(endpoint = %self.base_url, method, "json-rpc request");

        let response = self
            .http_client
            .post(&self.base_url)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        let json = Self::read_json(response, method).await?;
        unwrap_json_rpc(json)
    }

    async fn get(&self, path: &str) -> Result<Value, TransportError> {
        tracing::trace!(endpoint = %self.base_url, path, "GET");
        let response = self.http_client.get(self.url(path)).send().await?;
        Self::read_json(response, path).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, TransportError> {
        tracing::trace!(endpoint = %self.base_url, path, "POST");
        let response = self
            .http_client
            .post(self.url(path))
            .json(&body)
            .send()
            .await?;
        Self::read_json(response, path).await
    }
}

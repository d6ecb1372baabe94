//! 测试辅助模块
//! 提供脚本化的 RPC 传输和常用配置构造

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use adi_accounts::{
    config::{DeploymentConfig, EndpointConfig, SecretString},
    domain::{ChainConfig, ChainFamily, SponsorConfig},
    error::TransportError,
    infrastructure::RpcTransport,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;

/// 一次节点调用
#[derive(Debug, Clone)]
pub struct Call {
    /// JSON-RPC 方法名，或 REST 路径
    pub target: String,
    /// JSON-RPC params / POST body；GET 为 null
    pub params: Value,
}

type Responder = dyn Fn(&Call) -> Result<Value, TransportError> + Send + Sync;

/// 按闭包脚本应答的传输层，记录全部调用
pub struct MockTransport {
    responder: Box<Responder>,
    calls: Mutex<Vec<Call>>,
}

impl MockTransport {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&Call) -> Result<Value, TransportError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, target: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.target == target).count()
    }

    fn respond(&self, call: Call) -> Result<Value, TransportError> {
        let result = (self.responder)(&call);
        self.calls.lock().unwrap().push(call);
        result
    }
}

#[async_trait]
impl RpcTransport for MockTransport {
    fn endpoint(&self) -> &str {
        "mock://node"
    }

    async fn json_rpc(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        self.respond(Call {
            target: method.to_string(),
            params,
        })
    }

    async fn get(&self, path: &str) -> Result<Value, TransportError> {
        self.respond(Call {
            target: path.to_string(),
            params: Value::Null,
        })
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, TransportError> {
        self.respond(Call {
            target: path.to_string(),
            params: body,
        })
    }
}

pub fn rpc_error(message: &str) -> TransportError {
    TransportError::Rpc {
        code: -32000,
        message: message.to_string(),
        data: None,
    }
}

pub fn unexpected(call: &Call) -> Result<Value, TransportError> {
    Err(TransportError::Request(format!("unexpected call {}", call.target)))
}

pub fn endpoint(factory: &str) -> EndpointConfig {
    EndpointConfig {
        rpc_url: "https://rpc.invalid".into(),
        factory_address: factory.into(),
        explorer_address_template: None,
        explorer_tx_template: None,
        aliases: Vec::new(),
        api_key: None,
        enabled: true,
    }
}

pub fn chain_config(family: ChainFamily, name: &str, factory: &str) -> ChainConfig {
    let chain_id = (family == ChainFamily::Evm).then_some(11_155_111);
    ChainConfig::from_endpoint(family, name, None, chain_id, &endpoint(factory))
}

pub fn sponsor(private_key: &str, min_balance: &str) -> SponsorConfig {
    SponsorConfig::new(
        Some(SecretString::new(private_key)),
        true,
        min_balance.parse::<Decimal>().unwrap(),
    )
}

pub fn no_sponsor() -> SponsorConfig {
    SponsorConfig::new(None, false, Decimal::ZERO)
}

/// 轮询间隔极短，测试中不等待
pub fn fast_deployment() -> DeploymentConfig {
    DeploymentConfig {
        confirmation_poll_interval_ms: 1,
        verification_attempts: 3,
        verification_interval_ms: 1,
    }
}

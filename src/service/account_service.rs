//! 账户服务
//! 按链标识分发到注册表中的处理器，供 CLI / HTTP 层调用

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;

use crate::{
    domain::{
        AccountAddressResult, AddressBalanceResult, ChainFamily, ChainHandler,
        DeployAccountResult, HandlerCapabilities, HandlerRegistry, SponsorStatusResult,
    },
    error::ChainError,
};

/// 链概要（`chains` 命令 / 健康检查）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSummary {
    pub name: String,
    pub family: ChainFamily,
    pub identifiers: Vec<String>,
    pub symbol: String,
    pub factory_address: String,
    pub sponsor_configured: bool,
    pub capabilities: HandlerCapabilities,
}

pub struct AccountService {
    registry: Arc<HandlerRegistry>,
}

impl AccountService {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    fn handler(&self, chain: &str) -> Result<Arc<dyn ChainHandler>, ChainError> {
        self.registry
            .resolve(chain)
            .ok_or_else(|| ChainError::UnsupportedChain(chain.trim().to_string()))
    }

    /// 预测地址
    pub async fn account_address(
        &self,
        chain: &str,
        identity: &str,
    ) -> Result<AccountAddressResult, ChainError> {
        self.handler(chain)?.get_account_address(identity).await
    }

    /// 部署账户（幂等）
    pub async fn deploy_account(
        &self,
        chain: &str,
        identity: &str,
    ) -> Result<DeployAccountResult, ChainError> {
        let handler = self.handler(chain)?;
        let result = handler.deploy_account(identity).await;
        if let Err(e) = &result {
            tracing::error!(
                chain = %handler.chain_name(),
                identity,
                code = e.code(),
                retryable = e.is_retryable(),
                error = %e,
                "Deployment failed"
            );
        }
        result
    }

    pub async fn address_balance(
        &self,
        chain: &str,
        address: &str,
    ) -> Result<AddressBalanceResult, ChainError> {
        Ok(self.handler(chain)?.get_address_balance(address).await)
    }

    pub async fn sponsor_status(&self, chain: &str) -> Result<SponsorStatusResult, ChainError> {
        Ok(self.handler(chain)?.get_sponsor_status().await)
    }

    /// 所有处理器的赞助状态（并发查询）
    pub async fn sponsor_overview(&self) -> Vec<SponsorStatusResult> {
        let handlers = self.registry.list_handlers();
        join_all(handlers.iter().map(|h| h.get_sponsor_status())).await
    }

    pub fn chains(&self) -> Vec<ChainSummary> {
        self.registry
            .list_handlers()
            .iter()
            .map(|h| {
                let config = h.chain_config();
                ChainSummary {
                    name: config.name.clone(),
                    family: config.family,
                    identifiers: h.chain_identifiers(),
                    symbol: config.symbol.clone(),
                    factory_address: config.factory_address.clone(),
                    sponsor_configured: h.is_sponsor_configured(),
                    capabilities: h.capabilities(),
                }
            })
            .collect()
    }
}

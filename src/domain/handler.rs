//! 链处理器接口
//!
//! 对外统一的四个操作：地址预测、部署、地址余额、赞助状态。
//! 具体链只需实现 [`AccountDeployer`]，由 [`AccountHandler`] 套上共享的部署流程。

use async_trait::async_trait;
use serde::Serialize;

use crate::{
    config::DeploymentConfig,
    domain::{
        account::{
            AccountAddressResult, AddressBalanceResult, DeployAccountResult, SponsorStatusResult,
        },
        chain_config::ChainConfig,
        deployment::{self, AccountDeployer},
        derivation::DerivedIdentity,
    },
    error::ChainError,
    utils::{amount::format_units, AddressValidator},
};

/// 处理器能力标记
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerCapabilities {
    /// 部署前即可给出最终地址
    pub supports_pre_deployment_address_prediction: bool,
    /// 链上读取失败时可本地复算地址
    pub supports_local_derivation: bool,
}

impl HandlerCapabilities {
    pub const DETERMINISTIC: Self = Self {
        supports_pre_deployment_address_prediction: true,
        supports_local_derivation: true,
    };
}

/// 链处理器
#[async_trait]
pub trait ChainHandler: Send + Sync {
    fn chain_config(&self) -> &ChainConfig;

    /// 本处理器响应的所有链标识
    fn chain_identifiers(&self) -> Vec<String> {
        self.chain_config().identifiers.clone()
    }

    fn chain_name(&self) -> &str {
        &self.chain_config().name
    }

    fn capabilities(&self) -> HandlerCapabilities;

    /// 私钥存在且开启赞助部署
    fn is_sponsor_configured(&self) -> bool;

    async fn get_account_address(&self, identity: &str)
        -> Result<AccountAddressResult, ChainError>;

    async fn deploy_account(&self, identity: &str) -> Result<DeployAccountResult, ChainError>;

    /// 不会失败：错误写入结果的 `error` 字段
    async fn get_address_balance(&self, address: &str) -> AddressBalanceResult;

    /// 不会失败：错误写入结果的 `error` 字段
    async fn get_sponsor_status(&self) -> SponsorStatusResult;
}

/// 把 [`AccountDeployer`] 适配为 [`ChainHandler`]
pub struct AccountHandler<D> {
    deployer: D,
    deployment: DeploymentConfig,
}

impl<D: AccountDeployer> AccountHandler<D> {
    pub fn new(deployer: D, deployment: DeploymentConfig) -> Self {
        Self {
            deployer,
            deployment,
        }
    }

    pub fn deployer(&self) -> &D {
        &self.deployer
    }
}

impl<D: AccountDeployer + 'static> AccountHandler<D> {
    fn derive(&self, identity: &str) -> Result<DerivedIdentity, ChainError> {
        DerivedIdentity::new(identity)
            .map_err(|e| ChainError::invalid_input(self.chain_name(), e.to_string()))
    }
}

#[async_trait]
impl<D: AccountDeployer + 'static> ChainHandler for AccountHandler<D> {
    fn chain_config(&self) -> &ChainConfig {
        self.deployer.chain_config()
    }

    fn capabilities(&self) -> HandlerCapabilities {
        self.deployer.capabilities()
    }

    fn is_sponsor_configured(&self) -> bool {
        self.deployer.sponsor().is_configured()
    }

    async fn get_account_address(
        &self,
        identity: &str,
    ) -> Result<AccountAddressResult, ChainError> {
        let derived = self.derive(identity)?;
        let prediction = self.deployer.predict(&derived).await?;

        tracing::debug!(
            chain = %self.chain_name(),
            identity = %identity,
            address = %prediction.account_address,
            deployed = prediction.is_deployed,
            source = ?prediction.source,
            "Resolved account address"
        );

        Ok(AccountAddressResult {
            explorer_url: self.chain_config().address_url(&prediction.account_address),
            account_address: prediction.account_address,
            is_deployed: prediction.is_deployed,
        })
    }

    async fn deploy_account(&self, identity: &str) -> Result<DeployAccountResult, ChainError> {
        let derived = self.derive(identity)?;
        deployment::run(&self.deployer, &self.deployment, &derived).await
    }

    async fn get_address_balance(&self, address: &str) -> AddressBalanceResult {
        let config = self.chain_config();
        let address = address.trim();

        if !AddressValidator::validate(config.family, address) {
            return AddressBalanceResult::failed(
                address,
                &config.symbol,
                format!("invalid {} address", config.family.as_str()),
            );
        }

        match self.deployer.native_balance(address).await {
            Ok(balance) => AddressBalanceResult::ok(
                address,
                format_units(balance, config.decimals),
                &config.symbol,
            ),
            Err(e) => {
                tracing::warn!(chain = %config.name, address, error = %e, "Balance query failed");
                AddressBalanceResult::failed(address, &config.symbol, e)
            }
        }
    }

    async fn get_sponsor_status(&self) -> SponsorStatusResult {
        let config = self.chain_config();
        let sponsor = self.deployer.sponsor();

        let mut status = SponsorStatusResult {
            name: config.name.clone(),
            available: false,
            factory_address: config.factory_address.clone(),
            balance: None,
            min_balance: Some(sponsor.min_balance().normalize().to_string()),
            error: None,
        };

        if !sponsor.is_configured() {
            status.error = Some("sponsor not configured".to_string());
            return status;
        }

        let signer = match self.deployer.load_signer() {
            Ok(signer) => signer,
            Err(e) => {
                status.error = Some(e.to_string());
                return status;
            }
        };

        match self.deployer.read_funding(&signer).await {
            Ok(funding) => {
                status.balance = Some(format_units(funding.balance, config.decimals));
                status.available = funding.balance >= sponsor.min_balance_units(config.decimals);
            }
            Err(e) => {
                tracing::warn!(chain = %config.name, error = %e, "Sponsor balance query failed");
                status.error = Some(e.to_string());
            }
        }

        status
    }
}

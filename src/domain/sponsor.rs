//! 赞助账户模型
//!
//! 每条链一个资金账户：私钥、启用开关、最低余额。部署前校验余额，
//! 不足时在发送任何交易之前失败。

use rust_decimal::Decimal;

use crate::{
    config::{SecretString, SponsorSettings},
    error::ChainError,
    utils::amount::{format_units, parse_units},
};

#[derive(Debug, Clone, Default)]
pub struct SponsorConfig {
    private_key: Option<SecretString>,
    enabled: bool,
    min_balance: Decimal,
}

impl SponsorConfig {
    pub fn new(private_key: Option<SecretString>, enabled: bool, min_balance: Decimal) -> Self {
        Self {
            private_key,
            enabled,
            min_balance,
        }
    }

    pub fn from_settings(settings: &SponsorSettings) -> Self {
        Self::new(
            settings.private_key.clone(),
            settings.sponsored_deployment_enabled,
            settings.min_balance,
        )
    }

    /// 私钥存在且显式开启
    pub fn is_configured(&self) -> bool {
        self.enabled && self.private_key.as_ref().is_some_and(|k| !k.is_empty())
    }

    /// 取签名私钥；未配置时返回配置错误
    pub fn private_key(&self, chain: &str) -> Result<&str, ChainError> {
        match &self.private_key {
            Some(key) if self.enabled && !key.is_empty() => Ok(key.expose().trim()),
            Some(_) if !self.enabled => Err(ChainError::configuration(
                chain,
                "sponsored deployment is disabled",
            )),
            _ => Err(ChainError::configuration(chain, "sponsor private key not configured")),
        }
    }

    pub fn min_balance(&self) -> Decimal {
        self.min_balance
    }

    /// 最低余额（最小单位），无法换算时取 `u128::MAX`，部署被余额校验拦截
    pub fn min_balance_units(&self, decimals: u32) -> u128 {
        parse_units(self.min_balance, decimals).unwrap_or(u128::MAX)
    }

    /// 部署所需余额：max(最低余额, 动态费用)
    pub fn required_balance(&self, fee: u128, decimals: u32) -> u128 {
        self.min_balance_units(decimals).max(fee)
    }

    /// 余额校验，不足返回 `InsufficientFunds`
    pub fn ensure_funds(
        &self,
        chain: &str,
        symbol: &str,
        decimals: u32,
        balance: u128,
        fee: u128,
    ) -> Result<(), ChainError> {
        let required = self.required_balance(fee, decimals);
        if balance < required {
            return Err(ChainError::InsufficientFunds {
                chain: chain.to_string(),
                balance: format_units(balance, decimals),
                required: format_units(required, decimals),
                symbol: symbol.to_string(),
            });
        }
        Ok(())
    }
}

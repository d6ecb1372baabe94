//! 账户操作结果（值对象，camelCase 序列化）

use serde::{Deserialize, Serialize};

/// 地址查询结果，每次调用重新计算，不缓存
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountAddressResult {
    pub account_address: String,
    pub is_deployed: bool,
    pub explorer_url: String,
}

/// 部署结果
///
/// `transaction_hash` 为 `None` 当且仅当 `already_existed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployAccountResult {
    pub account_address: String,
    pub already_existed: bool,
    pub transaction_hash: Option<String>,
    pub explorer_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<String>,
    pub message: String,
}

impl DeployAccountResult {
    pub fn already_existed(account_address: String, explorer_url: String, chain: &str) -> Self {
        Self {
            account_address,
            already_existed: true,
            transaction_hash: None,
            explorer_url,
            gas_used: None,
            message: format!("Account already deployed on {chain}"),
        }
    }

    pub fn deployed(
        account_address: String,
        transaction_hash: String,
        explorer_url: String,
        gas_used: Option<String>,
        chain: &str,
    ) -> Self {
        Self {
            account_address,
            already_existed: false,
            transaction_hash: Some(transaction_hash),
            explorer_url,
            gas_used,
            message: format!("Account deployed successfully on {chain}"),
        }
    }
}

/// 赞助账户状态（只读，不会失败）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsorStatusResult {
    pub name: String,
    /// 已配置且余额不低于最低要求
    pub available: bool,
    pub factory_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_balance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 地址余额（原生单位字符串）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressBalanceResult {
    pub address: String,
    pub balance: String,
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AddressBalanceResult {
    pub fn ok(address: &str, balance: String, symbol: &str) -> Self {
        Self {
            address: address.to_string(),
            balance,
            symbol: symbol.to_string(),
            error: None,
        }
    }

    /// 查询失败：余额记为 "0"，错误写入 `error`
    pub fn failed(address: &str, symbol: &str, error: impl ToString) -> Self {
        Self {
            address: address.to_string(),
            balance: "0".to_string(),
            symbol: symbol.to_string(),
            error: Some(error.to_string()),
        }
    }
}

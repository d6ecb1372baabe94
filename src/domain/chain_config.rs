//! 多链配置模块
//!
//! 定义支持的链族及每条链的静态配置（启动时构造，运行期只读）

use serde::{Deserialize, Serialize};

use crate::config::EndpointConfig;

/// 链族：每个链族一个处理器实现
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    /// EVM 兼容链 (Ethereum, Arbitrum, BSC ...)
    Evm,
    /// TRON：EVM 兼容，Base58Check 地址
    Tron,
    /// Solana：账户模型 + PDA
    Solana,
    /// Aptos (Move)
    Aptos,
    /// Sui (Move，对象 ID 由运行时分配)
    Sui,
    /// NEAR：分片账户模型，可读账户名
    Near,
    /// TON：Cell 模型
    Ton,
}

impl ChainFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Evm => "evm",
            Self::Tron => "tron",
            Self::Solana => "solana",
            Self::Aptos => "aptos",
            Self::Sui => "sui",
            Self::Near => "near",
            Self::Ton => "ton",
        }
    }

    /// 原生代币精度
    pub fn decimals(&self) -> u32 {
        match self {
            Self::Evm => 18,
            Self::Tron => 6,
            Self::Solana | Self::Sui | Self::Ton => 9,
            Self::Aptos => 8,
            Self::Near => 24,
        }
    }

    pub fn default_symbol(&self) -> &'static str {
        match self {
            Self::Evm => "ETH",
            Self::Tron => "TRX",
            Self::Solana => "SOL",
            Self::Aptos => "APT",
            Self::Sui => "SUI",
            Self::Near => "NEAR",
            Self::Ton => "TON",
        }
    }

    /// 默认浏览器模板（测试网）
    fn default_explorer_templates(&self) -> (&'static str, &'static str) {
        match self {
            Self::Evm => (
                "https://sepolia.etherscan.io/address/{address}",
                "https://sepolia.etherscan.io/tx/{tx}",
            ),
            Self::Tron => (
                "https://nile.tronscan.org/#/address/{address}",
                "https://nile.tronscan.org/#/transaction/{tx}",
            ),
            Self::Solana => (
                "https://explorer.solana.com/address/{address}?cluster=devnet",
                "https://explorer.solana.com/tx/{tx}?cluster=devnet",
            ),
            Self::Aptos => (
                "https://explorer.aptoslabs.com/account/{address}?network=testnet",
                "https://explorer.aptoslabs.com/txn/{tx}?network=testnet",
            ),
            Self::Sui => (
                "https://suiscan.xyz/testnet/object/{address}",
                "https://suiscan.xyz/testnet/tx/{tx}",
            ),
            Self::Near => (
                "https://testnet.nearblocks.io/address/{address}",
                "https://testnet.nearblocks.io/txns/{tx}",
            ),
            Self::Ton => (
                "https://testnet.tonviewer.com/{address}",
                "https://testnet.tonviewer.com/transaction/{tx}",
            ),
        }
    }
}

/// 链配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// 链名称（同时是主标识）
    pub name: String,
    pub family: ChainFamily,
    /// 处理器响应的全部标识（名称、数字链 ID、别名）
    pub identifiers: Vec<String>,
    /// 链符号 (ETH, TRX, SOL ...)
    pub symbol: String,
    pub decimals: u32,
    /// EIP-155 链 ID（仅 EVM）
    pub chain_id: Option<u64>,
    pub rpc_url: String,
    /// 工厂合约 / 程序 / 包地址
    pub factory_address: String,
    pub explorer_address_template: String,
    pub explorer_tx_template: String,
}

impl ChainConfig {
    /// 由端点配置构造
    pub fn from_endpoint(
        family: ChainFamily,
        name: &str,
        symbol: Option<&str>,
        chain_id: Option<u64>,
        endpoint: &EndpointConfig,
    ) -> Self {
        let (addr_tpl, tx_tpl) = family.default_explorer_templates();

        let mut identifiers = vec![name.to_string()];
        if let Some(id) = chain_id {
            identifiers.push(id.to_string());
        }
        identifiers.extend(endpoint.aliases.iter().cloned());
        let mut seen = std::collections::HashSet::new();
        identifiers.retain(|id| !id.trim().is_empty() && seen.insert(id.to_lowercase()));

        Self {
            name: name.to_string(),
            family,
            identifiers,
            symbol: symbol.unwrap_or(family.default_symbol()).to_string(),
            decimals: family.decimals(),
            chain_id,
            rpc_url: endpoint.rpc_url.clone(),
            factory_address: endpoint.factory_address.trim().to_string(),
            explorer_address_template: endpoint
                .explorer_address_template
                .clone()
                .unwrap_or_else(|| addr_tpl.to_string()),
            explorer_tx_template: endpoint
                .explorer_tx_template
                .clone()
                .unwrap_or_else(|| tx_tpl.to_string()),
        }
    }

    /// 浏览器地址链接
    pub fn address_url(&self, address: &str) -> String {
        self.explorer_address_template.replace("{address}", address)
    }

    /// 浏览器交易链接
    pub fn tx_url(&self, tx_hash: &str) -> String {
        self.explorer_tx_template.replace("{tx}", tx_hash)
    }

    /// 验证链配置完整性
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.name.is_empty() {
            errors.push("chain has empty name".to_string());
        }
        if self.identifiers.is_empty() {
            errors.push(format!("chain {} has no identifiers", self.name));
        }
        if self.factory_address.is_empty() {
            errors.push(format!("chain {} has empty factory_address", self.name));
        }
        if !self.explorer_address_template.contains("{address}") {
            errors.push(format!(
                "chain {} explorer address template lacks {{address}}",
                self.name
            ));
        }
        if !self.explorer_tx_template.contains("{tx}") {
            errors.push(format!("chain {} explorer tx template lacks {{tx}}", self.name));
        }
        if self.family == ChainFamily::Evm && self.chain_id.is_none() {
            errors.push(format!("EVM chain {} requires chain_id", self.name));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

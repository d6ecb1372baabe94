//! 配置管理模块
//! 支持从环境变量和配置文件加载配置
//!
//! 每条链一个显式的配置段，启动时加载一次，之后只读。

use std::{fmt, path::Path};

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, Serializer};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// 应用配置结构体
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub deployment: DeploymentConfig,
    /// 可配置多个 EVM 网络，每个网络一个处理器
    #[serde(default)]
    pub evm: Vec<EvmNetworkConfig>,
    #[serde(default)]
    pub tron: Option<TronConfig>,
    #[serde(default)]
    pub solana: Option<SolanaConfig>,
    #[serde(default)]
    pub aptos: Option<AptosConfig>,
    #[serde(default)]
    pub sui: Option<SuiConfig>,
    #[serde(default)]
    pub near: Option<NearConfig>,
    #[serde(default)]
    pub ton: Option<TonConfig>,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
}

/// 部署流程配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// 确认轮询间隔
    pub confirmation_poll_interval_ms: u64,
    /// 确认后验证账户存在的最大查询次数（仅异步部署的链使用）
    pub verification_attempts: u32,
    pub verification_interval_ms: u64,
}

/// 敏感字符串：Debug/序列化时脱敏，释放时清零
#[derive(Clone, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(***)")
    }
}

impl Serialize for SecretString {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str("***")
    }
}

/// 链端点配置（所有链通用）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub rpc_url: String,
    /// 工厂合约 / 程序 / 包地址
    #[serde(default)]
    pub factory_address: String,
    /// 浏览器地址模板，`{address}` 占位
    #[serde(default)]
    pub explorer_address_template: Option<String>,
    /// 浏览器交易模板，`{tx}` 占位
    #[serde(default)]
    pub explorer_tx_template: Option<String>,
    /// 额外的链标识别名
    #[serde(default)]
    pub aliases: Vec<String>,
    /// 节点服务商 API Key（TronGrid / toncenter）
    #[serde(default)]
    pub api_key: Option<SecretString>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// 赞助账户配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SponsorSettings {
    #[serde(default)]
    pub private_key: Option<SecretString>,
    /// 显式开启赞助部署
    #[serde(default)]
    pub sponsored_deployment_enabled: bool,
    /// 最低余额（原生单位，例如 0.05 ETH）
    #[serde(default)]
    pub min_balance: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvmNetworkConfig {
    pub name: String,
    pub chain_id: u64,
    #[serde(default = "default_evm_symbol")]
    pub symbol: String,
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub sponsor: SponsorSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TronConfig {
    #[serde(default = "default_tron_name")]
    pub name: String,
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub sponsor: SponsorSettings,
    /// 单笔交易能量上限（sun）
    #[serde(default = "default_tron_fee_limit")]
    pub fee_limit_sun: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolanaConfig {
    #[serde(default = "default_solana_name")]
    pub name: String,
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub sponsor: SponsorSettings,
    /// 账户数据大小，用于计算租金豁免
    #[serde(default = "default_solana_account_space")]
    pub account_space: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AptosConfig {
    #[serde(default = "default_aptos_name")]
    pub name: String,
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub sponsor: SponsorSettings,
    /// 未轮换密钥时可省略，由公钥推导
    #[serde(default)]
    pub sponsor_address: Option<String>,
    #[serde(default = "default_aptos_max_gas")]
    pub max_gas_amount: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiConfig {
    #[serde(default = "default_sui_name")]
    pub name: String,
    /// factory_address 为 Move 包 ID
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub sponsor: SponsorSettings,
    /// 工厂注册表共享对象
    #[serde(default)]
    pub registry_object_id: String,
    #[serde(default = "default_sui_gas_budget")]
    pub gas_budget: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearConfig {
    #[serde(default = "default_near_name")]
    pub name: String,
    /// factory_address 为工厂账户 ID
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub sponsor: SponsorSettings,
    #[serde(default)]
    pub sponsor_account_id: Option<String>,
    #[serde(default = "default_near_gas")]
    pub gas: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TonConfig {
    #[serde(default = "default_ton_name")]
    pub name: String,
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub sponsor: SponsorSettings,
    /// 赞助方 wallet v4r2 地址
    #[serde(default)]
    pub sponsor_wallet_address: Option<String>,
    /// 随部署消息附带的 nanoton
    #[serde(default = "default_ton_deploy_amount")]
    pub deploy_amount_nanoton: u64,
    #[serde(default = "default_true")]
    pub testnet: bool,
    /// 账户合约代码 BOC (base64)，本地推导时优先于链上查询
    #[serde(default)]
    pub account_code_boc: Option<String>,
}

fn default_true() -> bool {
    true
}
fn default_evm_symbol() -> String {
    "ETH".into()
}
fn default_tron_name() -> String {
    "tron".into()
}
fn default_solana_name() -> String {
    "solana".into()
}
fn default_aptos_name() -> String {
    "aptos".into()
}
fn default_sui_name() -> String {
    "sui".into()
}
fn default_near_name() -> String {
    "near".into()
}
fn default_ton_name() -> String {
    "ton".into()
}
fn default_tron_fee_limit() -> u64 {
    200_000_000 // 200 TRX
}
fn default_solana_account_space() -> u64 {
    256
}
fn default_aptos_max_gas() -> u64 {
    20_000
}
fn default_sui_gas_budget() -> u64 {
    50_000_000
}
fn default_near_gas() -> u64 {
    100_000_000_000_000 // 100 Tgas
}
fn default_ton_deploy_amount() -> u64 {
    50_000_000 // 0.05 TON
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 环境变量读取
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match env_opt(key) {
        Some(v) => v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        None => default.iter().map(|s| s.to_string()).collect(),
    }
}

impl EndpointConfig {
    /// 按前缀读取端点配置，例如 `TRON_RPC_URL`、`TRON_FACTORY_ADDRESS`
    fn from_env(prefix: &str, rpc_default: &str, aliases: &[&str]) -> Self {
        Self {
            rpc_url: env_or(&format!("{prefix}_RPC_URL"), rpc_default),
            factory_address: env_or(&format!("{prefix}_FACTORY_ADDRESS"), ""),
            explorer_address_template: env_opt(&format!("{prefix}_EXPLORER_ADDRESS_TEMPLATE")),
            explorer_tx_template: env_opt(&format!("{prefix}_EXPLORER_TX_TEMPLATE")),
            aliases: env_list(&format!("{prefix}_ALIASES"), aliases),
            api_key: env_opt(&format!("{prefix}_API_KEY")).map(SecretString::new),
            enabled: std::env::var(format!("{prefix}_ENABLED"))
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
        }
    }

    /// 未配置工厂地址的链不注册
    fn is_configured(&self) -> bool {
        self.enabled && !self.factory_address.trim().is_empty()
    }
}

impl SponsorSettings {
    fn from_env(prefix: &str) -> Self {
        Self {
            private_key: env_opt(&format!("{prefix}_SPONSOR_PRIVATE_KEY")).map(SecretString::new),
            sponsored_deployment_enabled: env_flag(&format!("{prefix}_SPONSORED_DEPLOYMENT")),
            min_balance: env_parse(&format!("{prefix}_MIN_SPONSOR_BALANCE"), Decimal::ZERO),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".into()),
        }
    }
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            confirmation_poll_interval_ms: env_parse("DEPLOY_CONFIRMATION_POLL_MS", 2_000),
            verification_attempts: env_parse("DEPLOY_VERIFICATION_ATTEMPTS", 10),
            verification_interval_ms: env_parse("DEPLOY_VERIFICATION_INTERVAL_MS", 3_000),
        }
    }
}

impl EvmNetworkConfig {
    fn from_env() -> Self {
        Self {
            name: env_or("EVM_NETWORK_NAME", "sepolia"),
            chain_id: env_parse("EVM_CHAIN_ID", 11_155_111),
            symbol: env_or("EVM_SYMBOL", "ETH"),
            endpoint: EndpointConfig::from_env("EVM", "https://rpc.sepolia.org", &["ethereum-sepolia"]),
            sponsor: SponsorSettings::from_env("EVM"),
        }
    }
}

impl TronConfig {
    fn from_env() -> Self {
        Self {
            name: default_tron_name(),
            endpoint: EndpointConfig::from_env(
                "TRON",
                "https://nile.trongrid.io",
                &["trx", "tron-nile"],
            ),
            sponsor: SponsorSettings::from_env("TRON"),
            fee_limit_sun: env_parse("TRON_FEE_LIMIT_SUN", default_tron_fee_limit()),
        }
    }
}

impl SolanaConfig {
    fn from_env() -> Self {
        Self {
            name: default_solana_name(),
            endpoint: EndpointConfig::from_env(
                "SOLANA",
                "https://api.devnet.solana.com",
                &["sol", "solana-devnet"],
            ),
            sponsor: SponsorSettings::from_env("SOLANA"),
            account_space: env_parse("SOLANA_ACCOUNT_SPACE", default_solana_account_space()),
        }
    }
}

impl AptosConfig {
    fn from_env() -> Self {
        Self {
            name: default_aptos_name(),
            endpoint: EndpointConfig::from_env(
                "APTOS",
                "https://fullnode.testnet.aptoslabs.com/v1",
                &["apt", "aptos-testnet"],
            ),
            sponsor: SponsorSettings::from_env("APTOS"),
            sponsor_address: env_opt("APTOS_SPONSOR_ADDRESS"),
            max_gas_amount: env_parse("APTOS_MAX_GAS_AMOUNT", default_aptos_max_gas()),
        }
    }
}

impl SuiConfig {
    fn from_env() -> Self {
        Self {
            name: default_sui_name(),
            endpoint: EndpointConfig::from_env(
                "SUI",
                "https://fullnode.testnet.sui.io:443",
                &["sui-testnet"],
            ),
            sponsor: SponsorSettings::from_env("SUI"),
            registry_object_id: env_or("SUI_REGISTRY_OBJECT_ID", ""),
            gas_budget: env_parse("SUI_GAS_BUDGET", default_sui_gas_budget()),
        }
    }
}

impl NearConfig {
    fn from_env() -> Self {
        Self {
            name: default_near_name(),
            endpoint: EndpointConfig::from_env(
                "NEAR",
                "https://rpc.testnet.near.org",
                &["near-testnet"],
            ),
            sponsor: SponsorSettings::from_env("NEAR"),
            sponsor_account_id: env_opt("NEAR_SPONSOR_ACCOUNT_ID"),
            gas: env_parse("NEAR_GAS", default_near_gas()),
        }
    }
}

impl TonConfig {
    fn from_env() -> Self {
        Self {
            name: default_ton_name(),
            endpoint: EndpointConfig::from_env(
                "TON",
                "https://testnet.toncenter.com/api/v2",
                &["toncoin", "ton-testnet"],
            ),
            sponsor: SponsorSettings::from_env("TON"),
            sponsor_wallet_address: env_opt("TON_SPONSOR_WALLET_ADDRESS"),
            deploy_amount_nanoton: env_parse("TON_DEPLOY_AMOUNT_NANOTON", default_ton_deploy_amount()),
            testnet: std::env::var("TON_TESTNET").map(|v| v != "0").unwrap_or(true),
            account_code_boc: env_opt("TON_ACCOUNT_CODE_BOC"),
        }
    }
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 只有设置了 `<CHAIN>_FACTORY_ADDRESS` 的链才会出现在配置中
    pub fn from_env() -> Result<Self> {
        let evm = EvmNetworkConfig::from_env();
        Ok(Self {
            logging: LoggingConfig::default(),
            deployment: DeploymentConfig::default(),
            evm: if evm.endpoint.is_configured() {
                vec![evm]
            } else {
                Vec::new()
            },
            tron: Some(TronConfig::from_env()).filter(|c| c.endpoint.is_configured()),
            solana: Some(SolanaConfig::from_env()).filter(|c| c.endpoint.is_configured()),
            aptos: Some(AptosConfig::from_env()).filter(|c| c.endpoint.is_configured()),
            sui: Some(SuiConfig::from_env()).filter(|c| c.endpoint.is_configured()),
            near: Some(NearConfig::from_env()).filter(|c| c.endpoint.is_configured()),
            ton: Some(TonConfig::from_env()).filter(|c| c.endpoint.is_configured()),
        })
    }

    /// 从配置文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// 从环境变量和配置文件合并加载（配置文件存在时整体覆盖环境变量）
    pub fn from_env_and_file<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut config = Self::from_env()?;

        if let Some(path) = path {
            if path.as_ref().exists() {
                config = Self::from_file(path)?;
            }
        }

        Ok(config)
    }

    /// 所有端点配置（名称, 端点, 赞助方）
    fn endpoints(&self) -> Vec<(&str, &EndpointConfig, &SponsorSettings)> {
        let mut out: Vec<(&str, &EndpointConfig, &SponsorSettings)> = self
            .evm
            .iter()
            .map(|c| (c.name.as_str(), &c.endpoint, &c.sponsor))
            .collect();
        if let Some(c) = &self.tron {
            out.push((c.name.as_str(), &c.endpoint, &c.sponsor));
        }
        if let Some(c) = &self.solana {
            out.push((c.name.as_str(), &c.endpoint, &c.sponsor));
        }
        if let Some(c) = &self.aptos {
            out.push((c.name.as_str(), &c.endpoint, &c.sponsor));
        }
        if let Some(c) = &self.sui {
            out.push((c.name.as_str(), &c.endpoint, &c.sponsor));
        }
        if let Some(c) = &self.near {
            out.push((c.name.as_str(), &c.endpoint, &c.sponsor));
        }
        if let Some(c) = &self.ton {
            out.push((c.name.as_str(), &c.endpoint, &c.sponsor));
        }
        out
    }

    /// 验证配置有效性，一次性报告所有问题
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            errors.push(format!("LOG_LEVEL must be one of: {:?}", valid_levels));
        }
        if self.logging.format != "json" && self.logging.format != "text" {
            errors.push("LOG_FORMAT must be 'json' or 'text'".to_string());
        }

        for (name, endpoint, sponsor) in self.endpoints() {
            if name.trim().is_empty() {
                errors.push("chain name must not be empty".to_string());
            }
            if !endpoint.enabled {
                continue;
            }
            if !endpoint.rpc_url.starts_with("http://") && !endpoint.rpc_url.starts_with("https://")
            {
                errors.push(format!("{name}: rpc_url must start with http:// or https://"));
            }
            if endpoint.factory_address.trim().is_empty() {
                errors.push(format!("{name}: factory_address is required"));
            }
            if sponsor.min_balance.is_sign_negative() {
                errors.push(format!("{name}: min_balance must not be negative"));
            }
        }

        let mut chain_ids: Vec<u64> = self.evm.iter().map(|c| c.chain_id).collect();
        chain_ids.sort_unstable();
        if chain_ids.windows(2).any(|w| w[0] == w[1]) {
            errors.push("evm: duplicate chain_id".to_string());
        }

        if let Some(sui) = &self.sui {
            if sui.endpoint.enabled && sui.registry_object_id.trim().is_empty() {
                errors.push(format!("{}: registry_object_id is required", sui.name));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("invalid configuration: {}", errors.join("; "))
        }
    }
}

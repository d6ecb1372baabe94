//! 部署编排
//!
//! 所有链共用的流程：检查 → 已存在则跳过 → 校验余额并提交 → 等待确认 → 验证。
//! 链相关的步骤由 [`AccountDeployer`] 提供，[`run`] 负责顺序、并发与状态流转。
//!
//! 提交之前的错误可由调用方整体重试（重新预测会发现账户已存在）；
//! 提交之后的错误对本次调用是终态。

use std::time::Duration;

use async_trait::async_trait;

use crate::{
    config::DeploymentConfig,
    domain::{
        account::DeployAccountResult, chain_config::ChainConfig, derivation::DerivedIdentity,
        handler::HandlerCapabilities, sponsor::SponsorConfig,
    },
    error::ChainError,
};

/// 地址来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSource {
    /// 工厂 / 注册表链上读取
    OnChain,
    /// 本地推导即权威结果（Solana PDA）
    Local,
    /// 链上读取失败，本地复算
    LocalFallback,
    /// 无法确定地址，返回占位（如 Sui 注册表对象）
    Placeholder,
}

/// 地址预测
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prediction {
    /// 对外展示的地址（Solana 为 vault PDA）
    pub account_address: String,
    pub is_deployed: bool,
    pub source: AddressSource,
}

/// 赞助方资金读取结果（最小单位）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SponsorFunding {
    pub balance: u128,
    /// 工厂动态部署费，读取失败记 0
    pub fee: u128,
}

/// 交易确认结果
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Confirmation {
    pub gas_used: Option<String>,
}

/// 部署状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployStage {
    Unresolved,
    Predicted,
    AlreadyDeployed,
    PendingSubmission,
    Submitted,
    Confirmed,
    Verified,
}

impl DeployStage {
    pub fn can_transition_to(&self, next: DeployStage) -> bool {
        use DeployStage::*;
        matches!(
            (self, next),
            (Unresolved, Predicted)
                | (Predicted, AlreadyDeployed)
                | (Predicted, PendingSubmission)
                | (PendingSubmission, Submitted)
                | (Submitted, Confirmed)
                | (Confirmed, Verified)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::AlreadyDeployed | Self::Verified)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unresolved => "unresolved",
            Self::Predicted => "predicted",
            Self::AlreadyDeployed => "already_deployed",
            Self::PendingSubmission => "pending_submission",
            Self::Submitted => "submitted",
            Self::Confirmed => "confirmed",
            Self::Verified => "verified",
        }
    }
}

/// 单次部署调用的状态跟踪
struct StageTracker<'a> {
    chain: &'a str,
    identity: &'a str,
    stage: DeployStage,
}

impl<'a> StageTracker<'a> {
    fn new(chain: &'a str, identity: &'a str) -> Self {
        Self {
            chain,
            identity,
            stage: DeployStage::Unresolved,
        }
    }

    fn advance(&mut self, next: DeployStage) -> Result<(), ChainError> {
        if !self.stage.can_transition_to(next) {
            return Err(ChainError::invalid_state(
                self.chain,
                format!(
                    "illegal deployment transition {} -> {}",
                    self.stage.as_str(),
                    next.as_str()
                ),
            ));
        }
        tracing::info!(
            chain = %self.chain,
            identity = %self.identity,
            from = self.stage.as_str(),
            to = next.as_str(),
            "Deployment stage"
        );
        self.stage = next;
        Ok(())
    }
}

/// 链相关的部署步骤
#[async_trait]
pub trait AccountDeployer: Send + Sync {
    /// 已解析的签名者（私钥、地址等）
    type Signer: Send + Sync;

    fn chain_config(&self) -> &ChainConfig;

    fn sponsor(&self) -> &SponsorConfig;

    fn capabilities(&self) -> HandlerCapabilities {
        HandlerCapabilities::DETERMINISTIC
    }

    /// 账户在确认后才异步出现（例如 TON 内部消息），验证需要轮询
    fn verification_is_eventual(&self) -> bool {
        false
    }

    /// 拒绝空 / 零工厂地址
    fn ensure_factory(&self) -> Result<(), ChainError> {
        let config = self.chain_config();
        if config.factory_address.trim().is_empty() {
            return Err(ChainError::configuration(&config.name, "factory address is empty"));
        }
        Ok(())
    }

    /// 解析赞助私钥
    fn load_signer(&self) -> Result<Self::Signer, ChainError>;

    /// 预测地址并查询是否已部署
    async fn predict(&self, identity: &DerivedIdentity) -> Result<Prediction, ChainError>;

    /// 部署路径上的预测：存在性查询失败必须返回错误，不能退化为“未部署”
    async fn predict_for_deployment(&self, identity: &DerivedIdentity) -> Result<Prediction, ChainError> {
        self.predict(identity).await
    }

    /// 赞助方余额与动态费用
    async fn read_funding(&self, signer: &Self::Signer) -> Result<SponsorFunding, ChainError>;

    /// 构造、签名并提交部署交易，返回交易哈希
    async fn submit(
        &self,
        signer: &Self::Signer,
        identity: &DerivedIdentity,
        funding: &SponsorFunding,
    ) -> Result<String, ChainError>;

    /// 查询确认状态；`None` 表示尚未确认
    async fn check_confirmation(
        &self,
        signer: &Self::Signer,
        tx_hash: &str,
    ) -> Result<Option<Confirmation>, ChainError>;

    /// 确认后重新查询链上状态，返回实际地址；`None` 表示账户尚不存在
    async fn verify(
        &self,
        identity: &DerivedIdentity,
        prediction: &Prediction,
    ) -> Result<Option<String>, ChainError>;

    /// 任意地址的原生余额（最小单位）
    async fn native_balance(&self, address: &str) -> Result<u128, ChainError>;
}

/// 执行一次部署
pub async fn run<D: AccountDeployer + ?Sized>(
    deployer: &D,
    settings: &DeploymentConfig,
    identity: &DerivedIdentity,
) -> Result<DeployAccountResult, ChainError> {
    let config = deployer.chain_config();
    let chain = config.name.as_str();
    let mut tracker = StageTracker::new(chain, identity.identity());

    let sponsor = deployer.sponsor();
    if !sponsor.is_configured() {
        return Err(ChainError::configuration(
            chain,
            "sponsored deployment is not configured",
        ));
    }

    let signer = deployer.load_signer()?;

    // 地址预测与资金读取并发；已部署时忽略资金读取结果
    let (prediction, funding) = tokio::join!(
        deployer.predict_for_deployment(identity),
        deployer.read_funding(&signer)
    );
    let prediction = prediction?;
    tracker.advance(DeployStage::Predicted)?;

    if prediction.is_deployed {
        tracker.advance(DeployStage::AlreadyDeployed)?;
        let explorer_url = config.address_url(&prediction.account_address);
        return Ok(DeployAccountResult::already_existed(
            prediction.account_address,
            explorer_url,
            chain,
        ));
    }

    let funding = funding?;
    sponsor.ensure_funds(chain, &config.symbol, config.decimals, funding.balance, funding.fee)?;
    deployer.ensure_factory()?;
    tracker.advance(DeployStage::PendingSubmission)?;

    let tx_hash = deployer.submit(&signer, identity, &funding).await?;
    tracker.advance(DeployStage::Submitted)?;
    tracing::info!(chain, identity = %identity.identity(), tx_hash = %tx_hash, "Deployment submitted");

    let poll = Duration::from_millis(settings.confirmation_poll_interval_ms);
    let confirmation = loop {
        match deployer.check_confirmation(&signer, &tx_hash).await {
            Ok(Some(confirmation)) => break confirmation,
            Ok(None) => tokio::time::sleep(poll).await,
            Err(e) => {
                tracing::error!(chain, tx_hash = %tx_hash, error = %e, "Confirmation failed");
                return Err(e);
            }
        }
    };
    tracker.advance(DeployStage::Confirmed)?;

    let attempts = if deployer.verification_is_eventual() {
        settings.verification_attempts.max(1)
    } else {
        1
    };
    let interval = Duration::from_millis(settings.verification_interval_ms);
    let mut verified = None;
    for attempt in 1..=attempts {
        verified = deployer.verify(identity, &prediction).await?;
        if verified.is_some() {
            break;
        }
        if attempt < attempts {
            tracing::debug!(chain, attempt, "Account not visible yet");
            tokio::time::sleep(interval).await;
        }
    }
    let account_address = verified.ok_or_else(|| {
        ChainError::invalid_state(
            chain,
            format!("account missing after confirmed transaction {tx_hash}"),
        )
    })?;
    tracker.advance(DeployStage::Verified)?;

    tracing::info!(
        chain,
        identity = %identity.identity(),
        address = %account_address,
        tx_hash = %tx_hash,
        "Account deployed"
    );

    Ok(DeployAccountResult::deployed(
        account_address,
        tx_hash.clone(),
        config.tx_url(&tx_hash),
        confirmation.gas_used,
        chain,
    ))
}

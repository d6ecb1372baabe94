//! Sui 链处理器
//!
//! Sui 的对象 ID 由运行时分配，无法在部署前确定地址。工厂把
//! owner32 → 账户对象 ID 记录在注册表共享对象的动态字段里：
//! 查到即已部署；查不到时返回注册表对象作为占位地址并记录警告。
//! 部署前的查询失败直接返回错误，避免对已登记的身份重复提交。

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use blake2::{digest::consts::U32, Blake2b, Digest};
use ed25519_dalek::{Signer as _, SigningKey};
use serde_json::{json, Value};

use super::{
    aptos::{format_address, parse_address},
    ed25519_key, str_field, u128_field,
};
use crate::{
    domain::{
        chain_config::ChainConfig,
        deployment::{AccountDeployer, AddressSource, Confirmation, Prediction, SponsorFunding},
        derivation::DerivedIdentity,
        handler::HandlerCapabilities,
        sponsor::SponsorConfig,
    },
    error::{ChainError, TransportError, TransportResultExt},
    infrastructure::RpcTransport,
};

type Blake2b256 = Blake2b<U32>;

const ED25519_FLAG: u8 = 0x00;
/// TransactionData 意图前缀：scope / version / app id
const TRANSACTION_INTENT: [u8; 3] = [0, 0, 0];
const SUI_COIN_TYPE: &str = "0x2::sui::SUI";
const PRIVATE_KEY_HRP: &str = "suiprivkey";

fn blake2b256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// ed25519 公钥 → Sui 地址
pub fn address_of(public_key: &[u8; 32]) -> String {
    format_address(&blake2b256(&[&[ED25519_FLAG][..], &public_key[..]]))
}

/// 交易签名：`flag ‖ sig ‖ pubkey` 的 base64
pub fn sign_transaction(key: &SigningKey, tx_bytes: &[u8]) -> String {
    let digest = blake2b256(&[&TRANSACTION_INTENT[..], tx_bytes]);
    let signature = key.sign(&digest);

    let mut serialized = Vec::with_capacity(97);
    serialized.push(ED25519_FLAG);
    serialized.extend_from_slice(&signature.to_bytes());
    serialized.extend_from_slice(key.verifying_key().as_bytes());
    BASE64.encode(serialized)
}

pub struct SuiSigner {
    key: SigningKey,
    address: String,
}

pub struct SuiChain {
    config: ChainConfig,
    sponsor: SponsorConfig,
    transport: Arc<dyn RpcTransport>,
    registry_object_id: String,
    gas_budget: u64,
}

impl SuiChain {
    pub fn new(
        config: ChainConfig,
        sponsor: SponsorConfig,
        transport: Arc<dyn RpcTransport>,
        registry_object_id: String,
        gas_budget: u64,
    ) -> Self {
        Self {
            config,
            sponsor,
            transport,
            registry_object_id,
            gas_budget,
        }
    }

    fn chain(&self) -> &str {
        &self.config.name
    }

    fn registry(&self) -> Result<String, ChainError> {
        parse_address(&self.registry_object_id)
            .map(|id| format_address(&id))
            .map_err(|e| ChainError::configuration(self.chain(), format!("registry object id: {e}")))
    }

    fn package(&self) -> Result<String, ChainError> {
        parse_address(&self.config.factory_address)
            .map(|id| format_address(&id))
            .map_err(|e| ChainError::configuration(self.chain(), format!("package id: {e}")))
    }

    /// 注册表动态字段查询；`None` 表示未登记
    async fn lookup_account(&self, identity: &DerivedIdentity) -> Result<Option<String>, ChainError> {
        let result = self
            .transport
            .json_rpc(
                "suix_getDynamicFieldObject",
                json!([
                    self.registry()?,
                    { "type": "vector<u8>", "value": identity.owner32().to_vec() }
                ]),
            )
            .await
            .on_chain(self.chain())?;

        // 未登记时返回 {"error": {"code": "dynamicFieldNotFound", ...}}
        if result.get("data").map_or(true, Value::is_null) {
            return Ok(None);
        }
        let value = result
            .pointer("/data/content/fields/value")
            .ok_or_else(|| ChainError::malformed(self.chain(), "dynamic field has no value"))?;
        let id = str_field(self.chain(), value, "account object id")?;
        parse_address(id)
            .map(|id| Some(format_address(&id)))
            .map_err(|e| ChainError::malformed(self.chain(), e))
    }

    async fn balance_of(&self, address: &str) -> Result<u128, ChainError> {
        let result = self
            .transport
            .json_rpc("suix_getBalance", json!([address, SUI_COIN_TYPE]))
            .await
            .on_chain(self.chain())?;
        u128_field(self.chain(), &result["totalBalance"], "totalBalance")
    }

    /// 注册表对象上的 `deployment_fee` 字段
    async fn deployment_fee(&self) -> u128 {
        let fee = match self.registry() {
            Ok(registry) => self
                .transport
                .json_rpc("sui_getObject", json!([registry, { "showContent": true }]))
                .await
                .on_chain(self.chain())
                .and_then(|object| {
                    u128_field(
                        self.chain(),
                        object.pointer("/data/content/fields/deployment_fee").unwrap_or(&Value::Null),
                        "deployment_fee",
                    )
                }),
            Err(e) => Err(e),
        };
        match fee {
            Ok(fee) => fee,
            Err(e) => {
                tracing::warn!(chain = %self.chain(), error = %e, "deployment_fee read failed, assuming 0");
                0
            }
        }
    }

    /// `suiprivkey1...`（bech32）或 base64 `flag ‖ key`，也接受 32 字节 hex
    fn parse_signing_key(&self, key: &str) -> Result<SigningKey, ChainError> {
        let invalid = |msg: &str| ChainError::configuration(self.chain(), msg.to_string());

        let bytes = if key.starts_with(PRIVATE_KEY_HRP) {
            let (hrp, data) = bech32::decode(key).map_err(|_| invalid("sponsor key is not valid bech32"))?;
            if hrp.as_str() != PRIVATE_KEY_HRP {
                return Err(invalid("sponsor key has unexpected bech32 prefix"));
            }
            data
        } else if let Ok(bytes) = hex::decode(super::strip_0x(key)) {
            bytes
        } else {
            BASE64
                .decode(key)
                .map_err(|_| invalid("sponsor key encoding not recognized"))?
        };

        match bytes.split_first() {
            Some((&ED25519_FLAG, rest)) if rest.len() == 32 => ed25519_key(self.chain(), rest),
            Some(_) if bytes.len() == 33 => Err(invalid("only ed25519 sponsor keys are supported")),
            _ => ed25519_key(self.chain(), &bytes),
        }
    }
}

#[async_trait]
impl AccountDeployer for SuiChain {
    type Signer = SuiSigner;

    fn chain_config(&self) -> &ChainConfig {
        &self.config
    }

    fn sponsor(&self) -> &SponsorConfig {
        &self.sponsor
    }

    fn capabilities(&self) -> HandlerCapabilities {
        HandlerCapabilities {
            supports_pre_deployment_address_prediction: false,
            supports_local_derivation: false,
        }
    }

    fn ensure_factory(&self) -> Result<(), ChainError> {
        if self.package()? == format_address(&[0u8; 32]) {
            return Err(ChainError::configuration(self.chain(), "package id is 0x0"));
        }
        self.registry().map(|_| ())
    }

    fn load_signer(&self) -> Result<SuiSigner, ChainError> {
        let key = self.parse_signing_key(self.sponsor.private_key(self.chain())?)?;
        let address = address_of(key.verifying_key().as_bytes());
        Ok(SuiSigner { key, address })
    }

    /// 地址查询：注册表读取失败时仍返回占位地址
    async fn predict(&self, identity: &DerivedIdentity) -> Result<Prediction, ChainError> {
        match self.predict_for_deployment(identity).await {
            Ok(prediction) => Ok(prediction),
            Err(e) if e.is_retryable() => {
                tracing::warn!(
                    chain = %self.chain(),
                    identity = %identity.identity(),
                    error = %e,
                    "Registry lookup failed, returning registry object as placeholder"
                );
                Ok(Prediction {
                    account_address: self.registry()?,
                    is_deployed: false,
                    source: AddressSource::Placeholder,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn predict_for_deployment(&self, identity: &DerivedIdentity) -> Result<Prediction, ChainError> {
        if let Some(object_id) = self.lookup_account(identity).await? {
            return Ok(Prediction {
                account_address: object_id,
                is_deployed: true,
                source: AddressSource::OnChain,
            });
        }

        let registry = self.registry()?;
        tracing::warn!(
            chain = %self.chain(),
            identity = %identity.identity(),
            registry = %registry,
            "Account not in registry; object id is assigned at creation, returning placeholder"
        );
        Ok(Prediction {
            account_address: registry,
            is_deployed: false,
            source: AddressSource::Placeholder,
        })
    }

    async fn read_funding(&self, signer: &SuiSigner) -> Result<SponsorFunding, ChainError> {
        let (balance, fee) = tokio::join!(self.balance_of(&signer.address), self.deployment_fee());
        Ok(SponsorFunding {
            balance: balance?,
            // gas 预算也由赞助方承担
            fee: fee.saturating_add(u128::from(self.gas_budget)),
        })
    }

    async fn submit(
        &self,
        signer: &SuiSigner,
        identity: &DerivedIdentity,
        _funding: &SponsorFunding,
    ) -> Result<String, ChainError> {
        let built = self
            .transport
            .json_rpc(
                "unsafe_moveCall",
                json!([
                    signer.address,
                    self.package()?,
                    "account_factory",
                    "create_account",
                    [],
                    [
                        self.registry()?,
                        identity.owner32().to_vec(),
                        identity.identity(),
                        identity.salt64().to_string(),
                    ],
                    null,
                    self.gas_budget.to_string(),
                ]),
            )
            .await
            .on_chain(self.chain())?;

        let tx_bytes_b64 = str_field(self.chain(), &built["txBytes"], "txBytes")?;
        let tx_bytes = BASE64
            .decode(tx_bytes_b64)
            .map_err(|_| ChainError::malformed(self.chain(), "txBytes is not base64"))?;
        let signature = sign_transaction(&signer.key, &tx_bytes);

        let executed = self
            .transport
            .json_rpc(
                "sui_executeTransactionBlock",
                json!([
                    tx_bytes_b64,
                    [signature],
                    { "showEffects": true },
                    "WaitForLocalExecution"
                ]),
            )
            .await
            .on_chain(self.chain())?;
        Ok(str_field(self.chain(), &executed["digest"], "digest")?.to_string())
    }

    async fn check_confirmation(
        &self,
        _signer: &SuiSigner,
        tx_hash: &str,
    ) -> Result<Option<Confirmation>, ChainError> {
        let tx = match self
            .transport
            .json_rpc("sui_getTransactionBlock", json!([tx_hash, { "showEffects": true }]))
            .await
        {
            Ok(tx) => tx,
            // 尚未索引
            Err(TransportError::Rpc { message, .. }) if message.contains("find") => return Ok(None),
            Err(e) => return Err(ChainError::network(self.chain(), e)),
        };

        match tx.pointer("/effects/status/status").and_then(Value::as_str) {
            Some("success") => Ok(Some(Confirmation {
                gas_used: tx
                    .pointer("/effects/gasUsed/computationCost")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })),
            Some(_) => {
                let error = tx
                    .pointer("/effects/status/error")
                    .and_then(Value::as_str)
                    .unwrap_or("move call failed");
                Err(ChainError::transaction_failed(self.chain(), tx_hash, error))
            }
            None => Ok(None),
        }
    }

    /// 重新查询注册表拿到真实对象 ID
    async fn verify(
        &self,
        identity: &DerivedIdentity,
        _prediction: &Prediction,
    ) -> Result<Option<String>, ChainError> {
        self.lookup_account(identity).await
    }

    async fn native_balance(&self, address: &str) -> Result<u128, ChainError> {
        let address = parse_address(address).map_err(|e| ChainError::invalid_input(self.chain(), e))?;
        self.balance_of(&format_address(&address)).await
    }
}

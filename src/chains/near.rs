//! NEAR 链处理器
//!
//! 账户是工厂账户下的子账户：`hex(owner20).<factory>`。
//! 工厂合约 view `get_account_id({owner, identity, salt})` 返回同一结果；
//! 部署调用 `create_account`，附带 `get_deployment_fee` 返回的押金。

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::{Signer as _, SigningKey};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::{ed25519_key, str_field, u128_field};
use crate::{
    domain::{
        chain_config::ChainConfig,
        deployment::{AccountDeployer, AddressSource, Confirmation, Prediction, SponsorFunding},
        derivation::DerivedIdentity,
        sponsor::SponsorConfig,
    },
    error::{ChainError, TransportError, TransportResultExt},
    infrastructure::RpcTransport,
};

const MAX_ACCOUNT_ID_LEN: usize = 64;
const MIN_ACCOUNT_ID_LEN: usize = 2;

/// NEAR 账户 ID 规则：小写字母数字，`.`/`-`/`_` 分隔，分隔符不相邻、不在首尾
pub fn is_valid_account_id(id: &str) -> bool {
    if id.len() < MIN_ACCOUNT_ID_LEN || id.len() > MAX_ACCOUNT_ID_LEN {
        return false;
    }
    let mut last_was_separator = true;
    for c in id.chars() {
        let separator = matches!(c, '.' | '-' | '_');
        if separator {
            if last_was_separator {
                return false;
            }
        } else if !(c.is_ascii_lowercase() || c.is_ascii_digit()) {
            return false;
        }
        last_was_separator = separator;
    }
    !last_was_separator
}

/// 本地推导的子账户名
pub fn sub_account_id(owner: &[u8; 20], factory: &str) -> String {
    format!("{}.{}", hex::encode(owner), factory)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 交易结构（borsh 布局与 nearcore 一致）
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum PublicKey {
    Ed25519([u8; 32]),
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Signature {
    Ed25519([u8; 64]),
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct FunctionCallAction {
    pub method_name: String,
    pub args: Vec<u8>,
    pub gas: u64,
    pub deposit: u128,
}

/// 变体顺序决定 borsh 标签，不可调整
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Action {
    CreateAccount,
    DeployContract { code: Vec<u8> },
    FunctionCall(Box<FunctionCallAction>),
    Transfer { deposit: u128 },
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Transaction {
    pub signer_id: String,
    pub public_key: PublicKey,
    pub nonce: u64,
    pub receiver_id: String,
    pub block_hash: [u8; 32],
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    pub signature: Signature,
}

impl Transaction {
    /// 签名对象为 borsh(tx) 的 sha256
    pub fn sign(self, key: &SigningKey) -> std::io::Result<SignedTransaction> {
        let hash = Sha256::digest(borsh::to_vec(&self)?);
        let signature = key.sign(&hash);
        Ok(SignedTransaction {
            transaction: self,
            signature: Signature::Ed25519(signature.to_bytes()),
        })
    }
}

fn format_public_key(key: &SigningKey) -> String {
    format!("ed25519:{}", bs58::encode(key.verifying_key().as_bytes()).into_string())
}

/// 查询不到账户时的 RPC 错误
fn is_unknown_account(error: &TransportError) -> bool {
    match error {
        TransportError::Rpc { message, data, .. } => {
            let data = data.as_ref().map(Value::to_string).unwrap_or_default();
            data.contains("UNKNOWN_ACCOUNT") || message.contains("does not exist")
        }
        _ => false,
    }
}

pub struct NearSigner {
    key: SigningKey,
    account_id: String,
}

pub struct NearChain {
    config: ChainConfig,
    sponsor: SponsorConfig,
    transport: Arc<dyn RpcTransport>,
    sponsor_account_id: Option<String>,
    gas: u64,
}

impl NearChain {
    pub fn new(
        config: ChainConfig,
        sponsor: SponsorConfig,
        transport: Arc<dyn RpcTransport>,
        sponsor_account_id: Option<String>,
        gas: u64,
    ) -> Self {
        Self {
            config,
            sponsor,
            transport,
            sponsor_account_id,
            gas,
        }
    }

    fn chain(&self) -> &str {
        &self.config.name
    }

    fn factory(&self) -> &str {
        &self.config.factory_address
    }

    fn account_args(identity: &DerivedIdentity) -> Value {
        json!({
            "owner": hex::encode(identity.owner20()),
            "identity": identity.identity(),
            "salt": identity.salt64().to_string(),
        })
    }

    async fn query(&self, params: Value) -> Result<Value, TransportError> {
        let result = self.transport.json_rpc("query", params).await?;
        // 部分节点把查询错误放在 result.error 中
        if let Some(error) = result.get("error").and_then(Value::as_str) {
            return Err(TransportError::Rpc {
                code: -32000,
                message: error.to_string(),
                data: None,
            });
        }
        Ok(result)
    }

    /// 调用工厂 view 方法，返回解析后的 JSON
    async fn view_function(&self, method: &str, args: Value) -> Result<Value, ChainError> {
        let result = self
            .query(json!({
                "request_type": "call_function",
                "finality": "final",
                "account_id": self.factory(),
                "method_name": method,
                "args_base64": BASE64.encode(args.to_string()),
            }))
            .await
            .on_chain(self.chain())?;

        let bytes: Vec<u8> = serde_json::from_value(result["result"].clone())
            .map_err(|_| ChainError::malformed(self.chain(), "view result is not a byte array"))?;
        serde_json::from_slice(&bytes)
            .map_err(|_| ChainError::malformed(self.chain(), format!("{method} returned non-JSON")))
    }

    /// `None` 表示账户不存在
    async fn view_account(&self, account_id: &str) -> Result<Option<Value>, ChainError> {
        match self
            .query(json!({
                "request_type": "view_account",
                "finality": "final",
                "account_id": account_id,
            }))
            .await
        {
            Ok(account) => Ok(Some(account)),
            Err(e) if is_unknown_account(&e) => Ok(None),
            Err(e) => Err(ChainError::network(self.chain(), e)),
        }
    }

    async fn balance_of(&self, account_id: &str) -> Result<u128, ChainError> {
        match self.view_account(account_id).await? {
            Some(account) => u128_field(self.chain(), &account["amount"], "amount"),
            None => Ok(0),
        }
    }

    async fn deployment_fee(&self) -> u128 {
        match self
            .view_function("get_deployment_fee", json!({}))
            .await
            .and_then(|v| u128_field(self.chain(), &v, "deployment fee"))
        {
            Ok(fee) => fee,
            Err(e) => {
                tracing::warn!(chain = %self.chain(), error = %e, "get_deployment_fee failed, assuming 0");
                0
            }
        }
    }

    fn local_account_id(&self, identity: &DerivedIdentity) -> Result<String, ChainError> {
        let id = sub_account_id(&identity.owner20(), self.factory());
        if !is_valid_account_id(&id) {
            return Err(ChainError::configuration(
                self.chain(),
                format!("derived sub-account {id} is not a valid account id; factory name too long?"),
            ));
        }
        Ok(id)
    }
}

#[async_trait]
impl AccountDeployer for NearChain {
    type Signer = NearSigner;

    fn chain_config(&self) -> &ChainConfig {
        &self.config
    }

    fn sponsor(&self) -> &SponsorConfig {
        &self.sponsor
    }

    fn ensure_factory(&self) -> Result<(), ChainError> {
        if !is_valid_account_id(self.factory()) {
            return Err(ChainError::configuration(self.chain(), "factory is not a valid account id"));
        }
        Ok(())
    }

    fn load_signer(&self) -> Result<NearSigner, ChainError> {
        let key = self.sponsor.private_key(self.chain())?;
        let encoded = key.strip_prefix("ed25519:").unwrap_or(key);
        let bytes = bs58::decode(encoded)
            .into_vec()
            .map_err(|_| ChainError::configuration(self.chain(), "sponsor key is not base58"))?;
        let key = ed25519_key(self.chain(), &bytes)?;

        // 未配置账户名时使用隐式账户（公钥 hex）
        let account_id = self
            .sponsor_account_id
            .clone()
            .unwrap_or_else(|| hex::encode(key.verifying_key().as_bytes()));
        Ok(NearSigner { key, account_id })
    }

    async fn predict(&self, identity: &DerivedIdentity) -> Result<Prediction, ChainError> {
        let on_chain = self
            .view_function("get_account_id", Self::account_args(identity))
            .await
            .and_then(|v| str_field(self.chain(), &v, "account id").map(str::to_string));

        let (account_id, source) = match on_chain {
            Ok(id) if id.trim().is_empty() => {
                return Err(ChainError::invalid_state(self.chain(), "factory returned an empty account id"))
            }
            Ok(id) => (id, AddressSource::OnChain),
            Err(e) => {
                tracing::warn!(
                    chain = %self.chain(),
                    identity = %identity.identity(),
                    error = %e,
                    "get_account_id failed, using local sub-account derivation"
                );
                (self.local_account_id(identity)?, AddressSource::LocalFallback)
            }
        };

        let is_deployed = self.view_account(&account_id).await?.is_some();
        Ok(Prediction {
            account_address: account_id,
            is_deployed,
            source,
        })
    }

    async fn read_funding(&self, signer: &NearSigner) -> Result<SponsorFunding, ChainError> {
        let (balance, fee) = tokio::join!(self.balance_of(&signer.account_id), self.deployment_fee());
        Ok(SponsorFunding {
            balance: balance?,
            fee,
        })
    }

    async fn submit(
        &self,
        signer: &NearSigner,
        identity: &DerivedIdentity,
        funding: &SponsorFunding,
    ) -> Result<String, ChainError> {
        let access_key = self
            .query(json!({
                "request_type": "view_access_key",
                "finality": "final",
                "account_id": signer.account_id,
                "public_key": format_public_key(&signer.key),
            }))
            .await
            .on_chain(self.chain())?;

        let nonce = access_key["nonce"]
            .as_u64()
            .ok_or_else(|| ChainError::malformed(self.chain(), "access key has no nonce"))?;
        let block_hash: [u8; 32] = bs58::decode(str_field(self.chain(), &access_key["block_hash"], "block_hash")?)
            .into_vec()
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| ChainError::malformed(self.chain(), "block_hash is not 32 bytes"))?;

        let tx = Transaction {
            signer_id: signer.account_id.clone(),
            public_key: PublicKey::Ed25519(signer.key.verifying_key().to_bytes()),
            nonce: nonce + 1,
            receiver_id: self.factory().to_string(),
            block_hash,
            actions: vec![Action::FunctionCall(Box::new(FunctionCallAction {
                method_name: "create_account".to_string(),
                args: Self::account_args(identity).to_string().into_bytes(),
                gas: self.gas,
                deposit: funding.fee,
            }))],
        };
        let signed = tx
            .sign(&signer.key)
            .and_then(|signed| borsh::to_vec(&signed))
            .map_err(|e| ChainError::invalid_input(self.chain(), format!("transaction encoding: {e}")))?;

        let result = self
            .transport
            .json_rpc("broadcast_tx_async", json!([BASE64.encode(signed)]))
            .await
            .on_chain(self.chain())?;
        Ok(str_field(self.chain(), &result, "transaction hash")?.to_string())
    }

    async fn check_confirmation(
        &self,
        signer: &NearSigner,
        tx_hash: &str,
    ) -> Result<Option<Confirmation>, ChainError> {
        let outcome = match self
            .transport
            .json_rpc("tx", json!([tx_hash, signer.account_id]))
            .await
        {
            Ok(outcome) => outcome,
            Err(TransportError::Rpc { message, data, .. })
                if message.contains("UNKNOWN_TRANSACTION")
                    || data.as_ref().map(Value::to_string).unwrap_or_default().contains("UNKNOWN_TRANSACTION") =>
            {
                return Ok(None)
            }
            Err(e) => return Err(ChainError::network(self.chain(), e)),
        };

        let status = &outcome["status"];
        if let Some(failure) = status.get("Failure") {
            return Err(ChainError::transaction_failed(self.chain(), tx_hash, failure.to_string()));
        }
        if status.get("SuccessValue").is_none() && status.get("SuccessReceiptId").is_none() {
            return Ok(None);
        }

        let receipts_gas: u64 = outcome["receipts_outcome"]
            .as_array()
            .map(|receipts| {
                receipts
                    .iter()
                    .filter_map(|r| r.pointer("/outcome/gas_burnt").and_then(Value::as_u64))
                    .sum()
            })
            .unwrap_or(0);
        let gas_used = outcome
            .pointer("/transaction_outcome/outcome/gas_burnt")
            .and_then(Value::as_u64)
            .map(|tx_gas| (tx_gas + receipts_gas).to_string());
        Ok(Some(Confirmation { gas_used }))
    }

    async fn verify(
        &self,
        _identity: &DerivedIdentity,
        prediction: &Prediction,
    ) -> Result<Option<String>, ChainError> {
        Ok(self
            .view_account(&prediction.account_address)
            .await?
            .map(|_| prediction.account_address.clone()))
    }

    async fn native_balance(&self, address: &str) -> Result<u128, ChainError> {
        self.balance_of(address).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_id_rules() {
        assert!(is_valid_account_id("factory.testnet"));
        assert!(is_valid_account_id("a-b_c.near"));
        assert!(is_valid_account_id(&"a".repeat(64)));
        assert!(!is_valid_account_id(&"a".repeat(65)));
        assert!(!is_valid_account_id("a"));
        assert!(!is_valid_account_id(".near"));
        assert!(!is_valid_account_id("near."));
        assert!(!is_valid_account_id("a..near"));
        assert!(!is_valid_account_id("Upper.near"));
    }

    #[test]
    fn test_sub_account_length() {
        let id = sub_account_id(&[0xab; 20], "factory.testnet");
        assert_eq!(id.len(), 40 + 1 + 15);
        assert!(is_valid_account_id(&id));

        let too_long = sub_account_id(&[0xab; 20], "a-very-long-factory-name.testnet");
        assert!(!is_valid_account_id(&too_long));
    }

    #[test]
    fn test_function_call_borsh_layout() {
        let tx = Transaction {
            signer_id: "ab".into(),
            public_key: PublicKey::Ed25519([1u8; 32]),
            nonce: 5,
            receiver_id: "cd".into(),
            block_hash: [2u8; 32],
            actions: vec![Action::FunctionCall(Box::new(FunctionCallAction {
                method_name: "m".into(),
                args: b"{}".to_vec(),
                gas: 7,
                deposit: 9,
            }))],
        };
        let bytes = borsh::to_vec(&tx).unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(&2u32.to_le_bytes());
        expected.extend_from_slice(b"ab");
        expected.push(0);
        expected.extend_from_slice(&[1u8; 32]);
        expected.extend_from_slice(&5u64.to_le_bytes());
        expected.extend_from_slice(&2u32.to_le_bytes());
        expected.extend_from_slice(b"cd");
        expected.extend_from_slice(&[2u8; 32]);
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.push(2);
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.extend_from_slice(b"m");
        expected.extend_from_slice(&2u32.to_le_bytes());
        expected.extend_from_slice(b"{}");
        expected.extend_from_slice(&7u64.to_le_bytes());
        expected.extend_from_slice(&9u128.to_le_bytes());
        assert_eq!(bytes, expected);

        let key = SigningKey::from_bytes(&[3u8; 32]);
        let signed = borsh::to_vec(&tx.sign(&key).unwrap()).unwrap();
        assert_eq!(signed.len(), bytes.len() + 1 + 64);
        assert_eq!(&signed[..bytes.len()], bytes.as_slice());
    }

    #[test]
    fn test_unknown_account_detection() {
        let err = TransportError::Rpc {
            code: -32000,
            message: "Server error".into(),
            data: Some(json!({"name": "UNKNOWN_ACCOUNT"})),
        };
        assert!(is_unknown_account(&err));
        assert!(!is_unknown_account(&TransportError::Request("timeout".into())));
    }
}

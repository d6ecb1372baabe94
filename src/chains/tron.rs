//! TRON 链处理器
//!
//! 合约与 EVM 工厂同一套 ABI，通过 TronGrid HTTP API 调用。
//! 地址为 `0x41 ‖ 20 字节` 的 Base58Check；CREATE2 前缀为 `0x41`。

use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::Address;
use k256::ecdsa::SigningKey;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::{create2, evm::abi, strip_0x, u128_field};
use crate::{
    domain::{
        chain_config::ChainConfig,
        deployment::{AccountDeployer, AddressSource, Confirmation, Prediction, SponsorFunding},
        derivation::{keccak256, DerivedIdentity},
        sponsor::SponsorConfig,
    },
    error::{ChainError, TransportError, TransportResultExt},
    infrastructure::RpcTransport,
};

const ADDRESS_PREFIX: u8 = 0x41;

/// TronGrid API Key 请求头
pub const API_KEY_HEADER: &str = "tron-pro-api-key";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 地址编码
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// 20 字节地址 → Base58Check (T...)
pub fn encode_address(address: [u8; 20]) -> String {
    let mut payload = Vec::with_capacity(21);
    payload.push(ADDRESS_PREFIX);
    payload.extend_from_slice(&address);
    bs58::encode(payload).with_check().into_string()
}

/// Base58Check 或 41 开头的 hex → 20 字节地址
pub fn decode_address(address: &str) -> Result<[u8; 20], String> {
    let bytes = if address.starts_with('T') {
        bs58::decode(address)
            .with_check(None)
            .into_vec()
            .map_err(|e| format!("invalid base58check address: {e}"))?
    } else {
        hex::decode(strip_0x(address)).map_err(|_| "invalid hex address".to_string())?
    };

    if bytes.len() != 21 || bytes[0] != ADDRESS_PREFIX {
        return Err("tron address must be 21 bytes starting with 0x41".to_string());
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&bytes[1..]);
    Ok(out)
}

/// secp256k1 公钥 → TRON 地址
fn address_of(key: &SigningKey) -> [u8; 20] {
    let point = key.verifying_key().to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[12..]);
    out
}

/// 赞助方签名者
pub struct TronSigner {
    key: SigningKey,
    address: String,
}

pub struct TronChain {
    config: ChainConfig,
    sponsor: SponsorConfig,
    transport: Arc<dyn RpcTransport>,
    fee_limit_sun: u64,
}

impl TronChain {
    pub fn new(
        config: ChainConfig,
        sponsor: SponsorConfig,
        transport: Arc<dyn RpcTransport>,
        fee_limit_sun: u64,
    ) -> Self {
        Self {
            config,
            sponsor,
            transport,
            fee_limit_sun,
        }
    }

    fn chain(&self) -> &str {
        &self.config.name
    }

    fn factory(&self) -> Result<[u8; 20], ChainError> {
        decode_address(&self.config.factory_address)
            .map_err(|e| ChainError::configuration(self.chain(), format!("factory address: {e}")))
    }

    /// 节点以 `{"code": ..., "message": <hex>}` 报告的业务错误
    fn node_error(&self, response: &Value) -> Option<String> {
        let message = response
            .get("message")
            .or_else(|| response.pointer("/result/message"))?
            .as_str()?;
        let decoded = hex::decode(message)
            .ok()
            .and_then(|b| String::from_utf8(b).ok())
            .unwrap_or_else(|| message.to_string());
        Some(decoded)
    }

    /// `triggerconstantcontract` 只读调用
    async fn call_factory(&self, signature: &str, params: &[u8]) -> Result<Vec<u8>, ChainError> {
        let body = json!({
            "owner_address": encode_address([0u8; 20]),
            "contract_address": encode_address(self.factory()?),
            "function_selector": signature,
            "parameter": hex::encode(params),
            "visible": true,
        });
        let response = self
            .transport
            .post("wallet/triggerconstantcontract", body)
            .await
            .on_chain(self.chain())?;

        if response.pointer("/result/result").and_then(Value::as_bool) != Some(true) {
            let message = self.node_error(&response).unwrap_or_else(|| "constant call failed".into());
            return Err(ChainError::network(
                self.chain(),
                TransportError::Rpc {
                    code: -1,
                    message,
                    data: None,
                },
            ));
        }

        let output = response
            .pointer("/constant_result/0")
            .and_then(Value::as_str)
            .ok_or_else(|| ChainError::malformed(self.chain(), "missing constant_result"))?;
        hex::decode(output).map_err(|_| ChainError::malformed(self.chain(), "constant_result is not hex"))
    }

    fn account_params(identity: &DerivedIdentity) -> Vec<u8> {
        abi::account_params(
            Address::from(identity.owner20()),
            identity.identity(),
            identity.salt256(),
        )
    }

    async fn factory_account_address(&self, identity: &DerivedIdentity) -> Result<[u8; 20], ChainError> {
        let bytes = self
            .call_factory(abi::GET_ADDRESS, &Self::account_params(identity))
            .await?;
        Ok(abi::decode_address(self.chain(), &bytes)?.0)
    }

    async fn local_account_address(&self, identity: &DerivedIdentity) -> Result<[u8; 20], ChainError> {
        let bytes = self.call_factory(abi::IMPLEMENTATION, &[]).await?;
        let implementation = abi::decode_address(self.chain(), &bytes)?;
        if implementation.is_zero() {
            return Err(ChainError::invalid_state(
                self.chain(),
                "factory reports the zero account implementation",
            ));
        }
        Ok(create2::predict_account_address(
            create2::TRON_PREFIX,
            self.factory()?,
            implementation.0,
            identity.owner20(),
            identity.identity(),
            identity.salt256(),
        ))
    }

    async fn is_deployed(&self, address: [u8; 20]) -> Result<bool, ChainError> {
        let registered = self
            .call_factory(abi::IS_DEPLOYED, &abi::address_param(Address::from(address)))
            .await
            .and_then(|bytes| abi::decode_bool(self.chain(), &bytes));
        match registered {
            Ok(deployed) => Ok(deployed),
            Err(e) => {
                tracing::debug!(chain = %self.chain(), error = %e, "isDeployedAccount failed, checking contract");
                let contract = self
                    .transport
                    .post(
                        "wallet/getcontract",
                        json!({ "value": encode_address(address), "visible": true }),
                    )
                    .await
                    .on_chain(self.chain())?;
                Ok(contract.get("bytecode").is_some() || contract.get("contract_address").is_some())
            }
        }
    }

    async fn balance_of(&self, address: &str) -> Result<u128, ChainError> {
        let account = self
            .transport
            .post("wallet/getaccount", json!({ "address": address, "visible": true }))
            .await
            .on_chain(self.chain())?;
        // 未激活账户返回 {}
        match account.get("balance") {
            Some(balance) => u128_field(self.chain(), balance, "balance"),
            None => Ok(0),
        }
    }

    async fn deployment_fee(&self) -> u128 {
        match self
            .call_factory(abi::DEPLOYMENT_FEE, &[])
            .await
            .and_then(|bytes| abi::decode_uint(self.chain(), &bytes))
        {
            Ok(fee) => super::u256_to_u128(fee),
            Err(e) => {
                tracing::warn!(chain = %self.chain(), error = %e, "deploymentFee read failed, assuming 0");
                0
            }
        }
    }

    /// 校验 txID == sha256(raw_data_hex) 后签名
    fn sign_transaction(&self, signer: &TronSigner, mut tx: Value) -> Result<Value, ChainError> {
        let tx_id = tx["txID"]
            .as_str()
            .ok_or_else(|| ChainError::malformed(self.chain(), "transaction missing txID"))?;
        let raw = tx["raw_data_hex"]
            .as_str()
            .and_then(|h| hex::decode(h).ok())
            .ok_or_else(|| ChainError::malformed(self.chain(), "transaction missing raw_data_hex"))?;

        let digest: [u8; 32] = Sha256::digest(&raw).into();
        if hex::encode(digest) != tx_id.to_lowercase() {
            return Err(ChainError::invalid_state(
                self.chain(),
                "node returned a transaction whose txID does not match raw_data",
            ));
        }

        let (signature, recovery_id) = signer
            .key
            .sign_prehash_recoverable(&digest)
            .map_err(|e| ChainError::configuration(self.chain(), format!("signing failed: {e}")))?;

        let mut sig = signature.to_bytes().to_vec();
        sig.push(recovery_id.to_byte() + 27);
        tx["signature"] = json!([hex::encode(sig)]);
        Ok(tx)
    }
}

#[async_trait]
impl AccountDeployer for TronChain {
    type Signer = TronSigner;

    fn chain_config(&self) -> &ChainConfig {
        &self.config
    }

    fn sponsor(&self) -> &SponsorConfig {
        &self.sponsor
    }

    fn ensure_factory(&self) -> Result<(), ChainError> {
        if self.factory()? == [0u8; 20] {
            return Err(ChainError::configuration(self.chain(), "factory address is the zero address"));
        }
        Ok(())
    }

    fn load_signer(&self) -> Result<TronSigner, ChainError> {
        let key = self.sponsor.private_key(self.chain())?;
        let bytes = hex::decode(strip_0x(key))
            .map_err(|_| ChainError::configuration(self.chain(), "sponsor private key is not hex"))?;
        let key = SigningKey::from_slice(&bytes)
            .map_err(|_| ChainError::configuration(self.chain(), "sponsor private key is not a valid secp256k1 key"))?;
        let address = encode_address(address_of(&key));
        Ok(TronSigner { key, address })
    }

    async fn predict(&self, identity: &DerivedIdentity) -> Result<Prediction, ChainError> {
        let (address, source) = match self.factory_account_address(identity).await {
            Ok(address) if address == [0u8; 20] => {
                return Err(ChainError::invalid_state(
                    self.chain(),
                    "factory returned the zero address",
                ))
            }
            Ok(address) => (address, AddressSource::OnChain),
            Err(e) => {
                tracing::warn!(
                    chain = %self.chain(),
                    identity = %identity.identity(),
                    error = %e,
                    "getAddress failed, using local CREATE2 derivation"
                );
                (self.local_account_address(identity).await?, AddressSource::LocalFallback)
            }
        };

        Ok(Prediction {
            account_address: encode_address(address),
            is_deployed: self.is_deployed(address).await?,
            source,
        })
    }

    async fn read_funding(&self, signer: &TronSigner) -> Result<SponsorFunding, ChainError> {
        let (balance, fee) = tokio::join!(self.balance_of(&signer.address), self.deployment_fee());
        Ok(SponsorFunding {
            balance: balance?,
            fee,
        })
    }

    async fn submit(
        &self,
        signer: &TronSigner,
        identity: &DerivedIdentity,
        funding: &SponsorFunding,
    ) -> Result<String, ChainError> {
        let call_value = u64::try_from(funding.fee)
            .map_err(|_| ChainError::invalid_state(self.chain(), "deployment fee exceeds u64"))?;
        let body = json!({
            "owner_address": signer.address,
            "contract_address": encode_address(self.factory()?),
            "function_selector": abi::CREATE_ACCOUNT,
            "parameter": hex::encode(Self::account_params(identity)),
            "fee_limit": self.fee_limit_sun,
            "call_value": call_value,
            "visible": true,
        });
        let response = self
            .transport
            .post("wallet/triggersmartcontract", body)
            .await
            .on_chain(self.chain())?;

        if response.pointer("/result/result").and_then(Value::as_bool) != Some(true) {
            let message = self.node_error(&response).unwrap_or_else(|| "trigger failed".into());
            return Err(ChainError::invalid_state(self.chain(), format!("triggersmartcontract: {message}")));
        }
        let tx = response
            .get("transaction")
            .cloned()
            .ok_or_else(|| ChainError::malformed(self.chain(), "missing transaction"))?;

        let signed = self.sign_transaction(signer, tx)?;
        let tx_id = signed["txID"].as_str().unwrap_or_default().to_string();

        let result = self
            .transport
            .post("wallet/broadcasttransaction", signed)
            .await
            .on_chain(self.chain())?;
        if result.get("result").and_then(Value::as_bool) != Some(true) {
            let message = self.node_error(&result).unwrap_or_else(|| "broadcast rejected".into());
            return Err(ChainError::transaction_failed(self.chain(), &tx_id, message));
        }

        Ok(tx_id)
    }

    async fn check_confirmation(
        &self,
        _signer: &TronSigner,
        tx_hash: &str,
    ) -> Result<Option<Confirmation>, ChainError> {
        let info = self
            .transport
            .post("wallet/gettransactioninfobyid", json!({ "value": tx_hash }))
            .await
            .on_chain(self.chain())?;

        // 未上链时返回 {}
        if info.get("id").is_none() && info.get("blockNumber").is_none() {
            return Ok(None);
        }

        if info.get("result").and_then(Value::as_str) == Some("FAILED") {
            let message = info
                .get("resMessage")
                .and_then(Value::as_str)
                .and_then(|m| hex::decode(m).ok())
                .and_then(|b| String::from_utf8(b).ok())
                .unwrap_or_else(|| "FAILED".to_string());
            return Err(ChainError::transaction_failed(self.chain(), tx_hash, message));
        }
        if let Some(result) = info.pointer("/receipt/result").and_then(Value::as_str) {
            if result != "SUCCESS" {
                return Err(ChainError::transaction_failed(self.chain(), tx_hash, result));
            }
        }

        let gas_used = info
            .pointer("/receipt/energy_usage_total")
            .and_then(Value::as_u64)
            .map(|e| e.to_string());
        Ok(Some(Confirmation { gas_used }))
    }

    async fn verify(
        &self,
        _identity: &DerivedIdentity,
        prediction: &Prediction,
    ) -> Result<Option<String>, ChainError> {
        let address = decode_address(&prediction.account_address)
            .map_err(|e| ChainError::invalid_state(self.chain(), e))?;
        Ok(self
            .is_deployed(address)
            .await?
            .then(|| prediction.account_address.clone()))
    }

    async fn native_balance(&self, address: &str) -> Result<u128, ChainError> {
        let raw = decode_address(address).map_err(|e| ChainError::invalid_input(self.chain(), e))?;
        self.balance_of(&encode_address(raw)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_address_encoding() {
        assert_eq!(encode_address([0u8; 20]), "T9yD14Nj9j7xAB4dbGeiX9h8unkKHxuWwb");
        assert_eq!(decode_address("T9yD14Nj9j7xAB4dbGeiX9h8unkKHxuWwb").unwrap(), [0u8; 20]);
    }

    #[test]
    fn test_hex_and_base58_forms_agree() {
        let raw = [0x5a; 20];
        let base58 = encode_address(raw);
        assert!(base58.starts_with('T'));
        assert_eq!(decode_address(&base58).unwrap(), raw);
        assert_eq!(decode_address(&format!("41{}", hex::encode(raw))).unwrap(), raw);
        assert!(decode_address(&hex::encode(raw)).is_err());
    }

    #[test]
    fn test_address_of_known_key() {
        // 私钥 1 对应的 EVM 地址为 0x7e5f4552091a69125d5dfcb7b8c2659029395bdf
        let mut secret = [0u8; 32];
        secret[31] = 1;
        let key = SigningKey::from_slice(&secret).unwrap();
        assert_eq!(
            hex::encode(address_of(&key)),
            "7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
    }
}

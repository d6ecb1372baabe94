//! Aptos 链处理器
//!
//! 工厂模块 `<factory>::account_factory`：
//! - `#[view] get_account_address(owner: vector<u8>, identity: String, salt: u64): address`
//! - `#[view] deployment_fee(): u64`
//! - `entry create_account(sponsor, owner, identity, salt)`
//!
//! 账户是以工厂为创建者的命名对象，地址 = `sha3_256(factory ‖ seed ‖ 0xFE)`。

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use ed25519_dalek::{Signer as _, SigningKey};
use serde_json::{json, Value};
use sha3::{Digest, Sha3_256};

use super::{ed25519_key, str_field, strip_0x, u128_field};
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

pub const ACCOUNT_SEED: &[u8] = b"certen_account";
const OBJECT_FROM_SEED_SCHEME: u8 = 0xFE;
const ED25519_SCHEME: u8 = 0x00;
const TX_EXPIRATION_SECS: u64 = 600;

/// 0x 地址 → 32 字节（短地址左侧补零）
pub fn parse_address(address: &str) -> Result<[u8; 32], String> {
    let hex_part = strip_0x(address.trim());
    if hex_part.is_empty() || hex_part.len() > 64 {
        return Err(format!("invalid address length: {address}"));
    }
    let padded = format!("{hex_part:0>64}");
    let bytes = hex::decode(padded).map_err(|_| format!("invalid hex address: {address}"))?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

pub fn format_address(address: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(address))
}

/// 命名对象地址
pub fn object_address(creator: &[u8; 32], seed: &[u8]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(creator);
    hasher.update(seed);
    hasher.update([OBJECT_FROM_SEED_SCHEME]);
    hasher.finalize().into()
}

/// `"certen_account" ‖ owner32 ‖ salt64_le`
pub fn account_seed(owner: &[u8; 32], salt: u64) -> Vec<u8> {
    let mut seed = Vec::with_capacity(ACCOUNT_SEED.len() + 40);
    seed.extend_from_slice(ACCOUNT_SEED);
    seed.extend_from_slice(owner);
    seed.extend_from_slice(&salt.to_le_bytes());
    seed
}

/// 单签 ed25519 账户的认证密钥（即初始地址）
pub fn authentication_key(public_key: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(public_key);
    hasher.update([ED25519_SCHEME]);
    hasher.finalize().into()
}

pub struct AptosSigner {
    key: SigningKey,
    address: String,
}

pub struct AptosChain {
    config: ChainConfig,
    sponsor: SponsorConfig,
    transport: Arc<dyn RpcTransport>,
    sponsor_address: Option<String>,
    max_gas_amount: u64,
}

impl AptosChain {
    pub fn new(
        config: ChainConfig,
        sponsor: SponsorConfig,
        transport: Arc<dyn RpcTransport>,
        sponsor_address: Option<String>,
        max_gas_amount: u64,
    ) -> Self {
        Self {
            config,
            sponsor,
            transport,
            sponsor_address,
            max_gas_amount,
        }
    }

    fn chain(&self) -> &str {
        &self.config.name
    }

    fn factory(&self) -> Result<[u8; 32], ChainError> {
        parse_address(&self.config.factory_address)
            .map_err(|e| ChainError::configuration(self.chain(), format!("factory address: {e}")))
    }

    fn function(&self, name: &str) -> Result<String, ChainError> {
        Ok(format!(
            "{}::account_factory::{name}",
            format_address(&self.factory()?)
        ))
    }

    fn account_arguments(identity: &DerivedIdentity) -> Value {
        json!([
            format!("0x{}", hex::encode(identity.owner32())),
            identity.identity(),
            identity.salt64().to_string(),
        ])
    }

    async fn view(&self, function: String, type_arguments: Value, arguments: Value) -> Result<Value, ChainError> {
        let result = self
            .transport
            .post(
                "view",
                json!({
                    "function": function,
                    "type_arguments": type_arguments,
                    "arguments": arguments,
                }),
            )
            .await
            .on_chain(self.chain())?;
        result
            .get(0)
            .cloned()
            .ok_or_else(|| ChainError::malformed(self.chain(), "empty view result"))
    }

    async fn factory_account_address(&self, identity: &DerivedIdentity) -> Result<[u8; 32], ChainError> {
        let value = self
            .view(
                self.function("get_account_address")?,
                json!([]),
                Self::account_arguments(identity),
            )
            .await?;
        let address = str_field(self.chain(), &value, "account address")?;
        parse_address(address).map_err(|e| ChainError::malformed(self.chain(), e))
    }

    fn local_account_address(&self, identity: &DerivedIdentity) -> Result<[u8; 32], ChainError> {
        Ok(object_address(
            &self.factory()?,
            &account_seed(&identity.owner32(), identity.salt64()),
        ))
    }

    /// 对象存在即有 `0x1::object::ObjectCore` 资源
    async fn object_exists(&self, address: &[u8; 32]) -> Result<bool, ChainError> {
        let path = format!(
            "accounts/{}/resource/0x1::object::ObjectCore",
            format_address(address)
        );
        match self.transport.get(&path).await {
            Ok(_) => Ok(true),
            Err(TransportError::NotFound(_)) => Ok(false),
            Err(e) => Err(ChainError::network(self.chain(), e)),
        }
    }

    async fn balance_of(&self, address: &str) -> Result<u128, ChainError> {
        let value = self
            .view(
                "0x1::coin::balance".to_string(),
                json!(["0x1::aptos_coin::AptosCoin"]),
                json!([address]),
            )
            .await?;
        u128_field(self.chain(), &value, "balance")
    }

    async fn deployment_fee(&self) -> u128 {
        let fee = match self.function("deployment_fee") {
            Ok(function) => self.view(function, json!([]), json!([])).await,
            Err(e) => Err(e),
        };
        match fee.and_then(|v| u128_field(self.chain(), &v, "deployment fee")) {
            Ok(fee) => fee,
            Err(e) => {
                tracing::warn!(chain = %self.chain(), error = %e, "deployment_fee read failed, assuming 0");
                0
            }
        }
    }

    async fn gas_unit_price(&self) -> Result<u64, ChainError> {
        let estimate = self
            .transport
            .get("estimate_gas_price")
            .await
            .on_chain(self.chain())?;
        estimate["gas_estimate"]
            .as_u64()
            .ok_or_else(|| ChainError::malformed(self.chain(), "missing gas_estimate"))
    }

    async fn sequence_number(&self, address: &str) -> Result<String, ChainError> {
        let account = self
            .transport
            .get(&format!("accounts/{address}"))
            .await
            .on_chain(self.chain())?;
        Ok(str_field(self.chain(), &account["sequence_number"], "sequence_number")?.to_string())
    }
}

#[async_trait]
impl AccountDeployer for AptosChain {
    type Signer = AptosSigner;

    fn chain_config(&self) -> &ChainConfig {
        &self.config
    }

    fn sponsor(&self) -> &SponsorConfig {
        &self.sponsor
    }

    fn ensure_factory(&self) -> Result<(), ChainError> {
        if self.factory()? == [0u8; 32] {
            return Err(ChainError::configuration(self.chain(), "factory address is 0x0"));
        }
        Ok(())
    }

    fn load_signer(&self) -> Result<AptosSigner, ChainError> {
        let key = self.sponsor.private_key(self.chain())?;
        let key = key.strip_prefix("ed25519-priv-").unwrap_or(key);
        let bytes = hex::decode(strip_0x(key))
            .map_err(|_| ChainError::configuration(self.chain(), "sponsor private key is not hex"))?;
        let key = ed25519_key(self.chain(), &bytes)?;

        let address = match &self.sponsor_address {
            Some(configured) => format_address(
                &parse_address(configured)
                    .map_err(|e| ChainError::configuration(self.chain(), format!("sponsor address: {e}")))?,
            ),
            None => format_address(&authentication_key(key.verifying_key().as_bytes())),
        };
        Ok(AptosSigner { key, address })
    }

    async fn predict(&self, identity: &DerivedIdentity) -> Result<Prediction, ChainError> {
        let (address, source) = match self.factory_account_address(identity).await {
            Ok(address) if address == [0u8; 32] => {
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
                    "get_account_address view failed, using local object address derivation"
                );
                (self.local_account_address(identity)?, AddressSource::LocalFallback)
            }
        };

        Ok(Prediction {
            account_address: format_address(&address),
            is_deployed: self.object_exists(&address).await?,
            source,
        })
    }

    async fn read_funding(&self, signer: &AptosSigner) -> Result<SponsorFunding, ChainError> {
        let (balance, fee) = tokio::join!(self.balance_of(&signer.address), self.deployment_fee());
        Ok(SponsorFunding {
            balance: balance?,
            fee,
        })
    }

    async fn submit(
        &self,
        signer: &AptosSigner,
        identity: &DerivedIdentity,
        _funding: &SponsorFunding,
    ) -> Result<String, ChainError> {
        let (sequence_number, gas_unit_price) = tokio::join!(
            self.sequence_number(&signer.address),
            self.gas_unit_price()
        );
        let expiration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
            + TX_EXPIRATION_SECS;

        let mut request = json!({
            "sender": signer.address,
            "sequence_number": sequence_number?,
            "max_gas_amount": self.max_gas_amount.to_string(),
            "gas_unit_price": gas_unit_price?.to_string(),
            "expiration_timestamp_secs": expiration.to_string(),
            "payload": {
                "type": "entry_function_payload",
                "function": self.function("create_account")?,
                "type_arguments": [],
                "arguments": Self::account_arguments(identity),
            },
        });

        let signing_message = self
            .transport
            .post("transactions/encode_submission", request.clone())
            .await
            .on_chain(self.chain())?;
        let message = hex::decode(strip_0x(str_field(self.chain(), &signing_message, "signing message")?))
            .map_err(|_| ChainError::malformed(self.chain(), "signing message is not hex"))?;

        let signature = signer.key.sign(&message);
        request["signature"] = json!({
            "type": "ed25519_signature",
            "public_key": format!("0x{}", hex::encode(signer.key.verifying_key().as_bytes())),
            "signature": format!("0x{}", hex::encode(signature.to_bytes())),
        });

        let pending = self
            .transport
            .post("transactions", request)
            .await
            .on_chain(self.chain())?;
        Ok(str_field(self.chain(), &pending["hash"], "transaction hash")?.to_string())
    }

    async fn check_confirmation(
        &self,
        _signer: &AptosSigner,
        tx_hash: &str,
    ) -> Result<Option<Confirmation>, ChainError> {
        let tx = match self.transport.get(&format!("transactions/by_hash/{tx_hash}")).await {
            Ok(tx) => tx,
            Err(TransportError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(ChainError::network(self.chain(), e)),
        };

        if tx["type"].as_str() == Some("pending_transaction") {
            return Ok(None);
        }
        if tx["success"].as_bool() != Some(true) {
            let vm_status = tx["vm_status"].as_str().unwrap_or("unknown vm status");
            return Err(ChainError::transaction_failed(self.chain(), tx_hash, vm_status));
        }

        Ok(Some(Confirmation {
            gas_used: tx["gas_used"].as_str().map(str::to_string),
        }))
    }

    async fn verify(
        &self,
        _identity: &DerivedIdentity,
        prediction: &Prediction,
    ) -> Result<Option<String>, ChainError> {
        let address = parse_address(&prediction.account_address)
            .map_err(|e| ChainError::invalid_state(self.chain(), e))?;
        Ok(self
            .object_exists(&address)
            .await?
            .then(|| prediction.account_address.clone()))
    }

    async fn native_balance(&self, address: &str) -> Result<u128, ChainError> {
        let address = parse_address(address).map_err(|e| ChainError::invalid_input(self.chain(), e))?;
        self.balance_of(&format_address(&address)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_addresses_are_padded() {
        let one = parse_address("0x1").unwrap();
        assert_eq!(one[31], 1);
        assert_eq!(
            format_address(&one),
            "0x0000000000000000000000000000000000000000000000000000000000000001"
        );
        assert!(parse_address("0x").is_err());
        assert!(parse_address(&format!("0x{}", "1".repeat(65))).is_err());
    }

    #[test]
    fn test_object_address_scheme() {
        let creator = [0x11u8; 32];
        let seed = account_seed(&[0x22; 32], 7);
        assert_eq!(seed.len(), 14 + 32 + 8);

        let mut hasher = Sha3_256::new();
        hasher.update([0x11u8; 32]);
        hasher.update(&seed);
        hasher.update([0xFE]);
        let expected: [u8; 32] = hasher.finalize().into();
        assert_eq!(object_address(&creator, &seed), expected);
    }

    #[test]
    fn test_authentication_key_differs_from_object_address() {
        let public_key = [0x33u8; 32];
        assert_ne!(authentication_key(&public_key), object_address(&public_key, &[]));
    }
}

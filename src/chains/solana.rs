//! Solana 链处理器
//!
//! 账户与资金库都是工厂程序的 PDA，地址在本地推导即为最终结果：
//! - account: `["certen_account", owner32, salt64_le]`
//! - vault:   `["vault", account]`
//! - config:  `["factory_config"]`
//!
//! 对外返回 vault 地址（资金实际存放处），存在性以 account PDA 判断。

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use borsh::BorshSerialize;
use ed25519_dalek::{Signer as _, SigningKey};
use serde_json::json;
use sha2::{Digest, Sha256};
use solana_sdk::{
    hash::Hash,
    instruction::{AccountMeta, Instruction},
    message::Message,
    pubkey::Pubkey,
    signature::Signature,
    system_program,
    transaction::Transaction,
};

use super::{ed25519_key, u128_field};
use crate::{
    domain::{
        chain_config::ChainConfig,
        deployment::{AccountDeployer, AddressSource, Confirmation, Prediction, SponsorFunding},
        derivation::DerivedIdentity,
        sponsor::SponsorConfig,
    },
    error::{ChainError, TransportResultExt},
    infrastructure::RpcTransport,
};

pub const ACCOUNT_SEED: &[u8] = b"certen_account";
pub const VAULT_SEED: &[u8] = b"vault";
pub const CONFIG_SEED: &[u8] = b"factory_config";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PDA 推导
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// 账户、资金库、配置三个 PDA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountPdas {
    pub account: Pubkey,
    pub vault: Pubkey,
    pub config: Pubkey,
}

/// 没有可用 bump 时返回 None
pub fn derive_pdas(program_id: &Pubkey, owner: &[u8; 32], salt: u64) -> Option<AccountPdas> {
    let salt_le = salt.to_le_bytes();
    let (account, _) =
        Pubkey::try_find_program_address(&[ACCOUNT_SEED, &owner[..], &salt_le[..]], program_id)?;
    let (vault, _) = Pubkey::try_find_program_address(&[VAULT_SEED, account.as_ref()], program_id)?;
    let (config, _) = Pubkey::try_find_program_address(&[CONFIG_SEED], program_id)?;
    Some(AccountPdas {
        account,
        vault,
        config,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 交易构造
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `create_account` 指令参数（Anchor borsh 布局）
#[derive(Debug, BorshSerialize)]
pub struct CreateAccountArgs {
    pub owner: [u8; 32],
    pub identity: String,
    pub salt: u64,
}

impl CreateAccountArgs {
    pub fn new(identity: &DerivedIdentity) -> Self {
        Self {
            owner: identity.owner32(),
            identity: identity.identity().to_string(),
            salt: identity.salt64(),
        }
    }

    /// `sha256("global:create_account")[..8] ‖ borsh(args)`
    pub fn instruction_data(&self) -> Result<Vec<u8>, std::io::Error> {
        let discriminator = Sha256::digest(b"global:create_account");
        let mut data = discriminator[..8].to_vec();
        self.serialize(&mut data)?;
        Ok(data)
    }
}

/// 工厂 `create_account` 指令
///
/// 账户：sponsor(签名, 可写) | account, vault(可写) | config, system(只读)
pub fn create_account_instruction(
    program_id: &Pubkey,
    sponsor: &Pubkey,
    pdas: &AccountPdas,
    data: Vec<u8>,
) -> Instruction {
    Instruction::new_with_bytes(
        *program_id,
        &data,
        vec![
            AccountMeta::new(*sponsor, true),
            AccountMeta::new(pdas.account, false),
            AccountMeta::new(pdas.vault, false),
            AccountMeta::new_readonly(pdas.config, false),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
    )
}

/// 赞助方付费并签名的单指令交易
pub fn signed_transaction(signer: &SigningKey, instruction: Instruction, blockhash: Hash) -> Transaction {
    let payer = Pubkey::new_from_array(signer.verifying_key().to_bytes());
    let message = Message::new_with_blockhash(&[instruction], Some(&payer), &blockhash);
    let mut transaction = Transaction::new_unsigned(message);
    let signature = signer.sign(&transaction.message_data());
    transaction.signatures = vec![Signature::from(signature.to_bytes())];
    transaction
}

pub struct SolanaChain {
    config: ChainConfig,
    sponsor: SponsorConfig,
    transport: Arc<dyn RpcTransport>,
    account_space: u64,
}

impl SolanaChain {
    pub fn new(
        config: ChainConfig,
        sponsor: SponsorConfig,
        transport: Arc<dyn RpcTransport>,
        account_space: u64,
    ) -> Self {
        Self {
            config,
            sponsor,
            transport,
            account_space,
        }
    }

    fn chain(&self) -> &str {
        &self.config.name
    }

    fn program_id(&self) -> Result<Pubkey, ChainError> {
        self.config
            .factory_address
            .parse::<Pubkey>()
            .map_err(|e| ChainError::configuration(self.chain(), format!("program id: {e}")))
    }

    fn pdas(&self, identity: &DerivedIdentity) -> Result<AccountPdas, ChainError> {
        derive_pdas(&self.program_id()?, &identity.owner32(), identity.salt64())
            .ok_or_else(|| ChainError::invalid_state(self.chain(), "no valid program address bump"))
    }

    async fn account_exists(&self, address: &Pubkey) -> Result<bool, ChainError> {
        let result = self
            .transport
            .json_rpc(
                "getAccountInfo",
                json!([address.to_string(), { "encoding": "base64" }]),
            )
            .await
            .on_chain(self.chain())?;
        Ok(!result["value"].is_null())
    }

    async fn balance_of(&self, address: &Pubkey) -> Result<u128, ChainError> {
        let result = self
            .transport
            .json_rpc("getBalance", json!([address.to_string()]))
            .await
            .on_chain(self.chain())?;
        u128_field(self.chain(), &result["value"], "balance")
    }

    async fn rent_exemption(&self) -> u128 {
        match self
            .transport
            .json_rpc("getMinimumBalanceForRentExemption", json!([self.account_space]))
            .await
            .on_chain(self.chain())
            .and_then(|v| u128_field(self.chain(), &v, "rent exemption"))
        {
            Ok(fee) => fee,
            Err(e) => {
                tracing::warn!(chain = %self.chain(), error = %e, "Rent exemption read failed, assuming 0");
                0
            }
        }
    }

    async fn latest_blockhash(&self) -> Result<Hash, ChainError> {
        let result = self
            .transport
            .json_rpc("getLatestBlockhash", json!([{ "commitment": "confirmed" }]))
            .await
            .on_chain(self.chain())?;
        let hash = result["value"]["blockhash"]
            .as_str()
            .ok_or_else(|| ChainError::malformed(self.chain(), "missing blockhash"))?;
        hash.parse::<Hash>()
            .map_err(|e| ChainError::malformed(self.chain(), format!("blockhash: {e}")))
    }

    /// base58 64 字节 keypair、JSON 数组或 hex
    fn parse_signing_key(&self, key: &str) -> Result<SigningKey, ChainError> {
        let bytes = if key.starts_with('[') {
            serde_json::from_str::<Vec<u8>>(key)
                .map_err(|_| ChainError::configuration(self.chain(), "sponsor keypair JSON is invalid"))?
        } else if let Some(bytes) = bs58::decode(key)
            .into_vec()
            .ok()
            .filter(|b| b.len() == 32 || b.len() == 64)
        {
            bytes
        } else {
            hex::decode(super::strip_0x(key))
                .map_err(|_| ChainError::configuration(self.chain(), "sponsor private key encoding not recognized"))?
        };
        ed25519_key(self.chain(), &bytes)
    }
}

fn sponsor_pubkey(signer: &SigningKey) -> Pubkey {
    Pubkey::new_from_array(signer.verifying_key().to_bytes())
}

#[async_trait]
impl AccountDeployer for SolanaChain {
    type Signer = SigningKey;

    fn chain_config(&self) -> &ChainConfig {
        &self.config
    }

    fn sponsor(&self) -> &SponsorConfig {
        &self.sponsor
    }

    fn ensure_factory(&self) -> Result<(), ChainError> {
        if self.program_id()? == system_program::id() {
            return Err(ChainError::configuration(self.chain(), "program id is the zero key"));
        }
        Ok(())
    }

    fn load_signer(&self) -> Result<SigningKey, ChainError> {
        let key = self.sponsor.private_key(self.chain())?;
        self.parse_signing_key(key)
    }

    async fn predict(&self, identity: &DerivedIdentity) -> Result<Prediction, ChainError> {
        let pdas = self.pdas(identity)?;
        Ok(Prediction {
            account_address: pdas.vault.to_string(),
            is_deployed: self.account_exists(&pdas.account).await?,
            source: AddressSource::Local,
        })
    }

    async fn read_funding(&self, signer: &SigningKey) -> Result<SponsorFunding, ChainError> {
        let address = sponsor_pubkey(signer);
        let (balance, fee) = tokio::join!(self.balance_of(&address), self.rent_exemption());
        Ok(SponsorFunding {
            balance: balance?,
            fee,
        })
    }

    async fn submit(
        &self,
        signer: &SigningKey,
        identity: &DerivedIdentity,
        _funding: &SponsorFunding,
    ) -> Result<String, ChainError> {
        let program_id = self.program_id()?;
        let pdas = self.pdas(identity)?;
        let data = CreateAccountArgs::new(identity)
            .instruction_data()
            .map_err(|e| ChainError::invalid_input(self.chain(), format!("instruction encoding: {e}")))?;
        let blockhash = self.latest_blockhash().await?;

        let instruction = create_account_instruction(&program_id, &sponsor_pubkey(signer), &pdas, data);
        let transaction = signed_transaction(signer, instruction, blockhash);
        let wire = bincode::serialize(&transaction)
            .map_err(|e| ChainError::invalid_input(self.chain(), format!("transaction encoding: {e}")))?;

        let result = self
            .transport
            .json_rpc(
                "sendTransaction",
                json!([
                    BASE64.encode(&wire),
                    { "encoding": "base64", "preflightCommitment": "confirmed" }
                ]),
            )
            .await
            .on_chain(self.chain())?;

        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ChainError::malformed(self.chain(), "sendTransaction returned no signature"))
    }

    async fn check_confirmation(
        &self,
        _signer: &SigningKey,
        tx_hash: &str,
    ) -> Result<Option<Confirmation>, ChainError> {
        let result = self
            .transport
            .json_rpc(
                "getSignatureStatuses",
                json!([[tx_hash], { "searchTransactionHistory": true }]),
            )
            .await
            .on_chain(self.chain())?;

        let status = &result["value"][0];
        if status.is_null() {
            return Ok(None);
        }
        if !status["err"].is_null() {
            return Err(ChainError::transaction_failed(
                self.chain(),
                tx_hash,
                status["err"].to_string(),
            ));
        }

        match status["confirmationStatus"].as_str() {
            Some("confirmed") | Some("finalized") => Ok(Some(Confirmation::default())),
            _ => Ok(None),
        }
    }

    async fn verify(
        &self,
        identity: &DerivedIdentity,
        _prediction: &Prediction,
    ) -> Result<Option<String>, ChainError> {
        let pdas = self.pdas(identity)?;
        Ok(self
            .account_exists(&pdas.account)
            .await?
            .then(|| pdas.vault.to_string()))
    }

    async fn native_balance(&self, address: &str) -> Result<u128, ChainError> {
        let address = address
            .parse::<Pubkey>()
            .map_err(|e| ChainError::invalid_input(self.chain(), format!("invalid address {address}: {e}")))?;
        self.balance_of(&address).await
    }
}

//! EVM 链处理器
//!
//! 工厂合约接口：
//! - `getAddress(address owner, string identity, uint256 salt) -> address`
//! - `isDeployedAccount(address) -> bool`
//! - `createAccount(address owner, string identity, uint256 salt)`（payable，附带部署费）
//! - `accountImplementation() -> address`
//! - `deploymentFee() -> uint256`
//!
//! 工厂读取失败时用 CREATE2 公式本地复算（见 [`create2`](super::create2)）。

use std::sync::Arc;

use async_trait::async_trait;
use ethers::{
    signers::{LocalWallet, Signer},
    types::{transaction::eip2718::TypedTransaction, Address, TransactionRequest, U256},
    utils::to_checksum,
};
use serde_json::{json, Value};

use super::{create2, hex_quantity, str_field, strip_0x, u256_to_u128};
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

/// 工厂 ABI 编解码（Tron 共用）
pub(crate) mod abi {
    use ethers::{
        abi::{decode, encode, ParamType, Token},
        types::{Address, U256},
        utils::id,
    };

    use crate::error::ChainError;

    pub const GET_ADDRESS: &str = "getAddress(address,string,uint256)";
    pub const IS_DEPLOYED: &str = "isDeployedAccount(address)";
    pub const CREATE_ACCOUNT: &str = "createAccount(address,string,uint256)";
    pub const IMPLEMENTATION: &str = "accountImplementation()";
    pub const DEPLOYMENT_FEE: &str = "deploymentFee()";

    /// (owner, identity, salt) 参数编码，不含选择器
    pub fn account_params(owner: Address, identity: &str, salt: U256) -> Vec<u8> {
        encode(&[
            Token::Address(owner),
            Token::String(identity.to_string()),
            Token::Uint(salt),
        ])
    }

    pub fn address_param(address: Address) -> Vec<u8> {
        encode(&[Token::Address(address)])
    }

    /// 选择器 ‖ 参数
    pub fn calldata(signature: &str, params: &[u8]) -> Vec<u8> {
        let mut data = id(signature).to_vec();
        data.extend_from_slice(params);
        data
    }

    fn decode_one(chain: &str, kind: ParamType, bytes: &[u8]) -> Result<Token, ChainError> {
        decode(&[kind], bytes)
            .ok()
            .and_then(|mut tokens| tokens.pop())
            .ok_or_else(|| ChainError::malformed(chain, "undecodable contract return data"))
    }

    pub fn decode_address(chain: &str, bytes: &[u8]) -> Result<Address, ChainError> {
        decode_one(chain, ParamType::Address, bytes)?
            .into_address()
            .ok_or_else(|| ChainError::malformed(chain, "expected address return value"))
    }

    pub fn decode_bool(chain: &str, bytes: &[u8]) -> Result<bool, ChainError> {
        decode_one(chain, ParamType::Bool, bytes)?
            .into_bool()
            .ok_or_else(|| ChainError::malformed(chain, "expected bool return value"))
    }

    pub fn decode_uint(chain: &str, bytes: &[u8]) -> Result<U256, ChainError> {
        decode_one(chain, ParamType::Uint(256), bytes)?
            .into_uint()
            .ok_or_else(|| ChainError::malformed(chain, "expected uint return value"))
    }
}

/// 估算 gas 上浮 20%
const GAS_BUFFER_NUMERATOR: u64 = 12;
const GAS_BUFFER_DENOMINATOR: u64 = 10;

pub struct EvmChain {
    config: ChainConfig,
    sponsor: SponsorConfig,
    transport: Arc<dyn RpcTransport>,
}

impl EvmChain {
    pub fn new(config: ChainConfig, sponsor: SponsorConfig, transport: Arc<dyn RpcTransport>) -> Self {
        Self {
            config,
            sponsor,
            transport,
        }
    }

    fn chain(&self) -> &str {
        &self.config.name
    }

    fn chain_id(&self) -> Result<u64, ChainError> {
        self.config
            .chain_id
            .ok_or_else(|| ChainError::configuration(self.chain(), "chain_id not configured"))
    }

    fn factory(&self) -> Result<Address, ChainError> {
        self.config
            .factory_address
            .parse::<Address>()
            .map_err(|_| ChainError::configuration(self.chain(), "factory address is not a valid EVM address"))
    }

    fn parse_address(&self, address: &str) -> Result<Address, ChainError> {
        address
            .parse::<Address>()
            .map_err(|_| ChainError::invalid_input(self.chain(), format!("invalid address {address}")))
    }

    /// `eth_call` 工厂只读方法
    async fn call_factory(&self, signature: &str, params: &[u8]) -> Result<Vec<u8>, ChainError> {
        let data = abi::calldata(signature, params);
        let result = self
            .transport
            .json_rpc(
                "eth_call",
                json!([
                    { "to": format!("{:?}", self.factory()?), "data": format!("0x{}", hex::encode(data)) },
                    "latest"
                ]),
            )
            .await
            .on_chain(self.chain())?;

        let hex_data = str_field(self.chain(), &result, "eth_call result")?;
        hex::decode(strip_0x(hex_data))
            .map_err(|_| ChainError::malformed(self.chain(), "eth_call result is not hex"))
    }

    async fn factory_account_address(&self, identity: &DerivedIdentity) -> Result<Address, ChainError> {
        let params = abi::account_params(
            Address::from(identity.owner20()),
            identity.identity(),
            identity.salt256(),
        );
        let bytes = self.call_factory(abi::GET_ADDRESS, &params).await?;
        abi::decode_address(self.chain(), &bytes)
    }

    /// 本地复算：需要工厂的实现合约地址（不可变参数）
    async fn local_account_address(&self, identity: &DerivedIdentity) -> Result<Address, ChainError> {
        let bytes = self.call_factory(abi::IMPLEMENTATION, &[]).await?;
        let implementation = abi::decode_address(self.chain(), &bytes)?;
        if implementation.is_zero() {
            return Err(ChainError::invalid_state(
                self.chain(),
                "factory reports the zero account implementation",
            ));
        }

        Ok(Address::from(create2::predict_account_address(
            create2::EVM_PREFIX,
            self.factory()?.0,
            implementation.0,
            identity.owner20(),
            identity.identity(),
            identity.salt256(),
        )))
    }

    /// 工厂登记优先，失败时看合约代码
    async fn is_deployed(&self, address: Address) -> Result<bool, ChainError> {
        match self
            .call_factory(abi::IS_DEPLOYED, &abi::address_param(address))
            .await
            .and_then(|bytes| abi::decode_bool(self.chain(), &bytes))
        {
            Ok(deployed) => Ok(deployed),
            Err(e) => {
                tracing::debug!(chain = %self.chain(), error = %e, "isDeployedAccount failed, checking code");
                let code = self
                    .transport
                    .json_rpc("eth_getCode", json!([format!("{address:?}"), "latest"]))
                    .await
                    .on_chain(self.chain())?;
                let code = str_field(self.chain(), &code, "eth_getCode result")?;
                Ok(!strip_0x(code).is_empty())
            }
        }
    }

    async fn balance_of(&self, address: Address) -> Result<u128, ChainError> {
        let result = self
            .transport
            .json_rpc("eth_getBalance", json!([format!("{address:?}"), "latest"]))
            .await
            .on_chain(self.chain())?;
        Ok(u256_to_u128(hex_quantity(self.chain(), &result, "balance")?))
    }

    async fn deployment_fee(&self) -> u128 {
        match self
            .call_factory(abi::DEPLOYMENT_FEE, &[])
            .await
            .and_then(|bytes| abi::decode_uint(self.chain(), &bytes))
        {
            Ok(fee) => u256_to_u128(fee),
            Err(e) => {
                tracing::warn!(chain = %self.chain(), error = %e, "deploymentFee read failed, assuming 0");
                0
            }
        }
    }

    async fn rpc_quantity(&self, method: &str, params: Value) -> Result<U256, ChainError> {
        let result = self.transport.json_rpc(method, params).await.on_chain(self.chain())?;
        hex_quantity(self.chain(), &result, method)
    }
}

#[async_trait]
impl AccountDeployer for EvmChain {
    type Signer = LocalWallet;

    fn chain_config(&self) -> &ChainConfig {
        &self.config
    }

    fn sponsor(&self) -> &SponsorConfig {
        &self.sponsor
    }

    fn ensure_factory(&self) -> Result<(), ChainError> {
        if self.factory()?.is_zero() {
            return Err(ChainError::configuration(self.chain(), "factory address is the zero address"));
        }
        Ok(())
    }

    fn load_signer(&self) -> Result<LocalWallet, ChainError> {
        let key = self.sponsor.private_key(self.chain())?;
        let wallet = strip_0x(key)
            .parse::<LocalWallet>()
            .map_err(|_| ChainError::configuration(self.chain(), "sponsor private key is not a valid secp256k1 key"))?;
        Ok(wallet.with_chain_id(self.chain_id()?))
    }

    async fn predict(&self, identity: &DerivedIdentity) -> Result<Prediction, ChainError> {
        let (address, source) = match self.factory_account_address(identity).await {
            Ok(address) if address.is_zero() => {
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
            account_address: to_checksum(&address, None),
            is_deployed: self.is_deployed(address).await?,
            source,
        })
    }

    async fn read_funding(&self, signer: &LocalWallet) -> Result<SponsorFunding, ChainError> {
        let (balance, fee) = tokio::join!(self.balance_of(signer.address()), self.deployment_fee());
        Ok(SponsorFunding {
            balance: balance?,
            fee,
        })
    }

    async fn submit(
        &self,
        signer: &LocalWallet,
        identity: &DerivedIdentity,
        funding: &SponsorFunding,
    ) -> Result<String, ChainError> {
        let factory = self.factory()?;
        let from = signer.address();
        let data = abi::calldata(
            abi::CREATE_ACCOUNT,
            &abi::account_params(
                Address::from(identity.owner20()),
                identity.identity(),
                identity.salt256(),
            ),
        );
        let value = U256::from(funding.fee);
        let call = json!({
            "from": format!("{from:?}"),
            "to": format!("{factory:?}"),
            "data": format!("0x{}", hex::encode(&data)),
            "value": format!("{value:#x}"),
        });

        let estimated = self.rpc_quantity("eth_estimateGas", json!([call])).await?;
        let gas = estimated * GAS_BUFFER_NUMERATOR / GAS_BUFFER_DENOMINATOR;
        let gas_price = self.rpc_quantity("eth_gasPrice", json!([])).await?;
        let nonce = self
            .rpc_quantity("eth_getTransactionCount", json!([format!("{from:?}"), "pending"]))
            .await?;

        let tx: TypedTransaction = TransactionRequest::new()
            .from(from)
            .to(factory)
            .data(data)
            .value(value)
            .gas(gas)
            .gas_price(gas_price)
            .nonce(nonce)
            .chain_id(self.chain_id()?)
            .into();

        let signature = signer
            .sign_transaction_sync(&tx)
            .map_err(|e| ChainError::configuration(self.chain(), format!("signing failed: {e}")))?;
        let raw = tx.rlp_signed(&signature);

        tracing::debug!(chain = %self.chain(), nonce = %nonce, gas = %gas, "Sending createAccount");

        let result = self
            .transport
            .json_rpc("eth_sendRawTransaction", json!([format!("0x{}", hex::encode(&raw))]))
            .await
            .on_chain(self.chain())?;
        Ok(str_field(self.chain(), &result, "transaction hash")?.to_string())
    }

    async fn check_confirmation(
        &self,
        _signer: &LocalWallet,
        tx_hash: &str,
    ) -> Result<Option<Confirmation>, ChainError> {
        let receipt = self
            .transport
            .json_rpc("eth_getTransactionReceipt", json!([tx_hash]))
            .await
            .on_chain(self.chain())?;
        if receipt.is_null() {
            return Ok(None);
        }

        let status = receipt["status"].as_str().unwrap_or_default();
        if status != "0x1" {
            return Err(ChainError::transaction_failed(
                self.chain(),
                tx_hash,
                format!("receipt status {status}"),
            ));
        }

        let gas_used = hex_quantity(self.chain(), &receipt["gasUsed"], "gasUsed")
            .ok()
            .map(|g| g.to_string());
        Ok(Some(Confirmation { gas_used }))
    }

    async fn verify(
        &self,
        _identity: &DerivedIdentity,
        prediction: &Prediction,
    ) -> Result<Option<String>, ChainError> {
        let address = self.parse_address(&prediction.account_address)?;
        Ok(self
            .is_deployed(address)
            .await?
            .then(|| prediction.account_address.clone()))
    }

    async fn native_balance(&self, address: &str) -> Result<u128, ChainError> {
        self.balance_of(self.parse_address(address)?).await
    }
}

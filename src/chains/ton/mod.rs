//! TON 链处理器（toncenter v2 HTTP API）
//!
//! - 地址：工厂 get-method `get_account_address(owner, salt)`，
//!   失败时按 `repr_hash(StateInit{code, data})` 本地复算
//! - 部署：赞助方 wallet v4r2 外部消息，携带发往工厂的 `create_account` 内部消息
//! - 确认：钱包 seqno 前进；账户由内部消息在后续区块创建，验证需要轮询

pub mod address;
pub mod cell;

pub use address::TonAddress;
pub use cell::{Cell, CellBuilder, CellError};

use std::{
    sync::{Arc, OnceLock},
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signer as _, SigningKey};
use serde_json::{json, Value};

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

pub const API_KEY_HEADER: &str = "x-api-key";

/// 工厂合约 `create_account` 操作码
pub const OP_CREATE_ACCOUNT: u32 = 0x5f1c_e0a1;
const WALLET_V4_SUBWALLET: i64 = 698_983_191;
const SEND_MODE_PAY_FEES_SEPARATELY_IGNORE_ERRORS: u8 = 3;
const MESSAGE_TTL_SECS: u64 = 60;

fn cell_err(chain: &str, e: CellError) -> ChainError {
    ChainError::invalid_state(chain, e.to_string())
}

/// 账户合约初始数据：`factory ‖ owner(256) ‖ salt(64)`
pub fn account_data(factory: &TonAddress, owner: &[u8; 32], salt: u64) -> Result<Cell, CellError> {
    let mut b = CellBuilder::new();
    factory.store(&mut b)?;
    b.store_bytes(owner)?;
    b.store_uint(u128::from(salt), 64)?;
    Ok(b.build())
}

/// StateInit：无 split_depth / special，code 与 data 各一个引用，无 library
pub fn state_init(code: Arc<Cell>, data: Arc<Cell>) -> Result<Cell, CellError> {
    let mut b = CellBuilder::new();
    b.store_uint(0b00110, 5)?;
    b.store_ref(code)?;
    b.store_ref(data)?;
    Ok(b.build())
}

/// 本地推导账户地址
pub fn account_address(
    factory: &TonAddress,
    code: Arc<Cell>,
    owner: &[u8; 32],
    salt: u64,
) -> Result<TonAddress, CellError> {
    let data = Arc::new(account_data(factory, owner, salt)?);
    let init = state_init(code, data)?;
    Ok(TonAddress::new(factory.workchain, init.repr_hash()))
}

fn create_account_body(owner: &[u8; 32], salt: u64, query_id: u64) -> Result<Cell, CellError> {
    let mut b = CellBuilder::new();
    b.store_uint(u128::from(OP_CREATE_ACCOUNT), 32)?;
    b.store_uint(u128::from(query_id), 64)?;
    b.store_bytes(owner)?;
    b.store_uint(u128::from(salt), 64)?;
    Ok(b.build())
}

/// int_msg_info，可回弹，正文放在引用中
fn internal_message(dest: &TonAddress, value: u128, body: Cell) -> Result<Cell, CellError> {
    let mut b = CellBuilder::new();
    b.store_bit(false)?; // int_msg_info$0
    b.store_bit(true)?; // ihr_disabled
    b.store_bit(true)?; // bounce
    b.store_bit(false)?; // bounced
    b.store_uint(0, 2)?; // src: addr_none
    dest.store(&mut b)?;
    b.store_coins(value)?;
    b.store_bit(false)?; // extra currencies
    b.store_coins(0)?; // ihr_fee
    b.store_coins(0)?; // fwd_fee
    b.store_uint(0, 64)?; // created_lt
    b.store_uint(0, 32)?; // created_at
    b.store_bit(false)?; // init
    b.store_bit(true)?;
    b.store_ref(Arc::new(body))?;
    Ok(b.build())
}

/// wallet v4r2 签名外部消息
pub struct WalletTransfer<'a> {
    pub wallet: &'a TonAddress,
    pub seqno: u32,
    pub valid_until: u32,
    pub message: Cell,
}

impl WalletTransfer<'_> {
    fn signing_message(&self) -> Result<Cell, CellError> {
        let subwallet = (WALLET_V4_SUBWALLET + i64::from(self.wallet.workchain)) as u32;
        let mut b = CellBuilder::new();
        b.store_uint(u128::from(subwallet), 32)?;
        b.store_uint(u128::from(self.valid_until), 32)?;
        b.store_uint(u128::from(self.seqno), 32)?;
        b.store_uint(0, 8)?; // op: simple send
        b.store_uint(u128::from(SEND_MODE_PAY_FEES_SEPARATELY_IGNORE_ERRORS), 8)?;
        b.store_ref(Arc::new(self.message.clone()))?;
        Ok(b.build())
    }

    pub fn sign(&self, key: &SigningKey) -> Result<Cell, CellError> {
        let unsigned = self.signing_message()?;
        let signature = key.sign(&unsigned.repr_hash());

        let mut body = CellBuilder::new();
        body.store_bytes(&signature.to_bytes())?;
        body.store_cell(&unsigned)?;

        let mut ext = CellBuilder::new();
        ext.store_uint(0b10, 2)?; // ext_in_msg_info
        ext.store_uint(0, 2)?; // src: addr_none
        self.wallet.store(&mut ext)?;
        ext.store_coins(0)?; // import_fee
        ext.store_bit(false)?; // init
        ext.store_bit(true)?;
        ext.store_ref(Arc::new(body.build()))?;
        Ok(ext.build())
    }
}

/// toncenter 响应信封 `{ok, result, error, code}`
fn unwrap_toncenter(value: Value) -> Result<Value, TransportError> {
    if value.get("ok").and_then(Value::as_bool) == Some(true) {
        return value
            .get("result")
            .cloned()
            .ok_or_else(|| TransportError::decode("missing result field"));
    }
    Err(TransportError::Rpc {
        code: value.get("code").and_then(Value::as_i64).unwrap_or(-1),
        message: value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("toncenter request failed")
            .to_string(),
        data: None,
    })
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub struct TonSigner {
    key: SigningKey,
    wallet: TonAddress,
    /// 本次提交使用的 seqno，确认时比较
    sent_seqno: OnceLock<u32>,
}

pub struct TonChain {
    config: ChainConfig,
    sponsor: SponsorConfig,
    transport: Arc<dyn RpcTransport>,
    sponsor_wallet_address: Option<String>,
    deploy_amount_nanoton: u128,
    testnet: bool,
    account_code_boc: Option<String>,
}

impl TonChain {
    pub fn new(
        config: ChainConfig,
        sponsor: SponsorConfig,
        transport: Arc<dyn RpcTransport>,
        sponsor_wallet_address: Option<String>,
        deploy_amount_nanoton: u64,
        testnet: bool,
        account_code_boc: Option<String>,
    ) -> Self {
        Self {
            config,
            sponsor,
            transport,
            sponsor_wallet_address,
            deploy_amount_nanoton: u128::from(deploy_amount_nanoton),
            testnet,
            account_code_boc,
        }
    }

    fn chain(&self) -> &str {
        &self.config.name
    }

    fn factory(&self) -> Result<TonAddress, ChainError> {
        TonAddress::parse(&self.config.factory_address)
            .map_err(|e| ChainError::configuration(self.chain(), format!("invalid factory address: {e}")))
    }

    fn display(&self, address: &TonAddress) -> String {
        address.to_friendly(true, self.testnet)
    }

    async fn run_get_method(
        &self,
        address: &str,
        method: &str,
        stack: Value,
    ) -> Result<Vec<Value>, ChainError> {
        let result = self
            .transport
            .post(
                "runGetMethod",
                json!({"address": address, "method": method, "stack": stack}),
            )
            .await
            .and_then(unwrap_toncenter)
            .on_chain(self.chain())?;

        let exit_code = result.get("exit_code").and_then(Value::as_i64).unwrap_or(0);
        if exit_code != 0 {
            return Err(ChainError::network(
                self.chain(),
                TransportError::Rpc {
                    code: exit_code,
                    message: format!("get-method {method} exited with code {exit_code}"),
                    data: None,
                },
            ));
        }
        result
            .get("stack")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| ChainError::malformed(self.chain(), format!("{method} returned no stack")))
    }

    fn stack_num(&self, entry: Option<&Value>, what: &str) -> Result<u128, ChainError> {
        let raw = entry
            .and_then(|e| e.get(1))
            .and_then(Value::as_str)
            .ok_or_else(|| ChainError::malformed(self.chain(), format!("{what} is not a number entry")))?;
        let parsed = if raw.starts_with("0x") || raw.starts_with("0X") {
            u128::from_str_radix(strip_0x(raw), 16)
        } else {
            raw.parse::<u128>()
        };
        parsed.map_err(|_| ChainError::malformed(self.chain(), format!("{what} is not an unsigned integer")))
    }

    fn stack_cell(&self, entry: Option<&Value>, what: &str) -> Result<Arc<Cell>, ChainError> {
        let bytes = entry
            .and_then(|e| e.get(1))
            .and_then(|v| v.get("bytes"))
            .and_then(Value::as_str)
            .ok_or_else(|| ChainError::malformed(self.chain(), format!("{what} is not a cell entry")))?;
        let boc = BASE64
            .decode(bytes)
            .map_err(|_| ChainError::malformed(self.chain(), format!("{what} is not base64")))?;
        Cell::from_boc(&boc).map_err(|e| ChainError::malformed(self.chain(), e.to_string()))
    }

    async fn account_state(&self, address: &str) -> Result<String, ChainError> {
        let state = self
            .transport
            .get(&format!("getAddressState?address={address}"))
            .await
            .and_then(unwrap_toncenter)
            .on_chain(self.chain())?;
        Ok(str_field(self.chain(), &state, "address state")?.to_string())
    }

    async fn is_active(&self, address: &str) -> Result<bool, ChainError> {
        Ok(self.account_state(address).await? == "active")
    }

    async fn balance_of(&self, address: &str) -> Result<u128, ChainError> {
        let balance = self
            .transport
            .get(&format!("getAddressBalance?address={address}"))
            .await
            .and_then(unwrap_toncenter)
            .on_chain(self.chain())?;
        u128_field(self.chain(), &balance, "balance")
    }

    async fn seqno(&self, wallet: &TonAddress) -> Result<u32, ChainError> {
        let stack = self
            .run_get_method(&self.display(wallet), "seqno", json!([]))
            .await?;
        let seqno = self.stack_num(stack.first(), "seqno")?;
        u32::try_from(seqno).map_err(|_| ChainError::malformed(self.chain(), "seqno out of range"))
    }

    async fn deployment_fee(&self) -> u128 {
        let fee = match self.factory() {
            Ok(factory) => self
                .run_get_method(&self.display(&factory), "get_deployment_fee", json!([]))
                .await
                .and_then(|stack| self.stack_num(stack.first(), "deployment fee")),
            Err(e) => Err(e),
        };
        match fee {
            Ok(fee) => fee,
            Err(e) => {
                tracing::warn!(chain = %self.chain(), error = %e, "get_deployment_fee failed, assuming 0");
                0
            }
        }
    }

    /// 账户合约代码：配置优先，否则查询工厂
    async fn account_code(&self, factory: &TonAddress) -> Result<Arc<Cell>, ChainError> {
        if let Some(boc) = &self.account_code_boc {
            let bytes = BASE64
                .decode(boc.trim())
                .map_err(|_| ChainError::configuration(self.chain(), "account_code_boc is not base64"))?;
            return Cell::from_boc(&bytes)
                .map_err(|e| ChainError::configuration(self.chain(), format!("account_code_boc: {e}")));
        }
        let stack = self
            .run_get_method(&self.display(factory), "get_account_code", json!([]))
            .await?;
        self.stack_cell(stack.first(), "account code")
    }

    async fn on_chain_address(
        &self,
        factory: &TonAddress,
        identity: &DerivedIdentity,
    ) -> Result<TonAddress, ChainError> {
        let stack = self
            .run_get_method(
                &self.display(factory),
                "get_account_address",
                json!([
                    ["num", format!("0x{}", hex::encode(identity.owner32()))],
                    ["num", format!("{:#x}", identity.salt64())],
                ]),
            )
            .await?;
        let cell = self.stack_cell(stack.first(), "account address")?;
        TonAddress::load(&mut cell.parse()).map_err(|e| ChainError::malformed(self.chain(), e.to_string()))
    }

    fn local_address(
        &self,
        factory: &TonAddress,
        code: Arc<Cell>,
        identity: &DerivedIdentity,
    ) -> Result<TonAddress, ChainError> {
        account_address(factory, code, &identity.owner32(), identity.salt64())
            .map_err(|e| cell_err(self.chain(), e))
    }
}

#[async_trait]
impl AccountDeployer for TonChain {
    type Signer = TonSigner;

    fn chain_config(&self) -> &ChainConfig {
        &self.config
    }

    fn sponsor(&self) -> &SponsorConfig {
        &self.sponsor
    }

    fn verification_is_eventual(&self) -> bool {
        true
    }

    fn ensure_factory(&self) -> Result<(), ChainError> {
        self.factory().map(|_| ())
    }

    fn load_signer(&self) -> Result<TonSigner, ChainError> {
        let raw = self.sponsor.private_key(self.chain())?.trim();
        let bytes = hex::decode(strip_0x(raw))
            .or_else(|_| BASE64.decode(raw))
            .map_err(|_| ChainError::configuration(self.chain(), "sponsor key must be hex or base64"))?;
        let key = ed25519_key(self.chain(), &bytes)?;

        let wallet = self
            .sponsor_wallet_address
            .as_deref()
            .ok_or_else(|| ChainError::configuration(self.chain(), "sponsor wallet address not configured"))?;
        let wallet = TonAddress::parse(wallet)
            .map_err(|e| ChainError::configuration(self.chain(), format!("invalid sponsor wallet address: {e}")))?;

        Ok(TonSigner {
            key,
            wallet,
            sent_seqno: OnceLock::new(),
        })
    }

    async fn predict(&self, identity: &DerivedIdentity) -> Result<Prediction, ChainError> {
        let factory = self.factory()?;

        let (address, source) = match self.on_chain_address(&factory, identity).await {
            Ok(address) if address.hash == [0u8; 32] => {
                return Err(ChainError::invalid_state(self.chain(), "factory returned the zero address"))
            }
            Ok(address) => (address, AddressSource::OnChain),
            Err(e) => {
                tracing::warn!(
                    chain = %self.chain(),
                    identity = %identity.identity(),
                    error = %e,
                    "get_account_address failed, using local StateInit derivation"
                );
                let code = self.account_code(&factory).await?;
                (self.local_address(&factory, code, identity)?, AddressSource::LocalFallback)
            }
        };

        let account_address = self.display(&address);
        let is_deployed = self.is_active(&account_address).await?;
        Ok(Prediction {
            account_address,
            is_deployed,
            source,
        })
    }

    /// `fee` 为随消息发送的总金额：部署金额 + 工厂费用
    async fn read_funding(&self, signer: &TonSigner) -> Result<SponsorFunding, ChainError> {
        let wallet = self.display(&signer.wallet);
        let (balance, fee) = tokio::join!(self.balance_of(&wallet), self.deployment_fee());
        Ok(SponsorFunding {
            balance: balance?,
            fee: self.deploy_amount_nanoton.saturating_add(fee),
        })
    }

    async fn submit(
        &self,
        signer: &TonSigner,
        identity: &DerivedIdentity,
        funding: &SponsorFunding,
    ) -> Result<String, ChainError> {
        let factory = self.factory()?;
        let seqno = self.seqno(&signer.wallet).await?;
        let now = now_secs();

        let body = create_account_body(&identity.owner32(), identity.salt64(), now)
            .map_err(|e| cell_err(self.chain(), e))?;
        let message = internal_message(&factory, funding.fee, body).map_err(|e| cell_err(self.chain(), e))?;
        let external = WalletTransfer {
            wallet: &signer.wallet,
            seqno,
            valid_until: (now + MESSAGE_TTL_SECS) as u32,
            message,
        }
        .sign(&signer.key)
        .map_err(|e| cell_err(self.chain(), e))?;

        // 一个签名器只提交一次；广播失败时整次部署中止，签名器随之丢弃
        signer
            .sent_seqno
            .set(seqno)
            .map_err(|_| ChainError::invalid_state(self.chain(), "signer already submitted a message"))?;

        self.transport
            .post("sendBoc", json!({"boc": BASE64.encode(external.to_boc())}))
            .await
            .and_then(unwrap_toncenter)
            .on_chain(self.chain())?;

        Ok(hex::encode(external.repr_hash()))
    }

    async fn check_confirmation(
        &self,
        signer: &TonSigner,
        _tx_hash: &str,
    ) -> Result<Option<Confirmation>, ChainError> {
        let sent = *signer
            .sent_seqno
            .get()
            .ok_or_else(|| ChainError::invalid_state(self.chain(), "no submitted message to confirm"))?;
        let current = self.seqno(&signer.wallet).await?;
        Ok((current > sent).then(Confirmation::default))
    }

    async fn verify(
        &self,
        _identity: &DerivedIdentity,
        prediction: &Prediction,
    ) -> Result<Option<String>, ChainError> {
        let active = self.is_active(&prediction.account_address).await?;
        Ok(active.then(|| prediction.account_address.clone()))
    }

    async fn native_balance(&self, address: &str) -> Result<u128, ChainError> {
        self.balance_of(address).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_init_layout() {
        let init = state_init(Arc::new(Cell::empty()), Arc::new(Cell::empty())).unwrap();
        assert_eq!(init.bit_len(), 5);
        assert_eq!(init.refs().len(), 2);
        let mut s = init.parse();
        assert_eq!(s.load_uint(5).unwrap(), 0b00110);
    }

    #[test]
    fn test_local_address_depends_on_identity() {
        let factory = TonAddress::new(0, [0x11; 32]);
        let code = Arc::new(Cell::empty());
        let a = account_address(&factory, code.clone(), &[1u8; 32], 1).unwrap();
        let b = account_address(&factory, code.clone(), &[1u8; 32], 2).unwrap();
        let again = account_address(&factory, code, &[1u8; 32], 1).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, again);
        assert_eq!(a.workchain, 0);
    }

    #[test]
    fn test_account_data_bits() {
        let data = account_data(&TonAddress::new(0, [0; 32]), &[0xaa; 32], 7).unwrap();
        assert_eq!(data.bit_len(), 267 + 256 + 64);
    }

    #[test]
    fn test_signed_external_message_verifies() {
        use ed25519_dalek::Verifier;

        let key = SigningKey::from_bytes(&[9u8; 32]);
        let wallet = TonAddress::new(0, [0x22; 32]);
        let body = create_account_body(&[1u8; 32], 5, 42).unwrap();
        let message = internal_message(&TonAddress::new(0, [0x33; 32]), 1_000, body).unwrap();
        let transfer = WalletTransfer {
            wallet: &wallet,
            seqno: 3,
            valid_until: 1_700_000_000,
            message,
        };
        let external = transfer.sign(&key).unwrap();

        let body = external.refs()[0].clone();
        let mut s = body.parse();
        let signature = ed25519_dalek::Signature::from_bytes(&s.load_bytes::<64>().unwrap());
        let unsigned = transfer.signing_message().unwrap();
        assert!(key.verifying_key().verify(&unsigned.repr_hash(), &signature).is_ok());
        assert_eq!(s.load_uint(32).unwrap(), 698_983_191);
        assert_eq!(s.remaining_bits(), 32 * 2 + 8 + 8);
    }

    #[test]
    fn test_unwrap_toncenter() {
        assert_eq!(unwrap_toncenter(json!({"ok": true, "result": "active"})).unwrap(), json!("active"));
        let err = unwrap_toncenter(json!({"ok": false, "error": "rate limit", "code": 429})).unwrap_err();
        assert!(matches!(err, TransportError::Rpc { code: 429, .. }));
    }
}

//! TON 处理器测试：StateInit 地址、wallet v4r2 外部消息、seqno 确认与延迟验证

mod common;

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use adi_accounts::{
    chains::{
        ton::{self, Cell, CellBuilder, TonAddress},
        TonChain,
    },
    domain::{AccountDeployer, AccountHandler, ChainFamily, ChainHandler, DerivedIdentity, SponsorFunding},
    error::TransportError,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use common::{chain_config, fast_deployment, sponsor, unexpected, Call, MockTransport};
use ed25519_dalek::{Signature, SigningKey, Verifier};
use serde_json::{json, Value};

const IDENTITY: &str = "acc://example.acme";
const SEQNO: u32 = 7;
const DEPLOY_AMOUNT: u64 = 50_000_000;
const FACTORY_FEE: u128 = 100_000_000;

fn factory() -> TonAddress {
    TonAddress::new(0, [0x44; 32])
}

fn wallet() -> TonAddress {
    TonAddress::new(0, [0x55; 32])
}

fn code() -> Cell {
    let mut b = CellBuilder::new();
    b.store_uint(0xC0DE, 16).unwrap();
    b.build()
}

fn account() -> TonAddress {
    let identity = DerivedIdentity::new(IDENTITY).unwrap();
    ton::account_address(&factory(), Arc::new(code()), &identity.owner32(), identity.salt64()).unwrap()
}

fn ok(result: Value) -> Result<Value, TransportError> {
    Ok(json!({"ok": true, "result": result}))
}

fn stack(entries: Value) -> Result<Value, TransportError> {
    ok(json!({"gas_used": 1000, "exit_code": 0, "stack": entries}))
}

struct Node {
    get_method_ok: bool,
    state_down: bool,
    factory_fee: u128,
    sent: AtomicBool,
    seqno_polls: AtomicUsize,
    state_polls: AtomicUsize,
}

impl Node {
    fn respond(&self, call: &Call) -> Result<Value, TransportError> {
        let target = call.target.as_str();
        match target {
            "runGetMethod" => match call.params["method"].as_str() {
                Some("get_account_address") if self.get_method_ok => {
                    assert_eq!(call.params["address"], json!(factory().to_friendly(true, true)));
                    let mut b = CellBuilder::new();
                    account().store(&mut b).unwrap();
                    stack(json!([["cell", {"bytes": BASE64.encode(b.build().to_boc())}]]))
                }
                Some("get_account_address") => ok(json!({"exit_code": 11, "stack": []})),
                Some("get_deployment_fee") => stack(json!([["num", format!("{:#x}", self.factory_fee)]])),
                Some("seqno") => {
                    assert_eq!(call.params["address"], json!(wallet().to_friendly(true, true)));
                    let advanced = self.sent.load(Ordering::SeqCst)
                        && self.seqno_polls.fetch_add(1, Ordering::SeqCst) > 0;
                    let seqno = if advanced { SEQNO + 1 } else { SEQNO };
                    stack(json!([["num", format!("{seqno:#x}")]]))
                }
                _ => unexpected(call),
            },
            "sendBoc" => {
                self.sent.store(true, Ordering::SeqCst);
                ok(json!({"@type": "ok"}))
            }
            _ if target.starts_with("getAddressState?address=") && self.state_down => {
                Err(TransportError::Request("connection reset".into()))
            }
            _ if target == format!("getAddressState?address={}", account().to_friendly(true, true)) => {
                // 内部消息在确认后的下一次查询才生效
                let active = self.sent.load(Ordering::SeqCst)
                    && self.state_polls.fetch_add(1, Ordering::SeqCst) > 0;
                let state = if active { "active" } else { "uninit" };
                ok(json!(state))
            }
            _ if target.starts_with("getAddressBalance?address=") => ok(json!("5000000000")),
            _ => unexpected(call),
        }
    }
}

fn setup(get_method_ok: bool, wallet_address: Option<String>) -> (AccountHandler<TonChain>, Arc<MockTransport>) {
    setup_node(get_method_ok, false, wallet_address)
}

fn node(get_method_ok: bool, state_down: bool) -> Arc<Node> {
    node_with_fee(get_method_ok, state_down, FACTORY_FEE)
}

fn node_with_fee(get_method_ok: bool, state_down: bool, factory_fee: u128) -> Arc<Node> {
    Arc::new(Node {
        get_method_ok,
        state_down,
        factory_fee,
        sent: AtomicBool::new(false),
        seqno_polls: AtomicUsize::new(0),
        state_polls: AtomicUsize::new(0),
    })
}

fn ton_chain(node: Arc<Node>, wallet_address: Option<String>, code_boc: Vec<u8>) -> (TonChain, Arc<MockTransport>) {
    let transport = MockTransport::new(move |call| node.respond(call));
    let chain = TonChain::new(
        chain_config(ChainFamily::Ton, "ton", &factory().to_friendly(true, true)),
        sponsor(&hex::encode([13u8; 32]), "1"),
        transport.clone(),
        wallet_address,
        DEPLOY_AMOUNT,
        true,
        Some(BASE64.encode(code_boc)),
    );
    (chain, transport)
}

fn setup_node(
    get_method_ok: bool,
    state_down: bool,
    wallet_address: Option<String>,
) -> (AccountHandler<TonChain>, Arc<MockTransport>) {
    let (chain, transport) = ton_chain(node(get_method_ok, state_down), wallet_address, code().to_boc());
    (AccountHandler::new(chain, fast_deployment()), transport)
}

fn setup_with_wallet(get_method_ok: bool) -> (AccountHandler<TonChain>, Arc<MockTransport>) {
    setup(get_method_ok, Some(wallet().to_raw()))
}

#[tokio::test]
async fn test_get_method_and_state_init_derivation_agree() {
    let (handler, _) = setup_with_wallet(true);
    let onchain = handler.get_account_address(IDENTITY).await.unwrap();

    let (fallback, _) = setup_with_wallet(false);
    let local = fallback.get_account_address(IDENTITY).await.unwrap();

    assert_eq!(onchain.account_address, account().to_friendly(true, true));
    assert_eq!(onchain.account_address, local.account_address);
    assert!(!onchain.is_deployed);
    assert_eq!(
        TonAddress::parse(&onchain.account_address).unwrap(),
        account()
    );
}

#[tokio::test]
async fn test_deploy_sends_signed_wallet_message() {
    let (handler, transport) = setup_with_wallet(true);

    let result = handler.deploy_account(IDENTITY).await.unwrap();
    assert!(!result.already_existed);
    assert_eq!(result.account_address, account().to_friendly(true, true));

    let send = transport
        .calls()
        .into_iter()
        .find(|c| c.target == "sendBoc")
        .unwrap();
    let boc = BASE64.decode(send.params["boc"].as_str().unwrap()).unwrap();
    let external = Cell::from_boc(&boc).unwrap();
    assert_eq!(result.transaction_hash, Some(hex::encode(external.repr_hash())));

    // ext_in_msg_info → 钱包
    let mut ext = external.parse();
    assert_eq!(ext.load_uint(2).unwrap(), 0b10);
    assert_eq!(ext.load_uint(2).unwrap(), 0);
    assert_eq!(TonAddress::load(&mut ext).unwrap(), wallet());
    assert_eq!(ext.load_uint(4).unwrap(), 0);
    assert!(!ext.load_bit().unwrap());
    assert!(ext.load_bit().unwrap());
    let body = ext.load_ref().unwrap();

    let mut body_slice = body.parse();
    let signature = Signature::from_bytes(&body_slice.load_bytes::<64>().unwrap());
    let subwallet = body_slice.load_uint(32).unwrap();
    let valid_until = body_slice.load_uint(32).unwrap();
    assert_eq!(subwallet, 698_983_191);
    assert_eq!(body_slice.load_uint(32).unwrap(), u128::from(SEQNO));
    assert_eq!(body_slice.load_uint(8).unwrap(), 0);
    assert_eq!(body_slice.load_uint(8).unwrap(), 3);
    let internal = body_slice.load_ref().unwrap();

    let mut unsigned = CellBuilder::new();
    unsigned.store_uint(subwallet, 32).unwrap();
    unsigned.store_uint(valid_until, 32).unwrap();
    unsigned.store_uint(u128::from(SEQNO), 32).unwrap();
    unsigned.store_uint(0, 8).unwrap();
    unsigned.store_uint(3, 8).unwrap();
    unsigned.store_ref(internal.clone()).unwrap();
    let key = SigningKey::from_bytes(&[13u8; 32]);
    assert!(key
        .verifying_key()
        .verify(&unsigned.build().repr_hash(), &signature)
        .is_ok());

    // 内部消息：发往工厂，金额 = 部署金额 + 工厂费用
    let mut msg = internal.parse();
    assert_eq!(msg.load_uint(4).unwrap(), 0b0110);
    assert_eq!(msg.load_uint(2).unwrap(), 0);
    assert_eq!(TonAddress::load(&mut msg).unwrap(), factory());
    let len = msg.load_uint(4).unwrap() as usize;
    assert_eq!(msg.load_uint(len * 8).unwrap(), u128::from(DEPLOY_AMOUNT) + FACTORY_FEE);

    let payload = internal.refs()[0].clone();
    let mut payload = payload.parse();
    assert_eq!(payload.load_uint(32).unwrap(), u128::from(ton::OP_CREATE_ACCOUNT));
    payload.load_uint(64).unwrap();
    let identity = DerivedIdentity::new(IDENTITY).unwrap();
    assert_eq!(payload.load_bytes::<32>().unwrap(), identity.owner32());
    assert_eq!(payload.load_uint(64).unwrap(), u128::from(identity.salt64()));

    let second = handler.deploy_account(IDENTITY).await.unwrap();
    assert!(second.already_existed);
    assert_eq!(transport.count("sendBoc"), 1);
}

#[tokio::test]
async fn test_missing_wallet_address_is_configuration_error() {
    let (handler, transport) = setup(true, None);
    let err = handler.deploy_account(IDENTITY).await.unwrap_err();
    assert_eq!(err.code(), "configuration_error");
    assert_eq!(transport.count("sendBoc"), 0);
}

#[tokio::test]
async fn test_balances_in_nanoton() {
    let (handler, _) = setup_with_wallet(true);

    let status = handler.get_sponsor_status().await;
    assert_eq!(status.balance.as_deref(), Some("5"));
    assert!(status.available);

    let balance = handler.get_address_balance(&wallet().to_raw()).await;
    assert_eq!(balance.balance, "5");
    assert_eq!(balance.symbol, "TON");

    let invalid = handler.get_address_balance("not-a-ton-address").await;
    assert!(invalid.error.is_some());
}

#[tokio::test]
async fn test_state_query_failure_aborts_before_submission() {
    let (handler, transport) = setup_node(true, true, Some(wallet().to_raw()));

    let err = handler.deploy_account(IDENTITY).await.unwrap_err();
    assert_eq!(err.code(), "network_error");
    assert!(err.is_retryable());
    assert_eq!(transport.count("sendBoc"), 0);
}

#[tokio::test]
async fn test_malformed_account_code_is_rejected() {
    // 头部声称 0xffffffff 个 cell
    let truncated = hex::decode("b5ee9c720401ffffffff000000010000000000000000000000").unwrap();
    let (chain, _) = ton_chain(node(false, false), Some(wallet().to_raw()), truncated);
    let handler = AccountHandler::new(chain, fast_deployment());

    assert!(handler.get_account_address(IDENTITY).await.is_err());
}

#[tokio::test]
async fn test_signer_submits_at_most_once() {
    let (chain, transport) = ton_chain(node(true, false), Some(wallet().to_raw()), code().to_boc());
    let identity = DerivedIdentity::new(IDENTITY).unwrap();
    let funding = SponsorFunding {
        balance: 5_000_000_000,
        fee: u128::from(DEPLOY_AMOUNT) + FACTORY_FEE,
    };

    let signer = chain.load_signer().unwrap();
    chain.submit(&signer, &identity, &funding).await.unwrap();
    let err = chain.submit(&signer, &identity, &funding).await.unwrap_err();
    assert_eq!(err.code(), "invalid_onchain_state");
    assert_eq!(transport.count("sendBoc"), 1);
}

#[tokio::test]
async fn test_funding_fee_saturates() {
    let (chain, _) = ton_chain(node(true, false), Some(wallet().to_raw()), code().to_boc());
    let signer = chain.load_signer().unwrap();
    let funding = chain.read_funding(&signer).await.unwrap();
    assert_eq!(funding.fee, u128::from(DEPLOY_AMOUNT) + FACTORY_FEE);

    let (chain, _) = ton_chain(node_with_fee(true, false, u128::MAX), Some(wallet().to_raw()), code().to_boc());
    let funding = chain.read_funding(&signer).await.unwrap();
    assert_eq!(funding.fee, u128::MAX);
}

//! EVM 处理器端到端测试（脚本化节点）

mod common;

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use adi_accounts::{
    chains::{create2, EvmChain},
    domain::{AccountHandler, ChainFamily, ChainHandler, DerivedIdentity, SponsorConfig},
    error::{ChainError, TransportError},
};
use common::{chain_config, fast_deployment, no_sponsor, rpc_error, sponsor, unexpected, Call, MockTransport};
use ethers::{
    abi::{encode, Token},
    types::{Address, U256},
    utils::{id, to_checksum},
};
use serde_json::{json, Value};

const FACTORY: &str = "0x1111111111111111111111111111111111111111";
const SPONSOR_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
const IDENTITY: &str = "acc://example.acme";
const TX_HASH: &str = "0xabababababababababababababababababababababababababababababababab";
const ETH: u128 = 1_000_000_000_000_000_000;

fn predicted() -> Address {
    "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1111".parse().unwrap()
}

fn selector(signature: &str) -> String {
    format!("0x{}", hex::encode(id(signature)))
}

fn encoded(tokens: &[Token]) -> Value {
    json!(format!("0x{}", hex::encode(encode(tokens))))
}

/// 脚本化的 EVM 节点状态
struct Node {
    get_address: Result<Address, &'static str>,
    implementation: Address,
    deployed: AtomicBool,
    deploy_on_send: bool,
    receipt_status: &'static str,
    balance: u128,
    fee: u128,
    receipt_polls: AtomicUsize,
    existence_down: bool,
}

impl Node {
    fn new() -> Self {
        Self {
            get_address: Ok(predicted()),
            implementation: Address::repeat_byte(0x22),
            deployed: AtomicBool::new(false),
            deploy_on_send: true,
            receipt_status: "0x1",
            balance: ETH,
            fee: ETH / 100,
            receipt_polls: AtomicUsize::new(0),
            existence_down: false,
        }
    }

    fn respond(&self, call: &Call) -> Result<Value, TransportError> {
        match call.target.as_str() {
            "eth_call" => {
                let data = call.params[0]["data"].as_str().unwrap_or_default();
                if data.starts_with(&selector("getAddress(address,string,uint256)")) {
                    self.get_address
                        .map(|a| encoded(&[Token::Address(a)]))
                        .map_err(rpc_error)
                } else if data.starts_with(&selector("isDeployedAccount(address)")) {
                    if self.existence_down {
                        return Err(TransportError::Request("connection reset".into()));
                    }
                    Ok(encoded(&[Token::Bool(self.deployed.load(Ordering::SeqCst))]))
                } else if data.starts_with(&selector("accountImplementation()")) {
                    Ok(encoded(&[Token::Address(self.implementation)]))
                } else if data.starts_with(&selector("deploymentFee()")) {
                    Ok(encoded(&[Token::Uint(U256::from(self.fee))]))
                } else {
                    unexpected(call)
                }
            }
            "eth_getBalance" => Ok(json!(format!("{:#x}", self.balance))),
            "eth_estimateGas" => Ok(json!("0x30d40")),
            "eth_gasPrice" => Ok(json!("0x3b9aca00")),
            "eth_getTransactionCount" => Ok(json!("0x0")),
            "eth_sendRawTransaction" => {
                if self.deploy_on_send {
                    self.deployed.store(true, Ordering::SeqCst);
                }
                Ok(json!(TX_HASH))
            }
            "eth_getTransactionReceipt" => {
                if self.receipt_polls.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Ok(Value::Null);
                }
                Ok(json!({"status": self.receipt_status, "gasUsed": "0x5208"}))
            }
            "eth_getCode" if self.existence_down => Err(TransportError::Request("connection reset".into())),
            "eth_getCode" => Ok(json!("0x")),
            _ => unexpected(call),
        }
    }
}

fn setup(node: Node, sponsor: SponsorConfig) -> (AccountHandler<EvmChain>, Arc<MockTransport>, Arc<Node>) {
    let node = Arc::new(node);
    let scripted = node.clone();
    let transport = MockTransport::new(move |call| scripted.respond(call));
    let chain = EvmChain::new(
        chain_config(ChainFamily::Evm, "sepolia", FACTORY),
        sponsor,
        transport.clone(),
    );
    (AccountHandler::new(chain, fast_deployment()), transport, node)
}

#[tokio::test]
async fn test_predicts_factory_address() {
    let (handler, _, _) = setup(Node::new(), no_sponsor());

    let result = handler.get_account_address(IDENTITY).await.unwrap();
    assert_eq!(result.account_address, to_checksum(&predicted(), None));
    assert!(!result.is_deployed);
    assert_eq!(
        result.explorer_url,
        format!("https://sepolia.etherscan.io/address/{}", result.account_address)
    );
}

#[tokio::test]
async fn test_prediction_is_stable() {
    let (handler, _, _) = setup(Node::new(), no_sponsor());
    let first = handler.get_account_address(IDENTITY).await.unwrap();
    let second = handler.get_account_address(IDENTITY).await.unwrap();
    assert_eq!(first.account_address, second.account_address);
}

#[tokio::test]
async fn test_blank_identity_is_rejected() {
    let (handler, transport, _) = setup(Node::new(), no_sponsor());
    let err = handler.get_account_address("   ").await.unwrap_err();
    assert_eq!(err.code(), "invalid_input");
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn test_zero_factory_answer_is_invalid_state() {
    let node = Node {
        get_address: Ok(Address::zero()),
        ..Node::new()
    };
    let (handler, _, _) = setup(node, no_sponsor());

    let err = handler.get_account_address(IDENTITY).await.unwrap_err();
    assert!(matches!(err, ChainError::InvalidState { .. }));
}

#[tokio::test]
async fn test_zero_implementation_is_invalid_state() {
    let node = Node {
        get_address: Err("execution reverted"),
        implementation: Address::zero(),
        ..Node::new()
    };
    let (handler, transport, _) = setup(node, sponsor(SPONSOR_KEY, "0.05"));

    let err = handler.get_account_address(IDENTITY).await.unwrap_err();
    assert!(matches!(err, ChainError::InvalidState { .. }));

    let err = handler.deploy_account(IDENTITY).await.unwrap_err();
    assert_eq!(err.code(), "invalid_onchain_state");
    assert_eq!(transport.count("eth_sendRawTransaction"), 0);
}

#[tokio::test]
async fn test_existence_query_failure_aborts_before_submission() {
    let node = Node {
        existence_down: true,
        ..Node::new()
    };
    let (handler, transport, _) = setup(node, sponsor(SPONSOR_KEY, "0.05"));

    let err = handler.deploy_account(IDENTITY).await.unwrap_err();
    assert_eq!(err.code(), "network_error");
    assert!(err.is_retryable());
    assert_eq!(transport.count("eth_sendRawTransaction"), 0);
}

#[tokio::test]
async fn test_local_fallback_matches_create2() {
    let node = Node {
        get_address: Err("execution reverted"),
        ..Node::new()
    };
    let implementation = node.implementation;
    let (handler, _, _) = setup(node, no_sponsor());

    let result = handler.get_account_address(IDENTITY).await.unwrap();

    let identity = DerivedIdentity::new(IDENTITY).unwrap();
    let expected = create2::predict_account_address(
        create2::EVM_PREFIX,
        FACTORY.parse::<Address>().unwrap().0,
        implementation.0,
        identity.owner20(),
        identity.identity(),
        identity.salt256(),
    );
    assert_eq!(result.account_address, to_checksum(&Address::from(expected), None));
}

#[tokio::test]
async fn test_deploy_submits_and_verifies() {
    let (handler, transport, node) = setup(Node::new(), sponsor(SPONSOR_KEY, "0.05"));

    let result = handler.deploy_account(IDENTITY).await.unwrap();
    assert!(!result.already_existed);
    assert_eq!(result.account_address, to_checksum(&predicted(), None));
    assert_eq!(result.transaction_hash.as_deref(), Some(TX_HASH));
    assert_eq!(result.explorer_url, format!("https://sepolia.etherscan.io/tx/{TX_HASH}"));
    assert_eq!(result.gas_used.as_deref(), Some("21000"));
    assert_eq!(result.message, "Account deployed successfully on sepolia");

    assert_eq!(transport.count("eth_sendRawTransaction"), 1);
    assert_eq!(node.receipt_polls.load(Ordering::SeqCst), 2);

    // 部署费随交易附带
    let estimate = transport
        .calls()
        .into_iter()
        .find(|c| c.target == "eth_estimateGas")
        .unwrap();
    assert_eq!(estimate.params[0]["value"], json!(format!("{:#x}", ETH / 100)));
    assert_eq!(
        estimate.params[0]["from"].as_str().unwrap().to_lowercase(),
        "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
    );
}

#[tokio::test]
async fn test_deploy_is_idempotent() {
    let (handler, transport, _) = setup(Node::new(), sponsor(SPONSOR_KEY, "0.05"));

    let first = handler.deploy_account(IDENTITY).await.unwrap();
    let second = handler.deploy_account(IDENTITY).await.unwrap();

    assert!(second.already_existed);
    assert!(second.transaction_hash.is_none());
    assert_eq!(second.account_address, first.account_address);
    assert_eq!(second.message, "Account already deployed on sepolia");
    assert_eq!(transport.count("eth_sendRawTransaction"), 1);
}

#[tokio::test]
async fn test_deploy_requires_sponsor() {
    let (handler, transport, _) = setup(Node::new(), no_sponsor());

    let err = handler.deploy_account(IDENTITY).await.unwrap_err();
    assert_eq!(err.code(), "configuration_error");
    assert!(!err.is_retryable());
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn test_insufficient_funds_stops_before_submission() {
    let node = Node {
        balance: ETH / 1000,
        ..Node::new()
    };
    let (handler, transport, _) = setup(node, sponsor(SPONSOR_KEY, "0.05"));

    let err = handler.deploy_account(IDENTITY).await.unwrap_err();
    match err {
        ChainError::InsufficientFunds {
            balance, required, symbol, ..
        } => {
            assert_eq!(balance, "0.001");
            assert_eq!(required, "0.05");
            assert_eq!(symbol, "ETH");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(transport.count("eth_sendRawTransaction"), 0);
}

#[tokio::test]
async fn test_fee_above_minimum_sets_requirement() {
    let node = Node {
        balance: ETH / 10,
        fee: ETH / 5,
        ..Node::new()
    };
    let (handler, _, _) = setup(node, sponsor(SPONSOR_KEY, "0.05"));

    let err = handler.deploy_account(IDENTITY).await.unwrap_err();
    assert!(err.to_string().contains("required 0.2 ETH"));
}

#[tokio::test]
async fn test_reverted_receipt_is_transaction_failure() {
    let node = Node {
        receipt_status: "0x0",
        deploy_on_send: false,
        ..Node::new()
    };
    let (handler, _, _) = setup(node, sponsor(SPONSOR_KEY, "0.05"));

    let err = handler.deploy_account(IDENTITY).await.unwrap_err();
    match err {
        ChainError::TransactionFailed { tx_hash, .. } => assert_eq!(tx_hash, TX_HASH),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_account_after_confirmation() {
    let node = Node {
        deploy_on_send: false,
        ..Node::new()
    };
    let (handler, transport, _) = setup(node, sponsor(SPONSOR_KEY, "0.05"));

    let err = handler.deploy_account(IDENTITY).await.unwrap_err();
    assert_eq!(err.code(), "invalid_onchain_state");
    assert!(err.to_string().contains("account missing after confirmed transaction"));
    // 非异步链只验证一次
    let is_deployed_calls = transport
        .calls()
        .iter()
        .filter(|c| {
            c.target == "eth_call"
                && c.params[0]["data"]
                    .as_str()
                    .unwrap_or_default()
                    .starts_with(&selector("isDeployedAccount(address)"))
        })
        .count();
    assert_eq!(is_deployed_calls, 2);
}

#[tokio::test]
async fn test_sponsor_status_reports_balance() {
    let (handler, _, _) = setup(Node::new(), sponsor(SPONSOR_KEY, "0.05"));

    let status = handler.get_sponsor_status().await;
    assert!(status.available);
    assert_eq!(status.balance.as_deref(), Some("1"));
    assert_eq!(status.min_balance.as_deref(), Some("0.05"));
    assert_eq!(status.factory_address, FACTORY);
    assert!(status.error.is_none());

    let (handler, _, _) = setup(Node::new(), no_sponsor());
    let status = handler.get_sponsor_status().await;
    assert!(!status.available);
    assert_eq!(status.error.as_deref(), Some("sponsor not configured"));
}

#[tokio::test]
async fn test_address_balance() {
    let (handler, transport, _) = setup(Node::new(), no_sponsor());

    let ok = handler
        .get_address_balance("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266")
        .await;
    assert_eq!(ok.balance, "1");
    assert_eq!(ok.symbol, "ETH");
    assert!(ok.error.is_none());

    let bad = handler.get_address_balance("0x1234").await;
    assert_eq!(bad.balance, "0");
    assert!(bad.error.is_some());
    assert_eq!(transport.count("eth_getBalance"), 1);
}

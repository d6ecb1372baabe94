//! CREATE2 地址复算（EVM 与 Tron 共用）
//!
//! 工厂通过 OpenZeppelin `Clones.cloneDeterministic` 部署 EIP-1167 最小代理：
//! `salt' = keccak256(abi.encode(owner, keccak256(bytes(identity)), salt))`，
//! `address = keccak256(prefix ‖ factory ‖ salt' ‖ keccak256(initCode))[12..]`。
//! EVM 的 prefix 为 `0xff`，Tron 为 `0x41`。

use ethers::{
    abi::{encode, Token},
    types::{Address, U256},
};

use crate::domain::derivation::keccak256;

pub const EVM_PREFIX: u8 = 0xff;
pub const TRON_PREFIX: u8 = 0x41;

const PROXY_HEAD: [u8; 20] = [
    0x3d, 0x60, 0x2d, 0x80, 0x60, 0x0a, 0x3d, 0x39, 0x81, 0xf3, 0x36, 0x3d, 0x3d, 0x37, 0x3d, 0x3d,
    0x3d, 0x36, 0x3d, 0x73,
];
const PROXY_TAIL: [u8; 15] = [
    0x5a, 0xf4, 0x3d, 0x82, 0x80, 0x3e, 0x90, 0x3d, 0x91, 0x60, 0x2b, 0x57, 0xfd, 0x5b, 0xf3,
];

/// EIP-1167 最小代理的创建码
pub fn minimal_proxy_init_code(implementation: [u8; 20]) -> Vec<u8> {
    let mut code = Vec::with_capacity(55);
    code.extend_from_slice(&PROXY_HEAD);
    code.extend_from_slice(&implementation);
    code.extend_from_slice(&PROXY_TAIL);
    code
}

/// 工厂内部使用的 CREATE2 salt
pub fn account_salt(owner: [u8; 20], identity: &str, salt: U256) -> [u8; 32] {
    let encoded = encode(&[
        Token::Address(Address::from(owner)),
        Token::FixedBytes(keccak256(identity.as_bytes()).to_vec()),
        Token::Uint(salt),
    ]);
    keccak256(&encoded)
}

pub fn create2_address(
    prefix: u8,
    deployer: [u8; 20],
    salt: [u8; 32],
    init_code_hash: [u8; 32],
) -> [u8; 20] {
    let mut buf = Vec::with_capacity(85);
    buf.push(prefix);
    buf.extend_from_slice(&deployer);
    buf.extend_from_slice(&salt);
    buf.extend_from_slice(&init_code_hash);

    let hash = keccak256(&buf);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[12..]);
    out
}

/// 复算工厂为 (owner, identity, salt) 部署的代理地址
pub fn predict_account_address(
    prefix: u8,
    factory: [u8; 20],
    implementation: [u8; 20],
    owner: [u8; 20],
    identity: &str,
    salt: U256,
) -> [u8; 20] {
    let init_code_hash = keccak256(&minimal_proxy_init_code(implementation));
    create2_address(
        prefix,
        factory,
        account_salt(owner, identity, salt),
        init_code_hash,
    )
}

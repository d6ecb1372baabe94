//! 各链处理器实现
//!
//! 每个链族一个 [`AccountDeployer`](crate::domain::AccountDeployer) 实现，
//! 通过 [`RpcTransport`](crate::infrastructure::RpcTransport) 访问节点。

pub mod aptos;
pub mod create2;
pub mod evm;
pub mod near;
pub mod solana;
pub mod sui;
pub mod ton;
pub mod tron;

pub use aptos::AptosChain;
pub use evm::EvmChain;
pub use near::NearChain;
pub use solana::SolanaChain;
pub use sui::SuiChain;
pub use ton::TonChain;
pub use tron::TronChain;

use ed25519_dalek::SigningKey;
use ethers::types::U256;
use serde_json::Value;

use crate::error::ChainError;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 响应解析辅助
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn strip_0x(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

/// 取字符串字段
pub(crate) fn str_field<'a>(chain: &str, value: &'a Value, what: &str) -> Result<&'a str, ChainError> {
    value
        .as_str()
        .ok_or_else(|| ChainError::malformed(chain, format!("{what} is not a string")))
}

/// 数字或十进制字符串
pub(crate) fn u128_field(chain: &str, value: &Value, what: &str) -> Result<u128, ChainError> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(u128::from)
            .ok_or_else(|| ChainError::malformed(chain, format!("{what} is not an unsigned integer"))),
        Value::String(s) => s
            .parse::<u128>()
            .map_err(|_| ChainError::malformed(chain, format!("{what} is not an unsigned integer"))),
        _ => Err(ChainError::malformed(chain, format!("{what} missing"))),
    }
}

/// `0x` 十六进制数量
pub(crate) fn hex_quantity(chain: &str, value: &Value, what: &str) -> Result<U256, ChainError> {
    let s = str_field(chain, value, what)?;
    U256::from_str_radix(strip_0x(s), 16)
        .map_err(|_| ChainError::malformed(chain, format!("{what} is not a hex quantity")))
}

pub(crate) fn u256_to_u128(value: U256) -> u128 {
    if value > U256::from(u128::MAX) {
        u128::MAX
    } else {
        value.as_u128()
    }
}

/// ed25519 私钥：32 字节种子，或 64 字节 种子‖公钥
pub(crate) fn ed25519_key(chain: &str, bytes: &[u8]) -> Result<SigningKey, ChainError> {
    let seed: [u8; 32] = match bytes.len() {
        32 | 64 => {
            let mut seed = [0u8; 32];
            seed.copy_from_slice(&bytes[..32]);
            seed
        }
        n => {
            return Err(ChainError::configuration(
                chain,
                format!("ed25519 private key must be 32 or 64 bytes, got {n}"),
            ))
        }
    };
    let key = SigningKey::from_bytes(&seed);

    if bytes.len() == 64 && key.verifying_key().as_bytes() != &bytes[32..] {
        return Err(ChainError::configuration(
            chain,
            "ed25519 keypair public half does not match private key",
        ));
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_u128_field_accepts_numbers_and_strings() {
        assert_eq!(u128_field("c", &json!(42), "x").unwrap(), 42);
        assert_eq!(u128_field("c", &json!("1000000000000000000000"), "x").unwrap(), 10u128.pow(21));
        assert!(u128_field("c", &json!(null), "x").is_err());
        assert!(u128_field("c", &json!(-1), "x").is_err());
    }

    #[test]
    fn test_hex_quantity() {
        assert_eq!(hex_quantity("c", &json!("0x1bc16d674ec80000"), "x").unwrap(), U256::exp10(18) * U256::from(2u8));
        assert!(hex_quantity("c", &json!("0xzz"), "x").is_err());
    }

    #[test]
    fn test_ed25519_keypair_must_match() {
        let seed = [7u8; 32];
        let key = ed25519_key("c", &seed).unwrap();
        let mut pair = seed.to_vec();
        pair.extend_from_slice(key.verifying_key().as_bytes());
        assert!(ed25519_key("c", &pair).is_ok());

        pair[40] ^= 1;
        assert_eq!(ed25519_key("c", &pair).unwrap_err().code(), "configuration_error");
        assert!(ed25519_key("c", &[1u8; 31]).is_err());
    }
}

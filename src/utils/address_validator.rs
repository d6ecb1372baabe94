//! 地址验证模块
//!
//! 余额查询前按链族校验地址格式

use sha3::{Digest, Keccak256};

use crate::{
    chains::{near, ton::TonAddress, tron},
    domain::chain_config::ChainFamily,
};

/// 地址验证器
pub struct AddressValidator;

impl AddressValidator {
    /// 验证地址格式
    pub fn validate(family: ChainFamily, address: &str) -> bool {
        match family {
            ChainFamily::Evm => Self::validate_evm_address(address),
            ChainFamily::Tron => tron::decode_address(address).is_ok(),
            ChainFamily::Solana => Self::validate_solana_address(address),
            ChainFamily::Aptos | ChainFamily::Sui => Self::validate_move_address(address),
            ChainFamily::Near => near::is_valid_account_id(address),
            ChainFamily::Ton => TonAddress::parse(address).is_ok(),
        }
    }

    /// 验证EVM地址（支持EIP-55 Checksum）
    fn validate_evm_address(address: &str) -> bool {
        let Some(hex_part) = address.strip_prefix("0x") else {
            return false;
        };
        if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return false;
        }

        // 全小写或全大写不校验 checksum
        let mixed = hex_part.chars().any(|c| c.is_ascii_lowercase())
            && hex_part.chars().any(|c| c.is_ascii_uppercase());
        !mixed || Self::verify_eip55_checksum(hex_part)
    }

    /// https://eips.ethereum.org/EIPS/eip-55
    fn verify_eip55_checksum(hex_part: &str) -> bool {
        let hash = Keccak256::digest(hex_part.to_lowercase().as_bytes());

        hex_part.chars().enumerate().all(|(i, ch)| {
            if !ch.is_ascii_alphabetic() {
                return true;
            }
            let nibble = if i % 2 == 0 {
                hash[i / 2] >> 4
            } else {
                hash[i / 2] & 0x0f
            };
            ch.is_ascii_uppercase() == (nibble >= 8)
        })
    }

    /// Solana地址（Base58编码，32字节）
    fn validate_solana_address(address: &str) -> bool {
        if address.len() < 32 || address.len() > 44 {
            return false;
        }
        matches!(bs58::decode(address).into_vec(), Ok(decoded) if decoded.len() == 32)
    }

    /// Aptos / Sui：0x + 最多 64 位 hex（允许省略前导零）
    fn validate_move_address(address: &str) -> bool {
        match address.strip_prefix("0x") {
            Some(hex_part) => {
                !hex_part.is_empty()
                    && hex_part.len() <= 64
                    && hex_part.chars().all(|c| c.is_ascii_hexdigit())
            }
            None => false,
        }
    }
}

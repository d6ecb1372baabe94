//! 身份派生原语
//!
//! 所有链共用同一套派生：对 ADI 身份字符串（UTF-8，原样）做 Keccak-256，
//! 再按目标链需要截取成 owner / salt。结果只由身份决定，不落库。

use ethers::types::U256;
use sha3::{Digest, Keccak256};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("identity must not be empty")]
    Empty,
}

/// Keccak-256
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// 20 字节 owner（EVM / Tron / Near）：摘要后 20 字节
pub fn derive_owner20(identity: &str) -> [u8; 20] {
    let digest = keccak256(identity.as_bytes());
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[12..]);
    out
}

/// 32 字节 owner（Solana / Aptos / Sui / Ton）：完整摘要
pub fn derive_owner32(identity: &str) -> [u8; 32] {
    keccak256(identity.as_bytes())
}

/// 256 位 salt：摘要按大端解释
pub fn derive_salt256(identity: &str) -> U256 {
    U256::from_big_endian(&keccak256(identity.as_bytes()))
}

/// 64 位 salt：salt256 mod 2^64，即摘要最后 8 字节（大端）
pub fn derive_salt64(identity: &str) -> u64 {
    let digest = keccak256(identity.as_bytes());
    let mut low = [0u8; 8];
    low.copy_from_slice(&digest[24..]);
    u64::from_be_bytes(low)
}

/// 一次派生的全部结果，处理器内部传递用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedIdentity {
    identity: String,
    digest: [u8; 32],
}

impl DerivedIdentity {
    /// 去空白后为空的身份拒绝；哈希使用未裁剪的原串
    pub fn new(identity: &str) -> Result<Self, IdentityError> {
        if identity.trim().is_empty() {
            return Err(IdentityError::Empty);
        }
        Ok(Self {
            identity: identity.to_string(),
            digest: keccak256(identity.as_bytes()),
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn owner20(&self) -> [u8; 20] {
        let mut out = [0u8; 20];
        out.copy_from_slice(&self.digest[12..]);
        out
    }

    pub fn owner32(&self) -> [u8; 32] {
        self.digest
    }

    pub fn salt256(&self) -> U256 {
        U256::from_big_endian(&self.digest)
    }

    pub fn salt64(&self) -> u64 {
        self.salt256().low_u64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak_empty_input() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_truncations_agree_with_full_digest() {
        let id = "acc://example.acme";
        let full = derive_owner32(id);
        assert_eq!(&full[12..], &derive_owner20(id)[..]);
        assert_eq!(derive_salt256(id).low_u64(), derive_salt64(id));

        let mut be = [0u8; 32];
        derive_salt256(id).to_big_endian(&mut be);
        assert_eq!(be, full);
    }

    #[test]
    fn test_derived_identity_matches_free_functions() {
        let id = "acc://example.acme";
        let derived = DerivedIdentity::new(id).unwrap();
        assert_eq!(derived.owner20(), derive_owner20(id));
        assert_eq!(derived.owner32(), derive_owner32(id));
        assert_eq!(derived.salt256(), derive_salt256(id));
        assert_eq!(derived.salt64(), derive_salt64(id));
        assert_eq!(derived.identity(), id);
    }

    #[test]
    fn test_blank_identity_rejected() {
        assert_eq!(DerivedIdentity::new("   "), Err(IdentityError::Empty));
        assert_eq!(DerivedIdentity::new(""), Err(IdentityError::Empty));
    }

    #[test]
    fn test_whitespace_is_hashed_as_given() {
        let padded = DerivedIdentity::new(" acc://example.acme").unwrap();
        assert_ne!(padded.owner32(), derive_owner32("acc://example.acme"));
    }
}

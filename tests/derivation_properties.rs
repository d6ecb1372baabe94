//! 身份派生测试：已知向量、截取关系、跨链一致性

use adi_accounts::{
    chains::{aptos, create2, near, solana},
    domain::{
        derive_owner20, derive_owner32, derive_salt256, derive_salt64, keccak256, DerivedIdentity,
    },
};
use ethers::{types::U256, utils};
use solana_sdk::pubkey::Pubkey;

const IDENTITIES: &[&str] = &[
    "acc://example.acme",
    "acc://example.acme/book",
    "acc://ÜNICODE.acme",
    "acc://a",
    "x",
];

#[test]
fn test_keccak_known_vectors() {
    assert_eq!(
        hex::encode(keccak256(b"abc")),
        "4e03657aea45a94fc7d47ba826c8d667c0d1e6e33a64a036ec44f58fa12d6c45"
    );
    for id in IDENTITIES {
        assert_eq!(keccak256(id.as_bytes()), utils::keccak256(id.as_bytes()));
    }
}

#[test]
fn test_owner_and_salt_relations() {
    for id in IDENTITIES {
        let owner32 = derive_owner32(id);
        let salt256 = derive_salt256(id);

        assert_eq!(derive_owner20(id), owner32[12..]);
        assert_eq!(salt256, U256::from_big_endian(&owner32));
        assert_eq!(U256::from(derive_salt64(id)), salt256 % (U256::one() << 64));
    }
}

#[test]
fn test_derivation_is_pure() {
    for id in IDENTITIES {
        let a = DerivedIdentity::new(id).unwrap();
        let b = DerivedIdentity::new(id).unwrap();
        assert_eq!(a, b);
    }
    assert_ne!(derive_owner32("acc://a"), derive_owner32("acc://A"));
}

#[test]
fn test_local_derivations_are_identity_specific() {
    let first = DerivedIdentity::new("acc://first.acme").unwrap();
    let second = DerivedIdentity::new("acc://second.acme").unwrap();

    let evm = |d: &DerivedIdentity| {
        create2::predict_account_address(
            create2::EVM_PREFIX,
            [0x11; 20],
            [0x22; 20],
            d.owner20(),
            d.identity(),
            d.salt256(),
        )
    };
    assert_ne!(evm(&first), evm(&second));

    let program = Pubkey::new_from_array([9u8; 32]);
    let solana_first = solana::derive_pdas(&program, &first.owner32(), first.salt64()).unwrap();
    let solana_second = solana::derive_pdas(&program, &second.owner32(), second.salt64()).unwrap();
    assert_ne!(solana_first.account, solana_second.account);
    assert_ne!(solana_first.vault, solana_second.vault);

    let factory = [0x33u8; 32];
    assert_ne!(
        aptos::object_address(&factory, &aptos::account_seed(&first.owner32(), first.salt64())),
        aptos::object_address(&factory, &aptos::account_seed(&second.owner32(), second.salt64())),
    );

    assert_ne!(
        near::sub_account_id(&first.owner20(), "factory.testnet"),
        near::sub_account_id(&second.owner20(), "factory.testnet"),
    );
}

#[test]
fn test_near_sub_account_uses_evm_owner() {
    let identity = DerivedIdentity::new("acc://example.acme").unwrap();
    let id = near::sub_account_id(&identity.owner20(), "factory.testnet");
    let (prefix, factory) = id.split_once('.').unwrap();
    assert_eq!(prefix, hex::encode(derive_owner20("acc://example.acme")));
    assert_eq!(factory, "factory.testnet");
    assert!(near::is_valid_account_id(&id));

    let long_factory = format!("{}.testnet", "f".repeat(30));
    assert!(!near::is_valid_account_id(&near::sub_account_id(&identity.owner20(), &long_factory)));
}

//! Domain 模块
//!
//! 身份派生、链配置、处理器接口、部署状态机与注册表

pub mod account;
pub mod chain_config;
pub mod deployment;
pub mod derivation;
pub mod handler;
pub mod registry;
pub mod sponsor;

// Re-exports
pub use account::{
    AccountAddressResult, AddressBalanceResult, DeployAccountResult, SponsorStatusResult,
};
pub use chain_config::{ChainConfig, ChainFamily};
pub use deployment::{
    AccountDeployer, AddressSource, Confirmation, DeployStage, Prediction, SponsorFunding,
};
pub use derivation::{
    derive_owner20, derive_owner32, derive_salt256, derive_salt64, keccak256, DerivedIdentity,
};
pub use handler::{AccountHandler, ChainHandler, HandlerCapabilities};
pub use registry::HandlerRegistry;
pub use sponsor::SponsorConfig;

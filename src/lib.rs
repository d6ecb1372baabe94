//! ADI Accounts - 多链身份账户代理
//!
//! 根据组织身份字符串 (ADI) 在七类区块链上确定性地预测账户地址，
//! 并在配置了赞助账户时完成一次性、幂等的账户部署。

pub mod app_state;
pub mod chains;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod service;
pub mod utils;

// 重新导出常用类型
pub use app_state::AppState;
pub use error::{ChainError, TransportError};

pub mod prelude {
    pub use crate::{
        app_state::AppState,
        domain::{
            AccountAddressResult, AddressBalanceResult, ChainConfig, ChainHandler,
            DeployAccountResult, HandlerRegistry, SponsorStatusResult,
        },
        error::{ChainError, TransportError},
        service::AccountService,
    };
}

//! 处理器注册表
//!
//! 链标识（名称、链 ID、别名）→ 处理器。启动时构造，之后只读，
//! 以 `Arc<HandlerRegistry>` 共享。

use std::{collections::HashMap, sync::Arc};

use crate::domain::handler::ChainHandler;

#[derive(Default)]
pub struct HandlerRegistry {
    /// 小写标识 → 处理器
    folded: HashMap<String, Arc<dyn ChainHandler>>,
    /// 原样标识 → 处理器
    exact: HashMap<String, Arc<dyn ChainHandler>>,
    /// 注册顺序（列表输出用）
    order: Vec<String>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器的全部标识；同一标识重复注册时后者生效
    pub fn register(&mut self, handler: Arc<dyn ChainHandler>) {
        for id in handler.chain_identifiers() {
            let folded = id.to_lowercase();
            if let Some(previous) = self.folded.get(&folded) {
                if !Arc::ptr_eq(previous, &handler) {
                    tracing::warn!(
                        identifier = %id,
                        previous = %previous.chain_name(),
                        next = %handler.chain_name(),
                        "Chain identifier re-registered"
                    );
                }
            } else {
                self.order.push(folded.clone());
            }
            self.folded.insert(folded, handler.clone());
            self.exact.insert(id, handler.clone());
        }
        tracing::debug!(chain = %handler.chain_name(), "Registered chain handler");
    }

    /// 先按小写匹配，再按原样匹配
    pub fn resolve(&self, identifier: &str) -> Option<Arc<dyn ChainHandler>> {
        let identifier = identifier.trim();
        self.folded
            .get(&identifier.to_lowercase())
            .or_else(|| self.exact.get(identifier))
            .cloned()
    }

    /// 每个处理器一项（按指针去重），按首次注册顺序
    pub fn list_handlers(&self) -> Vec<Arc<dyn ChainHandler>> {
        let mut out: Vec<Arc<dyn ChainHandler>> = Vec::new();
        for id in &self.order {
            if let Some(handler) = self.folded.get(id) {
                if !out.iter().any(|h| Arc::ptr_eq(h, handler)) {
                    out.push(handler.clone());
                }
            }
        }
        out
    }

    /// 所有已注册的标识（小写）
    pub fn list_identifiers(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.folded.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{
        config::EndpointConfig,
        domain::{
            account::{
                AccountAddressResult, AddressBalanceResult, DeployAccountResult,
                SponsorStatusResult,
            },
            chain_config::{ChainConfig, ChainFamily},
            handler::HandlerCapabilities,
        },
        error::ChainError,
    };

    struct StubHandler {
        config: ChainConfig,
    }

    impl StubHandler {
        fn new(name: &str, aliases: &[&str]) -> Arc<dyn ChainHandler> {
            let endpoint = EndpointConfig {
                rpc_url: "http://localhost".into(),
                factory_address: "factory".into(),
                explorer_address_template: None,
                explorer_tx_template: None,
                aliases: aliases.iter().map(|s| s.to_string()).collect(),
                api_key: None,
                enabled: true,
            };
            Arc::new(Self {
                config: ChainConfig::from_endpoint(ChainFamily::Near, name, None, None, &endpoint),
            })
        }
    }

    #[async_trait]
    impl ChainHandler for StubHandler {
        fn chain_config(&self) -> &ChainConfig {
            &self.config
        }

        fn capabilities(&self) -> HandlerCapabilities {
            HandlerCapabilities::DETERMINISTIC
        }

        fn is_sponsor_configured(&self) -> bool {
            false
        }

        async fn get_account_address(
            &self,
            _identity: &str,
        ) -> Result<AccountAddressResult, ChainError> {
            Err(ChainError::UnsupportedChain(self.config.name.clone()))
        }

        async fn deploy_account(&self, _identity: &str) -> Result<DeployAccountResult, ChainError> {
            Err(ChainError::UnsupportedChain(self.config.name.clone()))
        }

        async fn get_address_balance(&self, address: &str) -> AddressBalanceResult {
            AddressBalanceResult::failed(address, &self.config.symbol, "stub")
        }

        async fn get_sponsor_status(&self) -> SponsorStatusResult {
            SponsorStatusResult {
                name: self.config.name.clone(),
                available: false,
                factory_address: self.config.factory_address.clone(),
                balance: None,
                min_balance: None,
                error: None,
            }
        }
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        let mut registry = HandlerRegistry::new();
        registry.register(StubHandler::new("Near", &["NEAR-Testnet"]));

        for id in ["near", "NEAR", "Near", "near-testnet", " Near-TESTNET "] {
            let handler = registry.resolve(id).unwrap();
            assert_eq!(handler.chain_name(), "Near");
        }
        assert!(registry.resolve("solana").is_none());
    }

    #[test]
    fn test_listing_deduplicates_aliases() {
        let mut registry = HandlerRegistry::new();
        registry.register(StubHandler::new("near", &["near-testnet", "nearprotocol"]));
        registry.register(StubHandler::new("ton", &["toncoin"]));

        assert_eq!(registry.list_handlers().len(), 2);
        assert_eq!(
            registry.list_identifiers(),
            vec!["near", "near-testnet", "nearprotocol", "ton", "toncoin"]
        );
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = HandlerRegistry::new();
        let first = StubHandler::new("near", &["shared"]);
        let second = StubHandler::new("ton", &["shared"]);
        registry.register(first);
        registry.register(second.clone());

        let resolved = registry.resolve("SHARED").unwrap();
        assert!(Arc::ptr_eq(&resolved, &second));
        assert_eq!(registry.list_identifiers().len(), 3);
    }

    #[test]
    fn test_reregistering_same_handler_is_idempotent() {
        let mut registry = HandlerRegistry::new();
        let handler = StubHandler::new("near", &["near-testnet"]);
        registry.register(handler.clone());
        registry.register(handler);

        assert_eq!(registry.list_handlers().len(), 1);
        assert_eq!(registry.list_identifiers().len(), 2);
    }
}

use std::sync::Arc;

use crate::{
    chains::{self, AptosChain, EvmChain, NearChain, SolanaChain, SuiChain, TonChain, TronChain},
    config::{Config, EndpointConfig},
    domain::{AccountHandler, ChainConfig, ChainFamily, HandlerRegistry, SponsorConfig},
    infrastructure::{HttpTransport, RpcTransport},
    service::AccountService,
};

/// 应用状态
/// 启动时构造一次，之后只读
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<HandlerRegistry>,
    pub accounts: Arc<AccountService>,
}

fn transport(endpoint: &EndpointConfig, api_key_header: Option<&'static str>) -> Arc<dyn RpcTransport> {
    match api_key_header {
        Some(header) => Arc::new(HttpTransport::with_api_key(
            &endpoint.rpc_url,
            header,
            endpoint.api_key.as_ref().map(|k| k.expose()),
        )),
        None => Arc::new(HttpTransport::new(&endpoint.rpc_url)),
    }
}

/// 链配置校验未通过时记录错误并跳过该链
fn validated(chain: ChainConfig) -> Option<ChainConfig> {
    match chain.validate() {
        Ok(()) => Some(chain),
        Err(errors) => {
            tracing::error!(
                chain = %chain.name,
                errors = ?errors,
                "Invalid chain configuration; handler not registered"
            );
            None
        }
    }
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(Self::build_registry(&config));
        Self {
            config: Arc::new(config),
            accounts: Arc::new(AccountService::new(registry.clone())),
            registry,
        }
    }

    /// 为每个启用的链段注册一个处理器
    pub fn build_registry(config: &Config) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        let deployment = &config.deployment;

        for evm in config.evm.iter().filter(|c| c.endpoint.enabled) {
            let Some(chain) = validated(ChainConfig::from_endpoint(
                ChainFamily::Evm,
                &evm.name,
                Some(&evm.symbol),
                Some(evm.chain_id),
                &evm.endpoint,
            )) else {
                continue;
            };
            let handler = EvmChain::new(
                chain,
                SponsorConfig::from_settings(&evm.sponsor),
                transport(&evm.endpoint, None),
            );
            registry.register(Arc::new(AccountHandler::new(handler, deployment.clone())));
        }

        if let Some(tron) = config.tron.as_ref().filter(|c| c.endpoint.enabled) {
            let chain = ChainConfig::from_endpoint(ChainFamily::Tron, &tron.name, None, None, &tron.endpoint);
            if let Some(chain) = validated(chain) {
                let handler = TronChain::new(
                    chain,
                    SponsorConfig::from_settings(&tron.sponsor),
                    transport(&tron.endpoint, Some(chains::tron::API_KEY_HEADER)),
                    tron.fee_limit_sun,
                );
                registry.register(Arc::new(AccountHandler::new(handler, deployment.clone())));
            }
        }

        if let Some(solana) = config.solana.as_ref().filter(|c| c.endpoint.enabled) {
            let chain = ChainConfig::from_endpoint(ChainFamily::Solana, &solana.name, None, None, &solana.endpoint);
            if let Some(chain) = validated(chain) {
                let handler = SolanaChain::new(
                    chain,
                    SponsorConfig::from_settings(&solana.sponsor),
                    transport(&solana.endpoint, None),
                    solana.account_space,
                );
                registry.register(Arc::new(AccountHandler::new(handler, deployment.clone())));
            }
        }

        if let Some(aptos) = config.aptos.as_ref().filter(|c| c.endpoint.enabled) {
            let chain = ChainConfig::from_endpoint(ChainFamily::Aptos, &aptos.name, None, None, &aptos.endpoint);
            if let Some(chain) = validated(chain) {
                let handler = AptosChain::new(
                    chain,
                    SponsorConfig::from_settings(&aptos.sponsor),
                    transport(&aptos.endpoint, None),
                    aptos.sponsor_address.clone(),
                    aptos.max_gas_amount,
                );
                registry.register(Arc::new(AccountHandler::new(handler, deployment.clone())));
            }
        }

        if let Some(sui) = config.sui.as_ref().filter(|c| c.endpoint.enabled) {
            let chain = ChainConfig::from_endpoint(ChainFamily::Sui, &sui.name, None, None, &sui.endpoint);
            if let Some(chain) = validated(chain) {
                let handler = SuiChain::new(
                    chain,
                    SponsorConfig::from_settings(&sui.sponsor),
                    transport(&sui.endpoint, None),
                    sui.registry_object_id.clone(),
                    sui.gas_budget,
                );
                registry.register(Arc::new(AccountHandler::new(handler, deployment.clone())));
            }
        }

        if let Some(near) = config.near.as_ref().filter(|c| c.endpoint.enabled) {
            let chain = ChainConfig::from_endpoint(ChainFamily::Near, &near.name, None, None, &near.endpoint);
            if let Some(chain) = validated(chain) {
                let handler = NearChain::new(
                    chain,
                    SponsorConfig::from_settings(&near.sponsor),
                    transport(&near.endpoint, None),
                    near.sponsor_account_id.clone(),
                    near.gas,
                );
                registry.register(Arc::new(AccountHandler::new(handler, deployment.clone())));
            }
        }

        if let Some(ton) = config.ton.as_ref().filter(|c| c.endpoint.enabled) {
            let chain = ChainConfig::from_endpoint(ChainFamily::Ton, &ton.name, None, None, &ton.endpoint);
            if let Some(chain) = validated(chain) {
                let handler = TonChain::new(
                    chain,
                    SponsorConfig::from_settings(&ton.sponsor),
                    transport(&ton.endpoint, Some(chains::ton::API_KEY_HEADER)),
                    ton.sponsor_wallet_address.clone(),
                    ton.deploy_amount_nanoton,
                    ton.testnet,
                    ton.account_code_boc.clone(),
                );
                registry.register(Arc::new(AccountHandler::new(handler, deployment.clone())));
            }
        }

        tracing::info!(
            handlers = registry.list_handlers().len(),
            identifiers = ?registry.list_identifiers(),
            "Chain handlers registered"
        );
        registry
    }
}

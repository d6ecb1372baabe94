//! ADI Accounts 运维入口
//!
//! ```text
//! adi-accounts chains
//! adi-accounts sponsors
//! adi-accounts address <chain> <identity>
//! adi-accounts deploy  <chain> <identity>
//! adi-accounts balance <chain> <address>
//! ```

use adi_accounts::{app_state::AppState, config::Config, infrastructure::logging};
use anyhow::{bail, Context, Result};
use serde::Serialize;

const USAGE: &str = "usage: adi-accounts <chains|sponsors|address <chain> <identity>|deploy <chain> <identity>|balance <chain> <address>>";

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn arg<'a>(args: &'a [String], index: usize, name: &str) -> Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .with_context(|| format!("missing <{name}>\n{USAGE}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载环境变量
    dotenvy::dotenv().ok();

    // 2. 加载配置（CONFIG_PATH 指向的 TOML 文件优先）
    let config_path = std::env::var("CONFIG_PATH").ok();
    let config = match Config::from_env_and_file(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            logging::init_default_logging();
            tracing::error!(error = %e, "Failed to load configuration");
            return Err(e);
        }
    };

    // 3. 初始化日志
    if let Err(e) = logging::init_logging(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
    }

    config.validate()?;

    let state = AppState::new(config);
    if state.registry.is_empty() {
        tracing::warn!("No chain handlers configured; set <CHAIN>_FACTORY_ADDRESS or CONFIG_PATH");
    }
    let accounts = &state.accounts;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("chains");

    match command {
        "chains" => print_json(&accounts.chains())?,
        "sponsors" => print_json(&accounts.sponsor_overview().await)?,
        "address" => {
            let result = accounts
                .account_address(arg(&args, 1, "chain")?, arg(&args, 2, "identity")?)
                .await?;
            print_json(&result)?;
        }
        "deploy" => {
            let result = accounts
                .deploy_account(arg(&args, 1, "chain")?, arg(&args, 2, "identity")?)
                .await?;
            print_json(&result)?;
        }
        "balance" => {
            let result = accounts
                .address_balance(arg(&args, 1, "chain")?, arg(&args, 2, "address")?)
                .await?;
            print_json(&result)?;
        }
        other => bail!("unknown command: {other}\n{USAGE}"),
    }

    Ok(())
}

//! 错误类型
//!
//! 分类：配置错误、网络错误（可由调用方重试）、链上状态异常、
//! 赞助账户余额不足、交易失败。所有链相关错误都携带链名称，便于运维排查。

use thiserror::Error;

/// RPC 传输层错误（不感知具体链）
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// 请求未到达或超时
    #[error("request failed: {0}")]
    Request(String),

    /// 非 2xx HTTP 状态
    #[error("http status {status}: {body}")]
    Status { status: u16, body: String },

    /// HTTP 404 / 资源不存在
    #[error("not found: {0}")]
    NotFound(String),

    /// JSON-RPC 返回的 error 对象
    #[error("rpc error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// 响应无法解析
    #[error("malformed response: {0}")]
    Decode(String),
}

impl TransportError {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Request(e.to_string())
        }
    }
}

/// 链处理器错误
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("[{chain}] configuration error: {message}")]
    Configuration { chain: String, message: String },

    #[error("[{chain}] network error: {source}")]
    Network {
        chain: String,
        #[source]
        source: TransportError,
    },

    #[error("[{chain}] invalid on-chain state: {message}")]
    InvalidState { chain: String, message: String },

    #[error(
        "[{chain}] insufficient sponsor funds: balance {balance} {symbol}, required {required} {symbol}"
    )]
    InsufficientFunds {
        chain: String,
        balance: String,
        required: String,
        symbol: String,
    },

    #[error("[{chain}] transaction {tx_hash} failed: {message}")]
    TransactionFailed {
        chain: String,
        tx_hash: String,
        message: String,
    },

    #[error("[{chain}] invalid input: {message}")]
    InvalidInput { chain: String, message: String },

    #[error("unsupported chain: {0}")]
    UnsupportedChain(String),
}

impl ChainError {
    pub fn configuration(chain: &str, msg: impl Into<String>) -> Self {
        Self::Configuration {
            chain: chain.to_string(),
            message: msg.into(),
        }
    }

    pub fn network(chain: &str, source: TransportError) -> Self {
        Self::Network {
            chain: chain.to_string(),
            source,
        }
    }

    /// 响应字段缺失或格式不对，按网络层错误处理（调用方可重试）
    pub fn malformed(chain: &str, what: impl Into<String>) -> Self {
        Self::network(chain, TransportError::Decode(what.into()))
    }

    pub fn invalid_state(chain: &str, msg: impl Into<String>) -> Self {
        Self::InvalidState {
            chain: chain.to_string(),
            message: msg.into(),
        }
    }

    pub fn transaction_failed(chain: &str, tx_hash: &str, msg: impl Into<String>) -> Self {
        Self::TransactionFailed {
            chain: chain.to_string(),
            tx_hash: tx_hash.to_string(),
            message: msg.into(),
        }
    }

    pub fn invalid_input(chain: &str, msg: impl Into<String>) -> Self {
        Self::InvalidInput {
            chain: chain.to_string(),
            message: msg.into(),
        }
    }

    /// 仅瞬时网络错误允许调用方重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// 稳定的错误码，供上层 HTTP 层映射
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::Network { .. } => "network_error",
            Self::InvalidState { .. } => "invalid_onchain_state",
            Self::InsufficientFunds { .. } => "insufficient_sponsor_funds",
            Self::TransactionFailed { .. } => "transaction_failed",
            Self::InvalidInput { .. } => "invalid_input",
            Self::UnsupportedChain(_) => "chain_not_supported",
        }
    }

    /// 出错的链名称
    pub fn chain(&self) -> Option<&str> {
        match self {
            Self::Configuration { chain, .. }
            | Self::Network { chain, .. }
            | Self::InvalidState { chain, .. }
            | Self::InsufficientFunds { chain, .. }
            | Self::TransactionFailed { chain, .. }
            | Self::InvalidInput { chain, .. } => Some(chain),
            Self::UnsupportedChain(_) => None,
        }
    }
}

/// 为 `Result<T, TransportError>` 附加链名称
pub trait TransportResultExt<T> {
    fn on_chain(self, chain: &str) -> Result<T, ChainError>;
}

impl<T> TransportResultExt<T> for Result<T, TransportError> {
    fn on_chain(self, chain: &str) -> Result<T, ChainError> {
        self.map_err(|e| ChainError::network(chain, e))
    }
}

use ethers::types::{H256, U256};
use thiserror::Error;

use crate::ProviderId;

/// 意图级错误分类
///
/// 变体可供程序匹配，附带的字符串只用于日志和人工排查。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("Intent expired")]
    Expired,

    #[error("No route found")]
    NoRouteFound,

    #[error("Insufficient liquidity: {0}")]
    InsufficientLiquidity(String),

    #[error("Insufficient profit: required {required}, got {actual}")]
    InsufficientProfit { required: U256, actual: U256 },

    #[error("Slippage exceeded: {slippage_bps} bps > {max_bps} bps")]
    SlippageExceeded { slippage_bps: u64, max_bps: u32 },

    #[error("Risk limit exceeded: {0}")]
    RiskLimitExceeded(String),

    #[error("Duplicate intent: {0:?}")]
    DuplicateIntent(H256),

    #[error("Provider {provider} unavailable: {reason}")]
    ProviderUnavailable { provider: ProviderId, reason: String },

    #[error("No provider available")]
    NoProviderAvailable,

    #[error("Execution failed: {reason}")]
    ExecutionFailed { reason: String },

    #[error("System paused")]
    SystemPaused,
}

impl EngineError {
    /// 稳定的错误名称 (与 `ExecutionResult::error_reason` 一致)
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Expired => "Expired",
            EngineError::NoRouteFound => "NoRouteFound",
            EngineError::InsufficientLiquidity(_) => "InsufficientLiquidity",
            EngineError::InsufficientProfit { .. } => "InsufficientProfit",
            EngineError::SlippageExceeded { .. } => "SlippageExceeded",
            EngineError::RiskLimitExceeded(_) => "RiskLimitExceeded",
            EngineError::DuplicateIntent(_) => "DuplicateIntent",
            EngineError::ProviderUnavailable { .. } => "ProviderUnavailable",
            EngineError::NoProviderAvailable => "NoProviderAvailable",
            EngineError::ExecutionFailed { .. } => "ExecutionFailed",
            EngineError::SystemPaused => "SystemPaused",
        }
    }
}

/// 外部协作方 (场所 / 借贷池 / 数据源) 返回的错误
///
/// 只在候选层面处理，不会作为意图级错误向外传播。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("failure: {reason}")]
    Failure { reason: String },

    #[error("timeout")]
    Timeout,
}

impl SourceError {
    pub fn reason(&self) -> String {
        match self {
            SourceError::Unavailable(reason) => reason.clone(),
            SourceError::Failure { reason } => reason.clone(),
            SourceError::Timeout => "timeout".to_string(),
        }
    }
}

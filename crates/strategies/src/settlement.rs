use async_trait::async_trait;
use ethers::types::{Bytes, U256};
use models::{ExecutionResult, PoolSnapshot, ProviderId, VenueQuote};

/// 交给结算层的路由
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementRoute {
    pub quote: VenueQuote,
    pub pools: Vec<PoolSnapshot>,
    /// 闪电贷回调数据 (自有资金交易为空)
    pub payload: Bytes,
    /// 最终输出下限 = 执行金额 + 最低利润
    pub min_amount_out: U256,
}

/// 链上结算接口
///
/// 核心不构造任何链相关的交易，结算结果即为最终结果。
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn settle(
        &self,
        route: &SettlementRoute,
        provider: Option<&ProviderId>,
        amount: U256,
    ) -> ExecutionResult;
}

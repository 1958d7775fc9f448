use ethers::types::{Bytes, U256};
use serde::{Deserialize, Serialize};

use crate::ProviderId;

/// 单个场所的兑换报价
///
/// 每轮评估重新计算，不持久化。`valid = false` 的报价不参与选择。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueQuote {
    pub venue_id: ProviderId,
    /// 费率档位 (集中流动性场所, 以 1e6 为基数, 500 = 0.05%)
    pub fee_tier: Option<u32>,
    /// 场所收取的兑换费率 (基点)
    pub fee_bps: u32,
    pub amount_out: U256,
    pub estimated_gas: U256,
    /// 场所特定的路由数据 (不透明)
    pub route_data: Bytes,
    /// 综合评分 (0-10000)
    pub score: u32,
    pub valid: bool,
    /// 无效原因 (超时 / 场所不可用)
    pub error: Option<String>,
}

impl VenueQuote {
    /// 构造一个被排除的候选
    pub fn invalid(venue_id: ProviderId, fee_tier: Option<u32>, reason: impl Into<String>) -> Self {
        Self {
            venue_id,
            fee_tier,
            fee_bps: 0,
            amount_out: U256::zero(),
            estimated_gas: U256::zero(),
            route_data: Bytes::default(),
            score: 0,
            valid: false,
            error: Some(reason.into()),
        }
    }

    /// 日志标签，例如 `uniswap_v3@500`
    pub fn label(&self) -> String {
        match self.fee_tier {
            Some(tier) => format!("{}@{}", self.venue_id, tier),
            None => self.venue_id.to_string(),
        }
    }
}

/// 闪电贷提供商报价
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanQuote {
    pub provider_id: ProviderId,
    /// 费率 (基点)
    pub fee_bps: u32,
    /// 借入金额对应的费用
    pub fee: U256,
    pub max_amount: U256,
    pub estimated_gas: U256,
    /// 综合评分 (0-10000)
    pub score: u32,
    pub available: bool,
    pub error: Option<String>,
}

impl LoanQuote {
    pub fn unavailable(provider_id: ProviderId, reason: impl Into<String>) -> Self {
        Self {
            provider_id,
            fee_bps: 0,
            fee: U256::zero(),
            max_amount: U256::zero(),
            estimated_gas: U256::zero(),
            score: 0,
            available: false,
            error: Some(reason.into()),
        }
    }
}

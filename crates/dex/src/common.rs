use async_trait::async_trait;
use ethers::types::{Address, Bytes, U256};
use models::{PoolSnapshot, SourceError, VenueQuote, ProviderId};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// 评分上限 (与基点同一量纲)
pub const MAX_SCORE: u32 = 10_000;

/// 场所返回的原始报价
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawVenueQuote {
    pub amount_out: U256,
    pub estimated_gas: U256,
    /// 兑换费率 (基点)
    pub fee_bps: u32,
    pub route_data: Bytes,
}

/// 流动性场所报价接口 (由具体 DEX 适配器实现)
#[async_trait]
pub trait VenueQuoteSource: Send + Sync {
    fn venue_id(&self) -> ProviderId;

    /// 离散费率档位 (为空表示场所没有档位，只报一次价)
    fn fee_tiers(&self) -> Vec<u32> {
        Vec::new()
    }

    async fn quote(
        &self,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        fee_tier: Option<u32>,
    ) -> Result<RawVenueQuote, SourceError>;
}

/// 外部流动性数据源：把选中的报价展开为按顺序排列的池子快照
#[async_trait]
pub trait LiquiditySource: Send + Sync {
    async fn route_pools(
        &self,
        quote: &VenueQuote,
        token_in: Address,
        token_out: Address,
    ) -> Result<Vec<PoolSnapshot>, SourceError>;
}

/// 加权评分
///
/// 结果 = Σ(权重 × 分项) / Σ权重，分项先截断到 0-10000，因此结果总在 0-10000 之内。
pub fn weighted_score(terms: &[(Decimal, u32)]) -> u32 {
    let total_weight: Decimal = terms.iter().map(|(w, _)| *w).sum();
    if total_weight <= Decimal::ZERO {
        return 0;
    }

    let weighted: Decimal = terms
        .iter()
        .map(|(w, term)| *w * Decimal::from((*term).min(MAX_SCORE)))
        .sum();

    (weighted / total_weight)
        .trunc()
        .to_u32()
        .unwrap_or(0)
        .min(MAX_SCORE)
}

/// 按最大值归一化到 0-10000
pub(crate) fn normalize(value: U256, max: U256) -> u32 {
    if max.is_zero() {
        return 0;
    }
    let scaled = value.saturating_mul(U256::from(MAX_SCORE)) / max;
    scaled.min(U256::from(MAX_SCORE)).as_u32()
}

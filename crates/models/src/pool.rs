use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};

/// 基点分母 (10000 = 100%)
pub const BPS_DENOMINATOR: u32 = 10_000;

/// 池子快照
///
/// 由外部流动性数据源提供，核心逻辑只读。储备按本跳的交易方向给出
/// (`reserve_in` 对应 `token_in`)。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub pool_id: Address,
    pub token_in: Address,
    pub token_out: Address,
    pub reserve_in: U256,
    pub reserve_out: U256,
    /// 费率 (基点, 30 = 0.3%)
    pub fee_rate_bps: u32,
    /// 池子流动性 (以 token_in 计价)
    pub liquidity: U256,
    pub active: bool,
}

impl PoolSnapshot {
    /// 恒定乘积公式计算输出量 (含手续费, 整数截断)
    ///
    /// amountOut = amountIn * (10000 - fee) * reserveOut / (reserveIn * 10000 + amountIn * (10000 - fee))
    pub fn get_amount_out(&self, amount_in: U256) -> U256 {
        if self.reserve_in.is_zero() || self.reserve_out.is_zero() || amount_in.is_zero() {
            return U256::zero();
        }
        if self.fee_rate_bps >= BPS_DENOMINATOR {
            return U256::zero();
        }

        let fee_factor = U256::from(BPS_DENOMINATOR - self.fee_rate_bps);
        let amount_in_with_fee = amount_in.saturating_mul(fee_factor);
        let numerator = amount_in_with_fee.saturating_mul(self.reserve_out);
        let denominator = self
            .reserve_in
            .saturating_mul(U256::from(BPS_DENOMINATOR))
            .saturating_add(amount_in_with_fee);

        numerator / denominator
    }
}

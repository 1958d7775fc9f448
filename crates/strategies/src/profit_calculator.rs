use config_crate::SimulationConfig;
use ethers::types::U256;
use models::{ArbitrageIntent, EngineError, PoolSnapshot, ProfitCalculation, BPS_DENOMINATOR};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// 利润模拟器
///
/// 对选中路由的池子序列逐跳执行恒定乘积计算，扣除 gas 与协议费后给出是否可执行的结论。
/// 结论是唯一的执行闸门，不会为了"变得有利可图"而调整意图参数。
pub struct ProfitSimulator {
    config: SimulationConfig,
    /// gas 价格 (输入代币最小单位 / gas)
    gas_price: RwLock<U256>,
    paused: AtomicBool,
}

impl ProfitSimulator {
    pub fn new(config: SimulationConfig) -> Self {
        let gas_price = U256::from(config.gas_price);
        Self {
            config,
            gas_price: RwLock::new(gas_price),
            paused: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// 暂停后所有模拟结论都不可执行
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        warn!(target: "profit_simulator", "利润模拟器已暂停");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        info!(target: "profit_simulator", "利润模拟器已恢复");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn update_gas_price(&self, gas_price: U256) {
        *self.gas_price.write() = gas_price;
    }

    pub fn gas_price(&self) -> U256 {
        *self.gas_price.read()
    }

    /// 有效滑点上限: 意图与全局配置取较小值
    pub fn effective_slippage_bps(&self, intent: &ArbitrageIntent) -> u32 {
        intent.max_slippage_bps().min(self.config.max_slippage_bps)
    }

    /// 有效最低利润: 全局阈值与意图要求取较大值
    pub fn effective_min_profit(&self, intent: &ArbitrageIntent) -> U256 {
        U256::from(self.config.min_profit_threshold).max(intent.min_profit())
    }

    /// 按路由中最小流动性裁剪执行金额
    pub fn suggested_amount(&self, requested: U256, route: &[PoolSnapshot]) -> Result<U256, EngineError> {
        if route.is_empty() {
            return Err(EngineError::InsufficientLiquidity("empty route".to_string()));
        }
        if let Some(pool) = route.iter().find(|p| !p.active) {
            return Err(EngineError::InsufficientLiquidity(format!(
                "pool {:?} inactive",
                pool.pool_id
            )));
        }

        let min_liquidity = route
            .iter()
            .map(|p| p.liquidity)
            .min()
            .unwrap_or_default();
        let cap = min_liquidity.saturating_mul(U256::from(self.config.max_pool_percentage_bps))
            / U256::from(BPS_DENOMINATOR);
        let suggested = requested.min(cap);

        if suggested.is_zero() {
            return Err(EngineError::InsufficientLiquidity(format!(
                "min liquidity {} allows no trade",
                min_liquidity
            )));
        }
        Ok(suggested)
    }

    /// 逐跳模拟，前一跳输出即为下一跳输入
    pub fn simulate_swaps(amount_in: U256, route: &[PoolSnapshot]) -> U256 {
        route
            .iter()
            .fold(amount_in, |amount, pool| pool.get_amount_out(amount))
    }

    pub fn gas_units(&self, hops: usize) -> U256 {
        U256::from(self.config.base_gas)
            .saturating_add(U256::from(self.config.per_hop_gas).saturating_mul(U256::from(hops)))
    }

    /// 模拟意图在给定路由上的收益
    pub fn simulate(
        &self,
        intent: &ArbitrageIntent,
        route: &[PoolSnapshot],
    ) -> Result<ProfitCalculation, EngineError> {
        let suggested_amount = self.suggested_amount(intent.amount(), route)?;
        let final_amount_out = Self::simulate_swaps(suggested_amount, route);

        let gas_units = self.gas_units(route.len());
        let gas_cost = gas_units.saturating_mul(self.gas_price());
        let protocol_fee = final_amount_out
            .saturating_mul(U256::from(self.config.protocol_fee_bps))
            / U256::from(BPS_DENOMINATOR);

        let gross_profit = final_amount_out.saturating_sub(suggested_amount);
        let net_profit = gross_profit
            .saturating_sub(gas_cost)
            .saturating_sub(protocol_fee);
        let roi_bps = if net_profit.is_zero() {
            0
        } else {
            to_u64(net_profit.saturating_mul(U256::from(BPS_DENOMINATOR)) / suggested_amount)
        };

        // 输出不低于输入即视为无滑点
        let slippage_bps = if final_amount_out >= suggested_amount {
            0
        } else {
            to_u64(
                (suggested_amount - final_amount_out).saturating_mul(U256::from(BPS_DENOMINATOR))
                    / suggested_amount,
            )
        };

        let slippage_ok = slippage_bps <= u64::from(self.effective_slippage_bps(intent));
        let is_profitable =
            net_profit >= self.effective_min_profit(intent) && slippage_ok && !self.is_paused();

        let calc = ProfitCalculation {
            suggested_amount,
            final_amount_out,
            gross_profit,
            gas_units,
            gas_cost,
            protocol_fee,
            net_profit,
            roi_bps,
            slippage_bps,
            is_profitable,
        };

        debug!(
            target: "profit_simulator",
            "模拟完成 [{}]: 执行金额={}, 输出={}, 净利润={}, roi={}bps, 滑点={}bps, 可执行={}",
            intent.short_id(),
            calc.suggested_amount,
            calc.final_amount_out,
            calc.net_profit,
            calc.roi_bps,
            calc.slippage_bps,
            calc.is_profitable
        );

        Ok(calc)
    }

    /// 模拟并把不可执行的结论转换为具体的拒绝原因
    pub fn evaluate(
        &self,
        intent: &ArbitrageIntent,
        route: &[PoolSnapshot],
    ) -> Result<ProfitCalculation, EngineError> {
        let calc = self.simulate(intent, route)?;
        if calc.is_profitable {
            return Ok(calc);
        }

        if self.is_paused() {
            return Err(EngineError::SystemPaused);
        }
        let max_bps = self.effective_slippage_bps(intent);
        if calc.slippage_bps > u64::from(max_bps) {
            return Err(EngineError::SlippageExceeded {
                slippage_bps: calc.slippage_bps,
                max_bps,
            });
        }
        Err(EngineError::InsufficientProfit {
            required: self.effective_min_profit(intent),
            actual: calc.net_profit,
        })
    }
}

fn to_u64(value: U256) -> u64 {
    if value > U256::from(u64::MAX) {
        u64::MAX
    } else {
        value.as_u64()
    }
}

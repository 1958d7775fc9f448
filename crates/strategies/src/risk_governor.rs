//! 风控
//!
//! 与收益无关的硬性限额: 单笔最大亏损 (按本金来源区分) 与按调用方滚动的日累计亏损。
//! 通过检查的潜在亏损会先预留到日累计中，执行结束后用实际结果替换预留。

use chrono::{DateTime, Duration, Utc};
use config_crate::RiskConfig;
use dashmap::DashMap;
use ethers::types::{Address, U256};
use models::{
    EngineError, FundingMode, ProfitCalculation, RiskState, TradeOutcome, BPS_DENOMINATOR,
};
use std::sync::Arc;
use tracing::{info, warn};
use utils::SharedClock;

/// 调用方风控状态存储
///
/// `update` 必须在键锁内完成读-改-写。
pub trait RiskStateStore: Send + Sync {
    fn get(&self, caller: &Address) -> Option<RiskState>;

    /// 不存在时以 `now` 为窗口起点创建
    fn update(&self, caller: Address, now: DateTime<Utc>, f: &mut dyn FnMut(&mut RiskState));
}

pub type SharedRiskStore = Arc<dyn RiskStateStore>;

#[derive(Debug, Default)]
pub struct InMemoryRiskStates {
    states: DashMap<Address, RiskState>,
}

impl InMemoryRiskStates {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RiskStateStore for InMemoryRiskStates {
    fn get(&self, caller: &Address) -> Option<RiskState> {
        self.states.get(caller).map(|entry| entry.value().clone())
    }

    fn update(&self, caller: Address, now: DateTime<Utc>, f: &mut dyn FnMut(&mut RiskState)) {
        let mut entry = self
            .states
            .entry(caller)
            .or_insert_with(|| RiskState::new(now));
        f(entry.value_mut());
    }
}

/// 已预留的潜在亏损，必须通过 `commit` 结算
#[derive(Debug, PartialEq, Eq)]
#[must_use = "预留的额度需要 commit"]
pub struct RiskReservation {
    caller: Address,
    amount: U256,
    window_start_at: DateTime<Utc>,
}

impl RiskReservation {
    pub fn caller(&self) -> Address {
        self.caller
    }

    pub fn amount(&self) -> U256 {
        self.amount
    }
}

/// 意图的潜在亏损 = gas 成本 + 协议费 + 执行金额 × 最大滑点
pub fn potential_loss(calc: &ProfitCalculation, max_slippage_bps: u32) -> U256 {
    let slippage = calc
        .suggested_amount
        .saturating_mul(U256::from(max_slippage_bps))
        / U256::from(BPS_DENOMINATOR);
    calc.gas_cost
        .saturating_add(calc.protocol_fee)
        .saturating_add(slippage)
}

pub struct RiskGovernor {
    store: SharedRiskStore,
    clock: SharedClock,
    config: RiskConfig,
}

impl RiskGovernor {
    pub fn new(store: SharedRiskStore, clock: SharedClock, config: RiskConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    fn window(&self) -> Duration {
        Duration::seconds(self.config.window_secs)
    }

    /// 单笔亏损上限 (名义金额的基点)
    pub fn single_trade_cap(&self, notional: U256, funding: FundingMode) -> U256 {
        let bps = match funding {
            FundingMode::FlashLoan => self.config.max_single_trade_loss_bps,
            FundingMode::SelfFunded => self.config.self_funded_trade_loss_bps,
        };
        notional.saturating_mul(U256::from(bps)) / U256::from(BPS_DENOMINATOR)
    }

    /// 检查限额并预留潜在亏损
    pub fn check_and_reserve(
        &self,
        caller: Address,
        notional: U256,
        potential_loss: U256,
        funding: FundingMode,
    ) -> Result<RiskReservation, EngineError> {
        let cap = self.single_trade_cap(notional, funding);
        if potential_loss > cap {
            warn!(
                target: "risk_governor",
                "单笔亏损超限: caller={:?}, 潜在亏损={}, 上限={} ({})",
                caller,
                potential_loss,
                cap,
                funding.as_str()
            );
            return Err(EngineError::RiskLimitExceeded(format!(
                "potential loss {} exceeds single trade cap {}",
                potential_loss, cap
            )));
        }

        let now = self.clock.now();
        let window = self.window();
        let max_daily = U256::from(self.config.max_daily_loss);
        let mut verdict: Result<DateTime<Utc>, U256> = Err(U256::zero());

        self.store.update(caller, now, &mut |state| {
            if state.roll_window(now, window) {
                info!(target: "risk_governor", "风控窗口重置: caller={:?}", caller);
            }
            let projected = state.daily_loss_accumulated.saturating_add(potential_loss);
            if projected > max_daily {
                verdict = Err(state.daily_loss_accumulated);
            } else {
                state.daily_loss_accumulated = projected;
                verdict = Ok(state.window_start_at);
            }
        });

        match verdict {
            Ok(window_start_at) => Ok(RiskReservation {
                caller,
                amount: potential_loss,
                window_start_at,
            }),
            Err(accumulated) => {
                warn!(
                    target: "risk_governor",
                    "日亏损超限: caller={:?}, 已累计={}, 潜在亏损={}, 上限={}",
                    caller,
                    accumulated,
                    potential_loss,
                    max_daily
                );
                Err(EngineError::RiskLimitExceeded(format!(
                    "daily loss {} + {} exceeds {}",
                    accumulated, potential_loss, max_daily
                )))
            }
        }
    }

    /// 用实际结果替换预留。窗口已滚动时只把结果计入新窗口。
    pub fn commit(&self, reservation: RiskReservation, outcome: TradeOutcome) {
        let now = self.clock.now();
        let window = self.window();

        self.store.update(reservation.caller, now, &mut |state| {
            state.roll_window(now, window);
            if state.window_start_at == reservation.window_start_at {
                state.daily_loss_accumulated = state
                    .daily_loss_accumulated
                    .saturating_sub(reservation.amount);
            }
            state.daily_loss_accumulated = match outcome {
                TradeOutcome::Profit(profit) => state.daily_loss_accumulated.saturating_sub(profit),
                TradeOutcome::Loss(loss) => state.daily_loss_accumulated.saturating_add(loss),
            };
        });

        info!(
            target: "risk_governor",
            "风控结算: caller={:?}, 预留={}, 结果={:?}",
            reservation.caller,
            reservation.amount,
            outcome
        );
    }

    /// 当前窗口内的累计亏损 (窗口已过期视为 0)
    pub fn daily_loss(&self, caller: &Address) -> U256 {
        let now = self.clock.now();
        match self.store.get(caller) {
            Some(state) if now - state.window_start_at <= self.window() => {
                state.daily_loss_accumulated
            }
            _ => U256::zero(),
        }
    }

    pub fn state(&self, caller: &Address) -> Option<RiskState> {
        self.store.get(caller)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use utils::{Clock, ManualClock};

    fn governor(max_daily_loss: u128) -> (RiskGovernor, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).unwrap(),
        ));
        let config = RiskConfig {
            max_daily_loss,
            ..RiskConfig::default()
        };
        let governor = RiskGovernor::new(
            Arc::new(InMemoryRiskStates::new()),
            clock.clone(),
            config,
        );
        (governor, clock)
    }

    fn caller() -> Address {
        Address::from_low_u64_be(0xca11)
    }

    #[test]
    fn test_single_trade_cap_depends_on_funding() {
        let (gov, _) = governor(1_000_000);
        let notional = U256::from(10_000u64);

        // 闪电贷 5% = 500，自有资金 10% = 1000
        assert!(gov
            .check_and_reserve(caller(), notional, U256::from(800u64), FundingMode::FlashLoan)
            .is_err());
        let reservation = gov
            .check_and_reserve(caller(), notional, U256::from(800u64), FundingMode::SelfFunded)
            .unwrap();
        assert_eq!(reservation.amount(), U256::from(800u64));
        assert_eq!(gov.daily_loss(&caller()), U256::from(800u64));
    }

    #[test]
    fn test_daily_cap_counts_reservations() {
        let (gov, _) = governor(1_000);
        let notional = U256::from(100_000u64);

        let first = gov
            .check_and_reserve(caller(), notional, U256::from(600u64), FundingMode::FlashLoan)
            .unwrap();
        let err = gov
            .check_and_reserve(caller(), notional, U256::from(600u64), FundingMode::FlashLoan)
            .unwrap_err();
        assert!(matches!(err, EngineError::RiskLimitExceeded(_)));

        // 盈利结算释放预留并继续冲减
        gov.commit(first, TradeOutcome::Profit(U256::from(100u64)));
        assert_eq!(gov.daily_loss(&caller()), U256::zero());
        assert!(gov
            .check_and_reserve(caller(), notional, U256::from(600u64), FundingMode::FlashLoan)
            .is_ok());
    }

    #[test]
    fn test_commit_loss_replaces_reservation() {
        let (gov, _) = governor(10_000);
        let reservation = gov
            .check_and_reserve(caller(), U256::from(100_000u64), U256::from(400u64), FundingMode::FlashLoan)
            .unwrap();
        gov.commit(reservation, TradeOutcome::Loss(U256::from(250u64)));
        assert_eq!(gov.daily_loss(&caller()), U256::from(250u64));
    }

    #[test]
    fn test_window_resets_after_25h() {
        let (gov, clock) = governor(1_000);
        let notional = U256::from(100_000u64);

        let reservation = gov
            .check_and_reserve(caller(), notional, U256::from(900u64), FundingMode::FlashLoan)
            .unwrap();
        gov.commit(reservation, TradeOutcome::Loss(U256::from(900u64)));
        assert!(gov
            .check_and_reserve(caller(), notional, U256::from(500u64), FundingMode::FlashLoan)
            .is_err());

        clock.advance(Duration::hours(25));
        assert_eq!(gov.daily_loss(&caller()), U256::zero());

        let reservation = gov
            .check_and_reserve(caller(), notional, U256::from(500u64), FundingMode::FlashLoan)
            .unwrap();
        let state = gov.state(&caller()).unwrap();
        assert_eq!(state.daily_loss_accumulated, U256::from(500u64));
        assert_eq!(state.window_start_at, clock.now());
        gov.commit(reservation, TradeOutcome::Loss(U256::zero()));
    }

    #[test]
    fn test_commit_after_rollover_only_applies_outcome() {
        let (gov, clock) = governor(10_000);
        let reservation = gov
            .check_and_reserve(caller(), U256::from(100_000u64), U256::from(700u64), FundingMode::FlashLoan)
            .unwrap();

        clock.advance(Duration::hours(25));
        gov.commit(reservation, TradeOutcome::Loss(U256::from(300u64)));

        let state = gov.state(&caller()).unwrap();
        assert_eq!(state.daily_loss_accumulated, U256::from(300u64));
        assert_eq!(state.window_start_at, clock.now());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reserve_and_commit_keep_every_update() {
        let (gov, _) = governor(u128::MAX);
        let gov = Arc::new(gov);

        let mut handles = Vec::new();
        for _ in 0..32 {
            let gov = gov.clone();
            handles.push(tokio::spawn(async move {
                let reservation = gov
                    .check_and_reserve(caller(), U256::from(100_000u64), U256::from(1_000u64), FundingMode::FlashLoan)
                    .unwrap();
                tokio::task::yield_now().await;
                gov.commit(reservation, TradeOutcome::Loss(U256::from(10u64)));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(gov.daily_loss(&caller()), U256::from(320u64));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reservations_respect_daily_cap() {
        let (gov, _) = governor(10_000);
        let gov = Arc::new(gov);

        let mut handles = Vec::new();
        for _ in 0..32 {
            let gov = gov.clone();
            handles.push(tokio::spawn(async move {
                gov.check_and_reserve(caller(), U256::from(100_000u64), U256::from(1_000u64), FundingMode::FlashLoan)
            }));
        }

        let mut reservations = Vec::new();
        for handle in handles {
            if let Ok(reservation) = handle.await.unwrap() {
                reservations.push(reservation);
            }
        }
        assert_eq!(reservations.len(), 10);
        assert_eq!(gov.daily_loss(&caller()), U256::from(10_000u64));

        for reservation in reservations {
            gov.commit(reservation, TradeOutcome::Loss(U256::zero()));
        }
        assert!(gov.daily_loss(&caller()).is_zero());
    }

    #[test]
    fn test_potential_loss() {
        let calc = ProfitCalculation {
            suggested_amount: U256::from(1_000_000u64),
            final_amount_out: U256::from(1_010_000u64),
            gross_profit: U256::from(10_000u64),
            gas_units: U256::from(321_000u64),
            gas_cost: U256::from(1_000u64),
            protocol_fee: U256::from(200u64),
            net_profit: U256::from(8_800u64),
            roi_bps: 88,
            slippage_bps: 0,
            is_profitable: true,
        };
        // 1000 + 200 + 1e6 * 50 / 1e4
        assert_eq!(potential_loss(&calc, 50), U256::from(6_200u64));
    }
}

//! 意图执行协调器
//!
//! 流水线: Quoting → Validating → RiskChecking → Selecting → Executing → Settling。
//! 每次进入新阶段前都检查截止时间。意图 id 在通过 Validating 的瞬间登记，
//! 之后任何重复提交都直接拒绝，不会重新执行任何阶段。

use dashmap::DashMap;
use dex::{
    encode_callback_data, CallbackHop, LiquiditySource, LoanAggregator, RouteOptimizer,
};
use ethers::types::{Address, Bytes, U256};
use models::{ArbitrageIntent, EngineError, ExecutionResult, FundingMode, TradeOutcome};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use utils::SharedClock;

use crate::intent_registry::{IntentStatus, SharedIntentRegistry};
use crate::profit_calculator::ProfitSimulator;
use crate::risk_governor::{potential_loss, RiskGovernor};
use crate::settlement::{Ledger, SettlementRoute};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Quoting,
    Validating,
    RiskChecking,
    Selecting,
    Executing,
    Settling,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Quoting => "quoting",
            PipelineStage::Validating => "validating",
            PipelineStage::RiskChecking => "risk_checking",
            PipelineStage::Selecting => "selecting",
            PipelineStage::Executing => "executing",
            PipelineStage::Settling => "settling",
        }
    }
}

/// 执行统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionStats {
    /// 总提交次数
    pub submitted: u64,
    /// 成功结算次数
    pub completed: u64,
    /// 被拒绝次数 (无路由 / 利润不足 / 风控 / 过期)
    pub rejected: u64,
    /// 执行失败次数 (无可用提供商 / 结算失败)
    pub failed: u64,
    /// 重复提交被拒绝的次数
    pub duplicates_rejected: u64,
    /// 累计实现利润
    pub total_profit: U256,
}

pub struct ExecutionCoordinator {
    router: Arc<RouteOptimizer>,
    liquidity: Arc<dyn LiquiditySource>,
    simulator: Arc<ProfitSimulator>,
    risk: Arc<RiskGovernor>,
    loans: Arc<LoanAggregator>,
    ledger: Arc<dyn Ledger>,
    registry: SharedIntentRegistry,
    clock: SharedClock,
    stats: RwLock<ExecutionStats>,
    caller_profits: DashMap<Address, U256>,
}

impl ExecutionCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        router: Arc<RouteOptimizer>,
        liquidity: Arc<dyn LiquiditySource>,
        simulator: Arc<ProfitSimulator>,
        risk: Arc<RiskGovernor>,
        loans: Arc<LoanAggregator>,
        ledger: Arc<dyn Ledger>,
        registry: SharedIntentRegistry,
        clock: SharedClock,
    ) -> Self {
        Self {
            router,
            liquidity,
            simulator,
            risk,
            loans,
            ledger,
            registry,
            clock,
            stats: RwLock::new(ExecutionStats::default()),
            caller_profits: DashMap::new(),
        }
    }

    pub fn stats(&self) -> ExecutionStats {
        self.stats.read().clone()
    }

    pub fn caller_profit(&self, caller: &Address) -> U256 {
        self.caller_profits
            .get(caller)
            .map(|entry| *entry.value())
            .unwrap_or_default()
    }

    pub fn registry(&self) -> &SharedIntentRegistry {
        &self.registry
    }

    /// 清理截止时间已过的已结束意图，由宿主定期调用
    ///
    /// 过期意图重新提交时会在 Quoting 之前以 `Expired` 拒绝，不需要继续保留去重记录。
    pub fn prune_expired_intents(&self) -> usize {
        let pruned = self.registry.prune_expired(self.clock.now());
        if pruned > 0 {
            debug!(target: "intent_execution", "清理过期意图记录: {}", pruned);
        }
        pruned
    }

    /// 提交意图
    ///
    /// 被拒绝的意图返回 `Err`；进入执行的意图无论成败都返回 `Ok(ExecutionResult)`。
    pub async fn submit(&self, intent: &ArbitrageIntent) -> Result<ExecutionResult, EngineError> {
        self.stats.write().submitted += 1;
        info!(
            target: "intent_execution",
            "收到意图 [{}]: caller={:?}, amount={}, funding={}",
            intent.short_id(),
            intent.caller_id(),
            intent.amount(),
            intent.funding().as_str()
        );

        let mut recorded = false;
        let outcome = self.run(intent, &mut recorded).await;
        self.record_outcome(intent, recorded, &outcome);
        outcome
    }

    fn enter(&self, intent: &ArbitrageIntent, stage: PipelineStage) -> Result<(), EngineError> {
        let now = self.clock.now();
        if intent.is_expired(now) {
            warn!(
                target: "intent_execution",
                "意图 [{}] 在 {} 阶段已过期: deadline={}, now={}",
                intent.short_id(),
                stage.as_str(),
                intent.deadline(),
                now
            );
            return Err(EngineError::Expired);
        }
        debug!(target: "intent_execution", "意图 [{}] 进入 {}", intent.short_id(), stage.as_str());
        Ok(())
    }

    async fn run(
        &self,
        intent: &ArbitrageIntent,
        recorded: &mut bool,
    ) -> Result<ExecutionResult, EngineError> {
        let id = intent.id();
        if self.registry.contains(&id) {
            return Err(EngineError::DuplicateIntent(id));
        }

        self.enter(intent, PipelineStage::Quoting)?;
        let quote = self
            .router
            .find_optimal_route(intent.token_in(), intent.token_out(), intent.amount())
            .await?;
        let pools = self
            .liquidity
            .route_pools(&quote, intent.token_in(), intent.token_out())
            .await
            .map_err(|e| EngineError::InsufficientLiquidity(e.reason()))?;

        self.enter(intent, PipelineStage::Validating)?;
        let calc = self.simulator.evaluate(intent, &pools)?;
        if !self
            .registry
            .try_record(id, self.clock.now(), intent.deadline())
        {
            return Err(EngineError::DuplicateIntent(id));
        }
        *recorded = true;

        self.enter(intent, PipelineStage::RiskChecking)?;
        let max_loss = potential_loss(&calc, self.simulator.effective_slippage_bps(intent));
        let reservation = self.risk.check_and_reserve(
            intent.caller_id(),
            calc.suggested_amount,
            max_loss,
            intent.funding(),
        )?;

        let min_profit = self.simulator.effective_min_profit(intent);
        let mut route = SettlementRoute {
            quote,
            pools,
            payload: Bytes::default(),
            min_amount_out: calc.suggested_amount.saturating_add(min_profit),
        };

        let loan = match intent.funding() {
            FundingMode::SelfFunded => None,
            FundingMode::FlashLoan => {
                if let Err(e) = self.enter(intent, PipelineStage::Selecting) {
                    self.risk.commit(reservation, TradeOutcome::Loss(U256::zero()));
                    return Err(e);
                }
                let criteria = self.loans.config().selection_criteria;
                let selection = match self
                    .loans
                    .select_optimal_provider(intent.token_in(), calc.suggested_amount, criteria)
                    .await
                {
                    Ok(selection) => selection,
                    Err(e) => {
                        self.risk.commit(reservation, TradeOutcome::Loss(U256::zero()));
                        return Ok(ExecutionResult::failed(e.kind()));
                    }
                };

                if let Err(e) = self.enter(intent, PipelineStage::Executing) {
                    self.risk.commit(reservation, TradeOutcome::Loss(U256::zero()));
                    return Err(e);
                }
                route.payload =
                    encode_callback_data(&CallbackHop::from_pools(&route.pools), min_profit);
                let result = self
                    .loans
                    .execute_with_fallback(
                        intent.token_in(),
                        calc.suggested_amount,
                        &route.payload,
                        &selection,
                        intent.deadline(),
                    )
                    .await;
                if !result.success {
                    // 借款未成功，没有产生实际亏损
                    self.risk.commit(reservation, TradeOutcome::Loss(U256::zero()));
                    if result.error_reason.as_deref() == Some(EngineError::Expired.kind()) {
                        warn!(
                            target: "intent_execution",
                            "意图 [{}] 在备用切换中过期: 已尝试={}",
                            intent.short_id(),
                            result.attempts.len()
                        );
                        return Err(EngineError::Expired);
                    }
                    return Ok(result);
                }
                Some(result)
            }
        };

        // 借款后才发现过期，亏损是真实的
        let drawn_loss = loan
            .as_ref()
            .map(|l| l.actual_fee.saturating_add(calc.gas_cost))
            .unwrap_or_default();

        if let Err(e) = self.enter(intent, PipelineStage::Settling) {
            self.risk.commit(reservation, TradeOutcome::Loss(drawn_loss));
            return Err(e);
        }

        let provider = loan.as_ref().and_then(|l| l.used_provider_id.clone());
        let settled = self
            .ledger
            .settle(&route, provider.as_ref(), calc.suggested_amount)
            .await;

        self.router.stats().record_execution(
            &route.quote.venue_id,
            settled.success,
            settled.gas_used,
            self.clock.now(),
        );

        let outcome = if settled.success {
            TradeOutcome::Profit(settled.realized_profit)
        } else {
            TradeOutcome::Loss(drawn_loss)
        };
        self.risk.commit(reservation, outcome);

        Ok(match loan {
            Some(loan) => ExecutionResult {
                success: settled.success,
                used_provider_id: loan.used_provider_id,
                actual_fee: loan.actual_fee,
                gas_used: loan.gas_used.saturating_add(settled.gas_used),
                realized_profit: settled.realized_profit,
                error_reason: settled.error_reason,
                attempts: loan.attempts,
            },
            None => settled,
        })
    }

    fn record_outcome(
        &self,
        intent: &ArbitrageIntent,
        recorded: bool,
        outcome: &Result<ExecutionResult, EngineError>,
    ) {
        let id = intent.id();
        let mut stats = self.stats.write();

        match outcome {
            Ok(result) if result.success => {
                stats.completed += 1;
                stats.total_profit = stats.total_profit.saturating_add(result.realized_profit);
                let mut profit = self.caller_profits.entry(intent.caller_id()).or_default();
                *profit = profit.saturating_add(result.realized_profit);
                self.registry.finalize(&id, IntentStatus::Completed);
                info!(
                    target: "intent_execution",
                    "意图 [{}] 执行成功: provider={:?}, fee={}, gas={}, 利润={}",
                    intent.short_id(),
                    result.used_provider_id,
                    result.actual_fee,
                    result.gas_used,
                    result.realized_profit
                );
            }
            Ok(result) => {
                stats.failed += 1;
                self.registry.finalize(&id, IntentStatus::Failed);
                warn!(
                    target: "intent_execution",
                    "意图 [{}] 执行失败: {:?}, 尝试次数={}",
                    intent.short_id(),
                    result.error_reason,
                    result.attempts.len()
                );
            }
            Err(EngineError::DuplicateIntent(_)) => {
                stats.duplicates_rejected += 1;
                warn!(target: "intent_execution", "重复意图 [{}] 已拒绝", intent.short_id());
            }
            Err(e) => {
                stats.rejected += 1;
                if recorded {
                    self.registry.finalize(&id, IntentStatus::Rejected);
                }
                info!(
                    target: "intent_execution",
                    "意图 [{}] 被拒绝: {}",
                    intent.short_id(),
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent_registry::{IntentRegistry, InMemoryIntentRegistry};
    use crate::risk_governor::{InMemoryRiskStates, RiskStateStore};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use config_crate::{LoanConfig, RiskConfig, RoutingConfig, SimulationConfig};
    use dex::{
        InMemoryProviderStats, LendingQuoteSource, LoanReceipt, ProviderStatsStore,
        RawVenueQuote, SharedStatsStore, VenueQuoteSource,
    };
    use models::{PoolSnapshot, ProviderId, RiskState, SourceError, VenueQuote};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use utils::{Clock, ManualClock};

    fn token_a() -> Address {
        Address::from_low_u64_be(0xa)
    }

    fn token_b() -> Address {
        Address::from_low_u64_be(0xb)
    }

    fn caller() -> Address {
        Address::from_low_u64_be(0xca11)
    }

    struct MockVenue {
        calls: AtomicUsize,
        /// 询价期间推进时钟，模拟慢速询价
        slow_clock: Option<(Arc<ManualClock>, Duration)>,
    }

    #[async_trait]
    impl VenueQuoteSource for MockVenue {
        fn venue_id(&self) -> ProviderId {
            ProviderId::from("uniswap_v2")
        }

        async fn quote(
            &self,
            _token_in: Address,
            _token_out: Address,
            _amount_in: U256,
            _fee_tier: Option<u32>,
        ) -> Result<RawVenueQuote, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some((clock, by)) = &self.slow_clock {
                clock.advance(*by);
            }
            Ok(RawVenueQuote {
                amount_out: U256::from(1_497_000u64),
                estimated_gas: U256::from(321_000u64),
                fee_bps: 0,
                route_data: Bytes::default(),
            })
        }
    }

    /// A -> B -> A，第二个池子 B 的价格偏低
    struct MockLiquidity {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LiquiditySource for MockLiquidity {
        async fn route_pools(
            &self,
            _quote: &VenueQuote,
            token_in: Address,
            token_out: Address,
        ) -> Result<Vec<PoolSnapshot>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let pool = |id: u64, t_in: Address, t_out: Address, r_in: u64, r_out: u64| PoolSnapshot {
                pool_id: Address::from_low_u64_be(id),
                token_in: t_in,
                token_out: t_out,
                reserve_in: U256::from(r_in),
                reserve_out: U256::from(r_out),
                fee_rate_bps: 0,
                liquidity: U256::from(1_000_000_000u64),
                active: true,
            };
            Ok(vec![
                pool(1, token_in, token_b(), 1_000_000_000, 1_000_000_000),
                pool(2, token_b(), token_out, 1_000_000_000, 1_500_000_000),
            ])
        }
    }

    type ClockStep = Mutex<Option<(Arc<ManualClock>, Duration)>>;

    struct MockLender {
        id: &'static str,
        fee_bps: u32,
        fail: bool,
        calls: AtomicUsize,
        /// 询价时推进时钟
        quote_step: ClockStep,
        /// 执行时推进时钟
        execute_step: ClockStep,
    }

    impl MockLender {
        fn new(id: &'static str, fee_bps: u32, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                id,
                fee_bps,
                fail,
                calls: AtomicUsize::new(0),
                quote_step: Mutex::new(None),
                execute_step: Mutex::new(None),
            })
        }

        fn step(slot: &ClockStep) {
            if let Some((clock, by)) = slot.lock().as_ref() {
                clock.advance(*by);
            }
        }
    }

    #[async_trait]
    impl LendingQuoteSource for MockLender {
        fn provider_id(&self) -> ProviderId {
            ProviderId::from(self.id)
        }

        fn supports(&self, _asset: Address) -> bool {
            true
        }

        async fn fee_bps(&self, _asset: Address, _amount: U256) -> Result<u32, SourceError> {
            Self::step(&self.quote_step);
            Ok(self.fee_bps)
        }

        async fn max_amount(&self, _asset: Address) -> Result<U256, SourceError> {
            Ok(U256::from(100_000_000_000u64))
        }

        fn estimated_gas(&self) -> U256 {
            U256::from(120_000u64)
        }

        async fn execute(
            &self,
            _asset: Address,
            amount: U256,
            payload: &Bytes,
        ) -> Result<LoanReceipt, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Self::step(&self.execute_step);
            assert!(!payload.is_empty());
            if self.fail {
                return Err(SourceError::Failure {
                    reason: "repay failed".into(),
                });
            }
            Ok(LoanReceipt {
                fee_paid: dex::flashloan::fee_for(amount, self.fee_bps),
                gas_used: U256::from(110_000u64),
            })
        }
    }

    struct MockLedger {
        succeed: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Ledger for MockLedger {
        async fn settle(
            &self,
            route: &SettlementRoute,
            provider: Option<&ProviderId>,
            amount: U256,
        ) -> ExecutionResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(route.min_amount_out > amount);
            if self.succeed {
                ExecutionResult::succeeded(provider.cloned(), U256::zero(), U256::from(250_000u64))
                    .with_realized_profit(U256::from(400_000u64))
            } else {
                let mut result = ExecutionResult::failed(
                    EngineError::ExecutionFailed { reason: "reverted".into() }.kind(),
                );
                result.gas_used = U256::from(90_000u64);
                result
            }
        }
    }

    /// 第一次写入风控状态时推进时钟，模拟风控检查之后的耗时
    struct SlowRiskStore {
        inner: InMemoryRiskStates,
        clock: Arc<ManualClock>,
        step: Duration,
        stepped: AtomicBool,
    }

    impl RiskStateStore for SlowRiskStore {
        fn get(&self, caller: &Address) -> Option<RiskState> {
            self.inner.get(caller)
        }

        fn update(&self, caller: Address, now: chrono::DateTime<Utc>, f: &mut dyn FnMut(&mut RiskState)) {
            self.inner.update(caller, now, f);
            if !self.stepped.swap(true, Ordering::SeqCst) {
                self.clock.advance(self.step);
            }
        }
    }

    struct Harness {
        coordinator: ExecutionCoordinator,
        clock: Arc<ManualClock>,
        venue: Arc<MockVenue>,
        liquidity: Arc<MockLiquidity>,
        ledger: Arc<MockLedger>,
        risk: Arc<RiskGovernor>,
        venue_stats: SharedStatsStore,
    }

    fn harness(
        lenders: Vec<Arc<MockLender>>,
        ledger_succeeds: bool,
        risk_config: RiskConfig,
        quote_delay: Option<Duration>,
    ) -> Harness {
        build_harness(lenders, ledger_succeeds, risk_config, quote_delay, None)
    }

    fn build_harness(
        lenders: Vec<Arc<MockLender>>,
        ledger_succeeds: bool,
        risk_config: RiskConfig,
        quote_delay: Option<Duration>,
        risk_delay: Option<Duration>,
    ) -> Harness {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap(),
        ));
        let venue = Arc::new(MockVenue {
            calls: AtomicUsize::new(0),
            slow_clock: quote_delay.map(|d| (clock.clone(), d)),
        });
        let liquidity = Arc::new(MockLiquidity {
            calls: AtomicUsize::new(0),
        });
        let ledger = Arc::new(MockLedger {
            succeed: ledger_succeeds,
            calls: AtomicUsize::new(0),
        });

        let venue_stats: SharedStatsStore = Arc::new(InMemoryProviderStats::new());
        let loan_stats: SharedStatsStore = Arc::new(InMemoryProviderStats::new());
        let router = Arc::new(RouteOptimizer::new(
            vec![venue.clone() as Arc<dyn VenueQuoteSource>],
            venue_stats.clone(),
            RoutingConfig::default(),
        ));
        let loans = Arc::new(LoanAggregator::new(
            lenders
                .into_iter()
                .map(|l| l as Arc<dyn LendingQuoteSource>)
                .collect(),
            loan_stats,
            clock.clone(),
            LoanConfig::default(),
        ));
        let risk_store: Arc<dyn RiskStateStore> = match risk_delay {
            Some(step) => Arc::new(SlowRiskStore {
                inner: InMemoryRiskStates::new(),
                clock: clock.clone(),
                step,
                stepped: AtomicBool::new(false),
            }),
            None => Arc::new(InMemoryRiskStates::new()),
        };
        let risk = Arc::new(RiskGovernor::new(risk_store, clock.clone(), risk_config));

        let coordinator = ExecutionCoordinator::new(
            router,
            liquidity.clone(),
            Arc::new(ProfitSimulator::new(SimulationConfig::default())),
            risk.clone(),
            loans,
            ledger.clone(),
            Arc::new(InMemoryIntentRegistry::new()),
            clock.clone(),
        );

        Harness {
            coordinator,
            clock,
            venue,
            liquidity,
            ledger,
            risk,
            venue_stats,
        }
    }

    fn default_harness() -> Harness {
        harness(
            vec![MockLender::new("aave_v3", 5, false)],
            true,
            RiskConfig::default(),
            None,
        )
    }

    fn intent(h: &Harness, min_profit: u64, funding: FundingMode) -> ArbitrageIntent {
        let now = h.clock.now();
        ArbitrageIntent::new(
            token_a(),
            token_a(),
            U256::from(1_000_000u64),
            U256::from(min_profit),
            50,
            now + Duration::seconds(60),
            caller(),
            funding,
            now,
        )
    }

    #[tokio::test]
    async fn test_flash_loan_happy_path() {
        let h = default_harness();
        let i = intent(&h, 1_000, FundingMode::FlashLoan);

        let result = h.coordinator.submit(&i).await.unwrap();
        assert!(result.success);
        assert_eq!(result.used_provider_id, Some(ProviderId::from("aave_v3")));
        // 1e6 * 5 / 1e4
        assert_eq!(result.actual_fee, U256::from(500u64));
        assert_eq!(result.gas_used, U256::from(360_000u64));
        assert_eq!(result.realized_profit, U256::from(400_000u64));

        let stats = h.coordinator.stats();
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.total_profit, U256::from(400_000u64));
        assert_eq!(h.coordinator.caller_profit(&caller()), U256::from(400_000u64));
        assert_eq!(
            h.coordinator.registry().status(&i.id()),
            Some(IntentStatus::Completed)
        );

        let venue = h.venue_stats.get(&ProviderId::from("uniswap_v2"));
        assert_eq!(venue.total_executions, 1);
        assert_eq!(venue.avg_gas_used, U256::from(25_000u64));
        // 盈利结算后预留被释放
        assert!(h.risk.daily_loss(&caller()).is_zero());

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["completed"], 1);
        assert_eq!(json["duplicates_rejected"], 0);
    }

    #[tokio::test]
    async fn test_duplicate_is_rejected_without_requoting() {
        let h = default_harness();
        let i = intent(&h, 1_000, FundingMode::FlashLoan);

        assert!(h.coordinator.submit(&i).await.is_ok());
        let err = h.coordinator.submit(&i).await.unwrap_err();
        assert_eq!(err, EngineError::DuplicateIntent(i.id()));

        assert_eq!(h.venue.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.liquidity.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.ledger.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.coordinator.stats().duplicates_rejected, 1);
    }

    #[tokio::test]
    async fn test_pruned_intent_resubmission_is_expired() {
        let h = default_harness();
        let i = intent(&h, 1_000, FundingMode::FlashLoan);
        assert!(h.coordinator.submit(&i).await.unwrap().success);

        assert_eq!(h.coordinator.prune_expired_intents(), 0);
        h.clock.advance(Duration::seconds(61));
        assert_eq!(h.coordinator.prune_expired_intents(), 1);
        assert_eq!(h.coordinator.registry().status(&i.id()), None);

        assert_eq!(h.coordinator.submit(&i).await, Err(EngineError::Expired));
        assert_eq!(h.venue.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.ledger.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_before_quoting() {
        let h = default_harness();
        let i = intent(&h, 1_000, FundingMode::FlashLoan);
        h.clock.advance(Duration::seconds(61));

        assert_eq!(h.coordinator.submit(&i).await, Err(EngineError::Expired));
        assert_eq!(h.venue.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.coordinator.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_expiry_detected_mid_pipeline() {
        let h = harness(
            vec![MockLender::new("aave_v3", 5, false)],
            true,
            RiskConfig::default(),
            Some(Duration::seconds(90)),
        );
        let i = intent(&h, 1_000, FundingMode::FlashLoan);

        assert_eq!(h.coordinator.submit(&i).await, Err(EngineError::Expired));
        assert_eq!(h.venue.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.ledger.calls.load(Ordering::SeqCst), 0);
        // 未通过 Validating，不登记
        assert_eq!(h.coordinator.registry().status(&i.id()), None);
    }

    #[tokio::test]
    async fn test_expiry_at_selecting_releases_reservation() {
        let lender = MockLender::new("aave_v3", 5, false);
        let h = build_harness(
            vec![lender.clone()],
            true,
            RiskConfig::default(),
            None,
            Some(Duration::seconds(120)),
        );
        let i = intent(&h, 1_000, FundingMode::FlashLoan);

        assert_eq!(h.coordinator.submit(&i).await, Err(EngineError::Expired));
        assert_eq!(lender.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.ledger.calls.load(Ordering::SeqCst), 0);
        assert!(h.risk.daily_loss(&caller()).is_zero());
        assert_eq!(
            h.coordinator.registry().status(&i.id()),
            Some(IntentStatus::Rejected)
        );
    }

    #[tokio::test]
    async fn test_expiry_at_executing_draws_no_loan() {
        let lender = MockLender::new("aave_v3", 5, false);
        let h = harness(vec![lender.clone()], true, RiskConfig::default(), None);
        *lender.quote_step.lock() = Some((h.clock.clone(), Duration::seconds(120)));
        let i = intent(&h, 1_000, FundingMode::FlashLoan);

        assert_eq!(h.coordinator.submit(&i).await, Err(EngineError::Expired));
        assert_eq!(lender.calls.load(Ordering::SeqCst), 0);
        assert!(h.risk.daily_loss(&caller()).is_zero());
        assert_eq!(h.coordinator.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_fallback_stops_once_deadline_passes() {
        // balancer 零费率被选为主提供商，执行失败且耗时超过截止时间
        let primary = MockLender::new("balancer", 0, true);
        let backup = MockLender::new("aave_v3", 5, false);
        let h = harness(
            vec![primary.clone(), backup.clone()],
            true,
            RiskConfig::default(),
            None,
        );
        *primary.execute_step.lock() = Some((h.clock.clone(), Duration::seconds(120)));
        let i = intent(&h, 1_000, FundingMode::FlashLoan);

        assert_eq!(h.coordinator.submit(&i).await, Err(EngineError::Expired));
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(backup.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.ledger.calls.load(Ordering::SeqCst), 0);
        // 没有借款成功，不计亏损
        assert!(h.risk.daily_loss(&caller()).is_zero());
        assert_eq!(
            h.coordinator.registry().status(&i.id()),
            Some(IntentStatus::Rejected)
        );
    }

    #[tokio::test]
    async fn test_expiry_after_loan_drawn_commits_loss() {
        let lender = MockLender::new("aave_v3", 5, false);
        let h = harness(vec![lender.clone()], true, RiskConfig::default(), None);
        *lender.execute_step.lock() = Some((h.clock.clone(), Duration::seconds(120)));
        let i = intent(&h, 1_000, FundingMode::FlashLoan);

        assert_eq!(h.coordinator.submit(&i).await, Err(EngineError::Expired));
        assert_eq!(lender.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.ledger.calls.load(Ordering::SeqCst), 0);
        // 闪电贷费用 1e6 * 5 / 1e4 (gas 价格为 0)
        assert_eq!(h.risk.daily_loss(&caller()), U256::from(500u64));
    }

    #[tokio::test]
    async fn test_unprofitable_intent_is_not_recorded() {
        let h = default_harness();
        let i = intent(&h, 10_000_000, FundingMode::FlashLoan);

        let first = h.coordinator.submit(&i).await.unwrap_err();
        assert!(matches!(first, EngineError::InsufficientProfit { .. }));
        let second = h.coordinator.submit(&i).await.unwrap_err();
        assert!(matches!(second, EngineError::InsufficientProfit { .. }));
        assert_eq!(h.venue.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.coordinator.stats().rejected, 2);
    }

    #[tokio::test]
    async fn test_all_providers_fail() {
        let lenders = vec![
            MockLender::new("aave_v3", 5, true),
            MockLender::new("balancer", 0, true),
        ];
        let h = harness(lenders.clone(), true, RiskConfig::default(), None);
        let i = intent(&h, 1_000, FundingMode::FlashLoan);

        let result = h.coordinator.submit(&i).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error_reason.as_deref(), Some("NoProviderAvailable"));
        assert_eq!(result.failed_attempts(), 2);
        assert!(lenders.iter().all(|l| l.calls.load(Ordering::SeqCst) == 1));
        assert_eq!(h.ledger.calls.load(Ordering::SeqCst), 0);

        assert_eq!(h.coordinator.stats().failed, 1);
        assert_eq!(
            h.coordinator.registry().status(&i.id()),
            Some(IntentStatus::Failed)
        );
        assert!(h.risk.daily_loss(&caller()).is_zero());
    }

    #[tokio::test]
    async fn test_settlement_failure_commits_real_loss() {
        let h = harness(
            vec![MockLender::new("aave_v3", 5, false)],
            false,
            RiskConfig::default(),
            None,
        );
        let i = intent(&h, 1_000, FundingMode::FlashLoan);

        let result = h.coordinator.submit(&i).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error_reason.as_deref(), Some("ExecutionFailed"));
        assert_eq!(result.used_provider_id, Some(ProviderId::from("aave_v3")));

        // 闪电贷费用 + gas 成本 (gas 价格为 0)
        assert_eq!(h.risk.daily_loss(&caller()), U256::from(500u64));
        assert_eq!(
            h.venue_stats
                .get(&ProviderId::from("uniswap_v2"))
                .total_failed,
            1
        );
    }

    #[tokio::test]
    async fn test_self_funded_skips_loans() {
        let lender = MockLender::new("aave_v3", 5, false);
        let h = harness(vec![lender.clone()], true, RiskConfig::default(), None);
        let i = intent(&h, 1_000, FundingMode::SelfFunded);

        let result = h.coordinator.submit(&i).await.unwrap();
        assert!(result.success);
        assert_eq!(result.used_provider_id, None);
        assert!(result.attempts.is_empty());
        assert_eq!(lender.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_risk_limit_rejects_after_recording() {
        let risk = RiskConfig {
            max_daily_loss: 1_000,
            ..RiskConfig::default()
        };
        let h = harness(vec![MockLender::new("aave_v3", 5, false)], true, risk, None);
        let i = intent(&h, 1_000, FundingMode::FlashLoan);

        let err = h.coordinator.submit(&i).await.unwrap_err();
        assert!(matches!(err, EngineError::RiskLimitExceeded(_)));
        assert_eq!(
            h.coordinator.registry().status(&i.id()),
            Some(IntentStatus::Rejected)
        );
        assert_eq!(h.ledger.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_daily_window_resets_for_caller() {
        let risk = RiskConfig {
            max_daily_loss: 5_800,
            ..RiskConfig::default()
        };
        let h = harness(vec![MockLender::new("aave_v3", 5, false)], false, risk, None);

        // 每次结算失败计入 500 的亏损，潜在亏损预留为 5000
        let first = intent(&h, 1_000, FundingMode::FlashLoan);
        assert!(!h.coordinator.submit(&first).await.unwrap().success);
        let second = intent(&h, 1_001, FundingMode::FlashLoan);
        assert!(!h.coordinator.submit(&second).await.unwrap().success);
        assert_eq!(h.risk.daily_loss(&caller()), U256::from(1_000u64));

        // 1000 + 5000 > 5800
        let third = intent(&h, 1_002, FundingMode::FlashLoan);
        assert!(matches!(
            h.coordinator.submit(&third).await,
            Err(EngineError::RiskLimitExceeded(_))
        ));

        h.clock.advance(Duration::hours(25));
        let fourth = intent(&h, 1_000, FundingMode::FlashLoan);
        assert!(h.coordinator.submit(&fourth).await.is_ok());
        assert_eq!(h.risk.daily_loss(&caller()), U256::from(500u64));
    }

    #[tokio::test]
    async fn test_paused_simulator_rejects() {
        let h = default_harness();
        h.coordinator.simulator.pause();
        let i = intent(&h, 1_000, FundingMode::FlashLoan);
        assert_eq!(h.coordinator.submit(&i).await, Err(EngineError::SystemPaused));
    }
}

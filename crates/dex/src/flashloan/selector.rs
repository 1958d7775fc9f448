//! 闪电贷提供商聚合与选择
//!
//! 选择策略:
//! 1. 提供商必须启用、支持该资产，且可借上限不低于借款金额
//! 2. 报价并发获取，单个提供商超时或报错只会标记为不可用
//! 3. 综合评分: 费率 30% / 流动性充足度 25% / 可靠性 35% / 配置优先级 10%
//! 4. 零费率得满分，费率越高分数按 10 / (10 + bps) 衰减

use config_crate::{LoanConfig, SelectionCriteria};
use ethers::types::{Address, U256};
use futures_util::stream::{FuturesUnordered, StreamExt};
use models::{EngineError, LoanQuote, ProviderId, SourceError};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use utils::SharedClock;

use super::providers::{fee_for, FlashLoanProvider, LendingQuoteSource};
use crate::common::{weighted_score, MAX_SCORE};
use crate::stats::SharedStatsStore;

/// 一轮选择的结果
///
/// `candidates` 保留本轮全部报价，备用顺序直接复用，执行阶段不再重新询价。
#[derive(Debug, Clone)]
pub struct LoanSelection {
    pub selected: LoanQuote,
    pub candidates: Vec<LoanQuote>,
}

/// 闪电贷聚合器
pub struct LoanAggregator {
    pub(super) sources: Vec<Arc<dyn LendingQuoteSource>>,
    pub(super) stats: SharedStatsStore,
    pub(super) clock: SharedClock,
    pub(super) config: LoanConfig,
}

impl LoanAggregator {
    pub fn new(
        sources: Vec<Arc<dyn LendingQuoteSource>>,
        stats: SharedStatsStore,
        clock: SharedClock,
        config: LoanConfig,
    ) -> Self {
        Self {
            sources,
            stats,
            clock,
            config,
        }
    }

    pub fn add_source(&mut self, source: Arc<dyn LendingQuoteSource>) {
        self.sources.push(source);
    }

    pub fn config(&self) -> &LoanConfig {
        &self.config
    }

    pub(super) fn source(&self, id: &ProviderId) -> Option<&Arc<dyn LendingQuoteSource>> {
        self.sources.iter().find(|s| s.provider_id() == *id)
    }

    /// 向全部提供商询价并评分 (含不可用的候选)
    pub async fn quote_providers(&self, asset: Address, amount: U256) -> Vec<LoanQuote> {
        let per_call = Duration::from_millis(self.config.quote_timeout_ms);
        let mut quotes = Vec::with_capacity(self.sources.len());
        let mut pending = FuturesUnordered::new();

        for source in &self.sources {
            let id = source.provider_id();
            if !self.stats.get(&id).active {
                quotes.push(LoanQuote::unavailable(id, "inactive"));
                continue;
            }
            if !source.supports(asset) {
                quotes.push(LoanQuote::unavailable(id, "unsupported asset"));
                continue;
            }

            let source = source.clone();
            pending.push(async move {
                let fetch = async {
                    let fee_bps = source.fee_bps(asset, amount).await?;
                    let max_amount = source.max_amount(asset).await?;
                    Ok::<_, SourceError>((fee_bps, max_amount))
                };
                let outcome = match tokio::time::timeout(per_call, fetch).await {
                    Ok(result) => result,
                    Err(_) => Err(SourceError::Timeout),
                };
                (id, source.estimated_gas(), outcome)
            });
        }

        while let Some((id, estimated_gas, outcome)) = pending.next().await {
            let quote = match outcome {
                Ok((fee_bps, max_amount)) => {
                    let mut quote = LoanQuote {
                        provider_id: id,
                        fee_bps,
                        fee: fee_for(amount, fee_bps),
                        max_amount,
                        estimated_gas,
                        score: 0,
                        available: true,
                        error: None,
                    };
                    if max_amount < amount {
                        quote.available = false;
                        quote.error = Some("insufficient capacity".to_string());
                    }
                    quote
                }
                Err(e) => {
                    debug!(target: "loan_aggregator", "提供商 {} 报价失败: {}", id, e);
                    LoanQuote::unavailable(id, e.reason())
                }
            };
            quotes.push(quote);
        }

        for quote in quotes.iter_mut() {
            quote.score = if quote.available {
                self.score(quote, amount)
            } else {
                0
            };
        }

        quotes
    }

    /// 按策略选择最优提供商
    pub async fn select_optimal_provider(
        &self,
        asset: Address,
        amount: U256,
        criteria: SelectionCriteria,
    ) -> Result<LoanSelection, EngineError> {
        let candidates = self.quote_providers(asset, amount).await;

        let selected = Self::select(&candidates, criteria).ok_or_else(|| {
            warn!(
                target: "loan_aggregator",
                "无可用闪电贷提供商: asset={:?}, amount={}, 候选数={}",
                asset, amount, candidates.len()
            );
            EngineError::NoProviderAvailable
        })?;

        info!(
            target: "loan_aggregator",
            "选择闪电贷提供商: {} ({}), 策略={}, 费率={}bps, 费用={}, 评分={}",
            selected.provider_id,
            FlashLoanProvider::display_name(&selected.provider_id),
            criteria.as_str(),
            selected.fee_bps,
            selected.fee,
            selected.score
        );

        Ok(LoanSelection {
            selected,
            candidates,
        })
    }

    pub fn select(quotes: &[LoanQuote], criteria: SelectionCriteria) -> Option<LoanQuote> {
        quotes
            .iter()
            .filter(|q| q.available)
            .max_by(|a, b| compare(criteria, a, b))
            .cloned()
    }

    fn score(&self, quote: &LoanQuote, amount: U256) -> u32 {
        let stats = self.stats.get(&quote.provider_id);
        let weights = &self.config.weights;

        weighted_score(&[
            (weights.fee, fee_score(quote.fee_bps)),
            (weights.liquidity, liquidity_score(quote.max_amount, amount)),
            (weights.reliability, stats.success_rate_bps),
            (weights.priority, u32::from(stats.priority) * 100),
        ])
    }
}

/// 10000 * 10 / (10 + bps): 0bps = 10000, 5bps = 6666, 30bps = 2500
pub fn fee_score(fee_bps: u32) -> u32 {
    let score = u64::from(MAX_SCORE) * 10 / (10 + u64::from(fee_bps));
    score as u32
}

/// 上限恰好等于金额得 1000，达到 10 倍及以上得满分
pub fn liquidity_score(max_amount: U256, amount: U256) -> u32 {
    if amount.is_zero() {
        return MAX_SCORE;
    }
    let ratio = max_amount.saturating_mul(U256::from(1000u64)) / amount;
    ratio.min(U256::from(MAX_SCORE)).as_u32()
}

/// `Greater` 表示 a 更优
fn compare(criteria: SelectionCriteria, a: &LoanQuote, b: &LoanQuote) -> Ordering {
    match criteria {
        SelectionCriteria::Balanced => a.score.cmp(&b.score).then_with(|| b.fee.cmp(&a.fee)),
        SelectionCriteria::LowestFee => (b.fee, b.fee_bps)
            .cmp(&(a.fee, a.fee_bps))
            .then_with(|| a.score.cmp(&b.score)),
        SelectionCriteria::HighestLiquidity => a
            .max_amount
            .cmp(&b.max_amount)
            .then_with(|| a.score.cmp(&b.score)),
        SelectionCriteria::FastestExecution => b
            .estimated_gas
            .cmp(&a.estimated_gas)
            .then_with(|| a.score.cmp(&b.score)),
    }
}

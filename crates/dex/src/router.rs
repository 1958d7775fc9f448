//! 兑换路由优化器
//!
//! 选择策略:
//! 1. 并发向所有启用的场所询价 (有费率档位的场所每个档位询价一次)
//! 2. 单个场所报错或超时只会使该候选无效，不会中断整轮询价
//! 3. 有效报价按 输出量 70% / 可靠性 20% / gas 效率 10% 综合评分
//! 4. 调用方可指定单因子策略替代综合评分

use config_crate::{RoutingConfig, SelectionCriteria};
use ethers::types::{Address, U256};
use futures_util::stream::{FuturesUnordered, StreamExt};
use models::{EngineError, ProviderId, SourceError, VenueQuote};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::common::{normalize, weighted_score, RawVenueQuote, VenueQuoteSource};
use crate::stats::SharedStatsStore;

/// 路由优化器
pub struct RouteOptimizer {
    sources: Vec<Arc<dyn VenueQuoteSource>>,
    stats: SharedStatsStore,
    config: RoutingConfig,
}

impl RouteOptimizer {
    pub fn new(
        sources: Vec<Arc<dyn VenueQuoteSource>>,
        stats: SharedStatsStore,
        config: RoutingConfig,
    ) -> Self {
        Self {
            sources,
            stats,
            config,
        }
    }

    pub fn add_source(&mut self, source: Arc<dyn VenueQuoteSource>) {
        self.sources.push(source);
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    /// 场所统计 (由执行协调器在结算后更新)
    pub fn stats(&self) -> &SharedStatsStore {
        &self.stats
    }

    /// 按配置的策略选择最优路由
    pub async fn find_optimal_route(
        &self,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
    ) -> Result<VenueQuote, EngineError> {
        self.find_optimal_route_with(token_in, token_out, amount_in, self.config.selection_criteria)
            .await
    }

    /// 按指定策略选择最优路由
    pub async fn find_optimal_route_with(
        &self,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        criteria: SelectionCriteria,
    ) -> Result<VenueQuote, EngineError> {
        let quotes = self.quote_all(token_in, token_out, amount_in).await;

        let best = Self::select(&quotes, criteria).ok_or_else(|| {
            warn!(
                target: "route_optimizer",
                "无有效路由: token_in={:?}, token_out={:?}, amount={}, 候选数={}",
                token_in, token_out, amount_in, quotes.len()
            );
            EngineError::NoRouteFound
        })?;

        info!(
            target: "route_optimizer",
            "选择路由: {}, 策略={}, 输出={}, gas={}, 评分={}",
            best.label(),
            criteria.as_str(),
            best.amount_out,
            best.estimated_gas,
            best.score
        );

        Ok(best)
    }

    /// 询价并评分全部候选 (含无效候选, 供诊断使用)
    pub async fn quote_all(
        &self,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
    ) -> Vec<VenueQuote> {
        let per_call = Duration::from_millis(self.config.quote_timeout_ms);
        let budget_deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.config.quote_budget_ms);

        let mut launched: Vec<(ProviderId, Option<u32>)> = Vec::new();
        let mut pending = FuturesUnordered::new();

        for source in &self.sources {
            let venue_id = source.venue_id();
            if !self.stats.get(&venue_id).active {
                debug!(target: "route_optimizer", "跳过停用场所 {}", venue_id);
                continue;
            }

            let tiers: Vec<Option<u32>> = {
                let tiers = source.fee_tiers();
                if tiers.is_empty() {
                    vec![None]
                } else {
                    tiers.into_iter().map(Some).collect()
                }
            };

            for tier in tiers {
                launched.push((venue_id.clone(), tier));
                let source = source.clone();
                let venue_id = venue_id.clone();
                pending.push(async move {
                    let outcome = match tokio::time::timeout(
                        per_call,
                        source.quote(token_in, token_out, amount_in, tier),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(SourceError::Timeout),
                    };
                    (venue_id, tier, outcome)
                });
            }
        }

        let mut quotes = Vec::with_capacity(launched.len());
        let mut answered: HashSet<(ProviderId, Option<u32>)> = HashSet::new();

        loop {
            match tokio::time::timeout_at(budget_deadline, pending.next()).await {
                Ok(Some((venue_id, tier, outcome))) => {
                    answered.insert((venue_id.clone(), tier));
                    quotes.push(Self::to_quote(venue_id, tier, outcome));
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        target: "route_optimizer",
                        "询价预算耗尽 ({}ms)，{} 个候选未返回，使用已有报价继续",
                        self.config.quote_budget_ms,
                        pending.len()
                    );
                    break;
                }
            }
        }

        for (venue_id, tier) in launched {
            if !answered.contains(&(venue_id.clone(), tier)) {
                quotes.push(VenueQuote::invalid(venue_id, tier, "quote budget exhausted"));
            }
        }

        self.score_quotes(&mut quotes);
        quotes
    }

    fn to_quote(
        venue_id: ProviderId,
        fee_tier: Option<u32>,
        outcome: Result<RawVenueQuote, SourceError>,
    ) -> VenueQuote {
        match outcome {
            Ok(raw) if raw.amount_out.is_zero() => {
                VenueQuote::invalid(venue_id, fee_tier, "zero output")
            }
            Ok(raw) => VenueQuote {
                venue_id,
                fee_tier,
                fee_bps: raw.fee_bps,
                amount_out: raw.amount_out,
                estimated_gas: raw.estimated_gas,
                route_data: raw.route_data,
                score: 0,
                valid: true,
                error: None,
            },
            Err(e) => {
                debug!(target: "route_optimizer", "场所 {} 报价失败: {}", venue_id, e);
                VenueQuote::invalid(venue_id, fee_tier, e.reason())
            }
        }
    }

    /// 为有效报价计算综合评分 (0-10000)，无效报价评分为 0
    pub fn score_quotes(&self, quotes: &mut [VenueQuote]) {
        let valid = quotes.iter().filter(|q| q.valid);
        let max_out = valid.clone().map(|q| q.amount_out).max().unwrap_or_default();
        let max_efficiency = valid
            .map(|q| gas_efficiency(q.amount_out, q.estimated_gas))
            .max()
            .unwrap_or_default();

        let weights = &self.config.weights;
        for quote in quotes.iter_mut() {
            if !quote.valid {
                quote.score = 0;
                continue;
            }

            let output_term = normalize(quote.amount_out, max_out);
            let reliability = self.stats.get(&quote.venue_id).success_rate_bps;
            let efficiency_term =
                normalize(gas_efficiency(quote.amount_out, quote.estimated_gas), max_efficiency);

            quote.score = weighted_score(&[
                (weights.amount_out, output_term),
                (weights.reliability, reliability),
                (weights.gas_efficiency, efficiency_term),
            ]);
        }
    }

    /// 在有效报价中按策略选出最优者
    pub fn select(quotes: &[VenueQuote], criteria: SelectionCriteria) -> Option<VenueQuote> {
        quotes
            .iter()
            .filter(|q| q.valid)
            .max_by(|a, b| compare(criteria, a, b))
            .cloned()
    }
}

/// 每单位 gas 的输出 (放大 1e4 以保留精度)
fn gas_efficiency(amount_out: U256, estimated_gas: U256) -> U256 {
    let gas = if estimated_gas.is_zero() { U256::one() } else { estimated_gas };
    amount_out.saturating_mul(U256::from(10_000u64)) / gas
}

/// `Greater` 表示 a 更优
fn compare(criteria: SelectionCriteria, a: &VenueQuote, b: &VenueQuote) -> Ordering {
    match criteria {
        SelectionCriteria::Balanced => a
            .score
            .cmp(&b.score)
            .then_with(|| a.amount_out.cmp(&b.amount_out)),
        SelectionCriteria::LowestFee => b
            .fee_bps
            .cmp(&a.fee_bps)
            .then_with(|| a.amount_out.cmp(&b.amount_out)),
        SelectionCriteria::HighestLiquidity => a
            .amount_out
            .cmp(&b.amount_out)
            .then_with(|| a.score.cmp(&b.score)),
        SelectionCriteria::FastestExecution => b
            .estimated_gas
            .cmp(&a.estimated_gas)
            .then_with(|| a.amount_out.cmp(&b.amount_out)),
    }
}

//! 闪电贷执行与备用切换
//!
//! 借入的资金不能并发复用，所以备用链严格串行执行。
//! 每次进入 `Attempting` 之前都检查截止时间，过期后不再借款。

use chrono::{DateTime, Utc};
use ethers::types::{Address, Bytes, U256};
use models::{EngineError, ExecutionResult, LoanAttempt, LoanQuote, ProviderId};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, info, warn};

use super::selector::{LoanAggregator, LoanSelection};

/// 备用切换状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackState {
    /// 已选定主提供商
    Selected(ProviderId),
    Attempting(ProviderId),
    AttemptFailed(ProviderId),
    NextFallback(ProviderId),
    Succeeded(ProviderId),
    Exhausted,
    /// 发起下一次尝试前已过截止时间
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackEvent {
    Attempt,
    AttemptSucceeded,
    AttemptFailed,
    /// 切换到下一个备用 (`None` 表示没有可用备用)
    Advance(Option<ProviderId>),
    DeadlinePassed,
}

impl FallbackState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FallbackState::Succeeded(_) | FallbackState::Exhausted | FallbackState::Expired
        )
    }

    /// 状态转移，不合法的事件保持原状态
    pub fn on(self, event: FallbackEvent) -> FallbackState {
        match (self, event) {
            (FallbackState::Selected(id), FallbackEvent::Attempt)
            | (FallbackState::NextFallback(id), FallbackEvent::Attempt) => {
                FallbackState::Attempting(id)
            }
            (FallbackState::Selected(_), FallbackEvent::DeadlinePassed)
            | (FallbackState::NextFallback(_), FallbackEvent::DeadlinePassed) => {
                FallbackState::Expired
            }
            (FallbackState::Attempting(id), FallbackEvent::AttemptSucceeded) => {
                FallbackState::Succeeded(id)
            }
            (FallbackState::Attempting(id), FallbackEvent::AttemptFailed) => {
                FallbackState::AttemptFailed(id)
            }
            (FallbackState::AttemptFailed(_), FallbackEvent::Advance(Some(next))) => {
                FallbackState::NextFallback(next)
            }
            (FallbackState::AttemptFailed(_), FallbackEvent::Advance(None)) => {
                FallbackState::Exhausted
            }
            (state, _) => state,
        }
    }
}

impl LoanAggregator {
    /// 从选定的提供商开始借款并执行，失败后按备用顺序切换
    ///
    /// 备用顺序取自选择阶段的报价: 配置的 `fallback_order` 优先，其余可用提供商按费率升序。
    /// `max_fallback_attempts` 只统计主提供商之后真正发起的尝试。
    /// 截止时间已过时以 `Expired` 结束，不再发起新的借款。
    pub async fn execute_with_fallback(
        &self,
        asset: Address,
        amount: U256,
        payload: &Bytes,
        selection: &LoanSelection,
        deadline: DateTime<Utc>,
    ) -> ExecutionResult {
        let primary = &selection.selected.provider_id;
        let mut remaining = self.fallback_order(&selection.candidates, primary);
        let mut tried: HashSet<ProviderId> = HashSet::new();
        let mut attempts: Vec<LoanAttempt> = Vec::new();
        let mut fallbacks_used = 0usize;
        let mut state = FallbackState::Selected(primary.clone());

        info!(
            target: "loan_aggregator",
            "开始闪电贷执行: primary={}, amount={}, 备用候选={}",
            primary,
            amount,
            remaining.len()
        );

        loop {
            match &state {
                FallbackState::Selected(id) | FallbackState::NextFallback(id) => {
                    let now = self.clock.now();
                    let event = if now > deadline {
                        warn!(
                            target: "loan_aggregator",
                            "截止时间已过，放弃尝试 {}: deadline={}, now={}",
                            id,
                            deadline,
                            now
                        );
                        FallbackEvent::DeadlinePassed
                    } else {
                        FallbackEvent::Attempt
                    };
                    state = state.on(event);
                }
                FallbackState::Attempting(id) => {
                    let id = id.clone();
                    let attempt = self.attempt(&id, asset, amount, payload).await;
                    let event = if attempt.success {
                        FallbackEvent::AttemptSucceeded
                    } else {
                        FallbackEvent::AttemptFailed
                    };
                    tried.insert(id);
                    attempts.push(attempt);
                    state = state.on(event);
                }
                FallbackState::AttemptFailed(id) => {
                    let next = if fallbacks_used < self.config.max_fallback_attempts {
                        self.next_fallback(&mut remaining, &tried, asset)
                    } else {
                        None
                    };
                    if let Some(next) = &next {
                        fallbacks_used += 1;
                        warn!(
                            target: "loan_aggregator",
                            "提供商 {} 执行失败，切换备用 {} ({}/{})",
                            id,
                            next,
                            fallbacks_used,
                            self.config.max_fallback_attempts
                        );
                    }
                    state = state.on(FallbackEvent::Advance(next));
                }
                FallbackState::Succeeded(id) => {
                    let (fee_paid, gas_used) = attempts
                        .last()
                        .map(|a| (a.fee_paid, a.gas_used))
                        .unwrap_or_default();
                    info!(
                        target: "loan_aggregator",
                        "闪电贷执行成功: provider={}, fee={}, gas={}, 失败次数={}",
                        id,
                        fee_paid,
                        gas_used,
                        attempts.len() - 1
                    );
                    return ExecutionResult::succeeded(Some(id.clone()), fee_paid, gas_used)
                        .with_attempts(attempts);
                }
                FallbackState::Exhausted => {
                    warn!(
                        target: "loan_aggregator",
                        "所有闪电贷提供商均失败: 尝试次数={}",
                        attempts.len()
                    );
                    return ExecutionResult::failed(EngineError::NoProviderAvailable.kind())
                        .with_attempts(attempts);
                }
                FallbackState::Expired => {
                    return ExecutionResult::failed(EngineError::Expired.kind())
                        .with_attempts(attempts);
                }
            }
        }
    }

    /// 备用候选 (不含主提供商)
    fn fallback_order(&self, candidates: &[LoanQuote], primary: &ProviderId) -> VecDeque<ProviderId> {
        let mut quotes: Vec<&LoanQuote> = candidates
            .iter()
            .filter(|q| q.available && q.provider_id != *primary)
            .collect();
        quotes.sort_by(|a, b| {
            a.fee_bps
                .cmp(&b.fee_bps)
                .then_with(|| a.provider_id.cmp(&b.provider_id))
        });

        let mut order: VecDeque<ProviderId> = VecDeque::with_capacity(quotes.len());
        for configured in &self.config.fallback_order {
            if let Some(pos) = quotes
                .iter()
                .position(|q| q.provider_id.as_str() == configured.as_str())
            {
                order.push_back(quotes.remove(pos).provider_id.clone());
            }
        }
        order.extend(quotes.into_iter().map(|q| q.provider_id.clone()));
        order
    }

    /// 取下一个可尝试的备用，跳过已尝试或已停用的提供商
    fn next_fallback(
        &self,
        remaining: &mut VecDeque<ProviderId>,
        tried: &HashSet<ProviderId>,
        asset: Address,
    ) -> Option<ProviderId> {
        while let Some(candidate) = remaining.pop_front() {
            if tried.contains(&candidate) {
                continue;
            }
            if !self.stats.get(&candidate).active {
                debug!(target: "loan_aggregator", "跳过已停用提供商 {}", candidate);
                continue;
            }
            match self.source(&candidate) {
                Some(source) if source.supports(asset) => return Some(candidate),
                _ => {
                    debug!(target: "loan_aggregator", "跳过不支持该资产的提供商 {}", candidate);
                }
            }
        }
        None
    }

    /// 单次尝试，结束后更新该提供商统计
    async fn attempt(
        &self,
        id: &ProviderId,
        asset: Address,
        amount: U256,
        payload: &Bytes,
    ) -> LoanAttempt {
        let skipped = |reason: &str| LoanAttempt {
            provider_id: id.clone(),
            success: false,
            fee_paid: U256::zero(),
            gas_used: U256::zero(),
            reason: Some(reason.to_string()),
        };

        let Some(source) = self.source(id) else {
            return skipped("unknown provider");
        };
        if !self.stats.get(id).active {
            return skipped("inactive");
        }
        if !source.supports(asset) {
            return skipped("unsupported asset");
        }

        let outcome = source.execute(asset, amount, payload).await;
        let now = self.clock.now();

        match outcome {
            Ok(receipt) => {
                self.stats.record_execution(id, true, receipt.gas_used, now);
                LoanAttempt {
                    provider_id: id.clone(),
                    success: true,
                    fee_paid: receipt.fee_paid,
                    gas_used: receipt.gas_used,
                    reason: None,
                }
            }
            Err(e) => {
                // 回滚的交易同样消耗 gas，按预估值计入
                let gas_used = source.estimated_gas();
                self.stats.record_execution(id, false, gas_used, now);
                debug!(target: "loan_aggregator", "提供商 {} 执行失败: {}", id, e);
                LoanAttempt {
                    provider_id: id.clone(),
                    success: false,
                    fee_paid: U256::zero(),
                    gas_used,
                    reason: Some(e.reason()),
                }
            }
        }
    }
}

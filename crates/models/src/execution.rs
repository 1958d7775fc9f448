use chrono::{DateTime, Duration, Utc};
use ethers::types::U256;
use serde::{Deserialize, Serialize};

use crate::ProviderId;

/// 利润模拟结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfitCalculation {
    /// 流动性裁剪后的实际执行金额
    pub suggested_amount: U256,
    /// 整条路径的最终输出
    pub final_amount_out: U256,
    pub gross_profit: U256,
    pub gas_units: U256,
    pub gas_cost: U256,
    pub protocol_fee: U256,
    pub net_profit: U256,
    pub roi_bps: u64,
    pub slippage_bps: u64,
    pub is_profitable: bool,
}

/// 调用方的滚动日亏损状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskState {
    pub daily_loss_accumulated: U256,
    pub window_start_at: DateTime<Utc>,
}

impl RiskState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            daily_loss_accumulated: U256::zero(),
            window_start_at: now,
        }
    }

    /// 窗口过期则清零并从 `now` 重新开始，返回是否发生了重置
    pub fn roll_window(&mut self, now: DateTime<Utc>, window: Duration) -> bool {
        if now - self.window_start_at > window {
            self.daily_loss_accumulated = U256::zero();
            self.window_start_at = now;
            return true;
        }
        false
    }
}

/// 实际交易结果，用于对冲风控预留
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeOutcome {
    Profit(U256),
    Loss(U256),
}

/// 单次闪电贷尝试记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanAttempt {
    pub provider_id: ProviderId,
    pub success: bool,
    pub fee_paid: U256,
    pub gas_used: U256,
    pub reason: Option<String>,
}

/// 意图的终态执行结果，创建后不可变
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub used_provider_id: Option<ProviderId>,
    pub actual_fee: U256,
    pub gas_used: U256,
    /// 结算层报告的实际净利润
    pub realized_profit: U256,
    pub error_reason: Option<String>,
    /// 按顺序记录的闪电贷尝试 (自有资金交易为空)
    pub attempts: Vec<LoanAttempt>,
}

impl ExecutionResult {
    pub fn succeeded(provider: Option<ProviderId>, actual_fee: U256, gas_used: U256) -> Self {
        Self {
            success: true,
            used_provider_id: provider,
            actual_fee,
            gas_used,
            realized_profit: U256::zero(),
            error_reason: None,
            attempts: Vec::new(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            used_provider_id: None,
            actual_fee: U256::zero(),
            gas_used: U256::zero(),
            realized_profit: U256::zero(),
            error_reason: Some(reason.into()),
            attempts: Vec::new(),
        }
    }

    pub fn with_realized_profit(mut self, profit: U256) -> Self {
        self.realized_profit = profit;
        self
    }

    pub fn with_attempts(mut self, attempts: Vec<LoanAttempt>) -> Self {
        self.attempts = attempts;
        self
    }

    /// 失败的尝试次数
    pub fn failed_attempts(&self) -> usize {
        self.attempts.iter().filter(|a| !a.success).count()
    }
}

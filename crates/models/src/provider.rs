use chrono::{DateTime, Utc};
use ethers::types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::BPS_DENOMINATOR;

/// 场所 / 闪电贷提供商标识
///
/// 使用开放的字符串键而非固定枚举，新增提供商无需改动遍历"全部提供商"的调用点。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ProviderId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// 默认优先级 (0-100, 越大越优先)
pub const DEFAULT_PROVIDER_PRIORITY: u8 = 50;

/// 提供商运行统计 (进程级, 按 ProviderId 存储)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub active: bool,
    /// 配置优先级 (0-100)
    pub priority: u8,
    /// 成功率 EMA (0-10000)
    pub success_rate_bps: u32,
    /// gas 消耗 EMA
    pub avg_gas_used: U256,
    pub total_executions: u64,
    pub total_failed: u64,
    pub last_executed_at: Option<DateTime<Utc>>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            active: true,
            priority: DEFAULT_PROVIDER_PRIORITY,
            success_rate_bps: BPS_DENOMINATOR,
            avg_gas_used: U256::zero(),
            total_executions: 0,
            total_failed: 0,
            last_executed_at: None,
        }
    }
}

impl ProviderConfig {
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(100);
        self
    }

    /// 记录一次执行结果，按 9:1 权重更新 EMA
    pub fn record_execution(&mut self, success: bool, gas_used: U256, at: DateTime<Utc>) {
        let observed = if success { BPS_DENOMINATOR } else { 0 };
        self.success_rate_bps = (self.success_rate_bps * 9 + observed) / 10;
        self.avg_gas_used = self
            .avg_gas_used
            .saturating_mul(U256::from(9u64))
            .saturating_add(gas_used)
            / U256::from(10u64);

        self.total_executions += 1;
        if !success {
            self.total_failed += 1;
        }
        self.last_executed_at = Some(at);
    }
}

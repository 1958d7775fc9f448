use anyhow::{bail, ensure, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::env;
use std::str::FromStr;

/// 基点上限
const MAX_BPS: u32 = 10_000;

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub routing: RoutingConfig,
    pub loan: LoanConfig,
    pub simulation: SimulationConfig,
    pub risk: RiskConfig,
}

/// 候选选择策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionCriteria {
    /// 最低费率
    LowestFee,
    /// 最高流动性
    HighestLiquidity,
    /// 最快执行 (最低 gas)
    FastestExecution,
    /// 综合评分
    #[default]
    Balanced,
}

impl SelectionCriteria {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionCriteria::LowestFee => "lowest_fee",
            SelectionCriteria::HighestLiquidity => "highest_liquidity",
            SelectionCriteria::FastestExecution => "fastest_execution",
            SelectionCriteria::Balanced => "balanced",
        }
    }
}

impl FromStr for SelectionCriteria {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "lowest_fee" => Ok(SelectionCriteria::LowestFee),
            "highest_liquidity" => Ok(SelectionCriteria::HighestLiquidity),
            "fastest_execution" => Ok(SelectionCriteria::FastestExecution),
            "balanced" => Ok(SelectionCriteria::Balanced),
            other => bail!("unknown selection criteria: {}", other),
        }
    }
}

/// 兑换路由评分权重 (默认 70/20/10)
#[derive(Debug, Clone, Deserialize)]
pub struct RouteScoreWeights {
    pub amount_out: Decimal,
    pub reliability: Decimal,
    pub gas_efficiency: Decimal,
}

impl Default for RouteScoreWeights {
    fn default() -> Self {
        Self {
            amount_out: dec!(0.70),
            reliability: dec!(0.20),
            gas_efficiency: dec!(0.10),
        }
    }
}

impl RouteScoreWeights {
    pub fn total(&self) -> Decimal {
        self.amount_out + self.reliability + self.gas_efficiency
    }
}

/// 闪电贷评分权重 (默认 费率30 / 流动性25 / 可靠性35 / 优先级10)
#[derive(Debug, Clone, Deserialize)]
pub struct LoanScoreWeights {
    pub fee: Decimal,
    pub liquidity: Decimal,
    pub reliability: Decimal,
    pub priority: Decimal,
}

impl Default for LoanScoreWeights {
    fn default() -> Self {
        Self {
            fee: dec!(0.30),
            liquidity: dec!(0.25),
            reliability: dec!(0.35),
            priority: dec!(0.10),
        }
    }
}

impl LoanScoreWeights {
    pub fn total(&self) -> Decimal {
        self.fee + self.liquidity + self.reliability + self.priority
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
    pub weights: RouteScoreWeights,
    pub selection_criteria: SelectionCriteria,
    /// 单个场所报价超时 (毫秒)
    pub quote_timeout_ms: u64,
    /// 整轮报价扇出的总预算 (毫秒)
    pub quote_budget_ms: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            weights: RouteScoreWeights::default(),
            selection_criteria: SelectionCriteria::Balanced,
            quote_timeout_ms: 800,
            quote_budget_ms: 1500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoanConfig {
    pub weights: LoanScoreWeights,
    pub selection_criteria: SelectionCriteria,
    /// 主提供商失败后最多尝试的备用提供商数量
    pub max_fallback_attempts: usize,
    /// 备用顺序 (为空时按费率升序)
    pub fallback_order: Vec<String>,
    pub quote_timeout_ms: u64,
}

impl Default for LoanConfig {
    fn default() -> Self {
        Self {
            weights: LoanScoreWeights::default(),
            selection_criteria: SelectionCriteria::Balanced,
            max_fallback_attempts: 3,
            fallback_order: Vec::new(),
            quote_timeout_ms: 800,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    /// 单池最大占用比例 (基点, 2000 = 20%)
    pub max_pool_percentage_bps: u32,
    /// 全局最大滑点 (基点)，与意图自身的上限取较小值
    pub max_slippage_bps: u32,
    /// 最低净利润 (输入代币最小单位)
    pub min_profit_threshold: u128,
    /// 协议费 (基点)
    pub protocol_fee_bps: u32,
    /// gas 价格 (以输入代币最小单位计价)
    pub gas_price: u128,
    pub base_gas: u64,
    pub per_hop_gas: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            max_pool_percentage_bps: 2000,
            max_slippage_bps: 100,
            min_profit_threshold: 0,
            protocol_fee_bps: 0,
            gas_price: 0,
            base_gas: 21_000,
            per_hop_gas: 150_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    /// 闪电贷交易单笔最大亏损 (名义金额的基点, 500 = 5%)
    pub max_single_trade_loss_bps: u32,
    /// 自有资金交易单笔最大亏损 (基点, 1000 = 10%)
    pub self_funded_trade_loss_bps: u32,
    /// 每日最大累计亏损 (输入代币最小单位)
    pub max_daily_loss: u128,
    /// 滚动窗口长度 (秒)
    pub window_secs: i64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_single_trade_loss_bps: 500,
            self_funded_trade_loss_bps: 1000,
            max_daily_loss: 1_000_000_000_000_000_000,
            window_secs: 24 * 3600,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            routing: RoutingConfig::default(),
            loan: LoanConfig::default(),
            simulation: SimulationConfig::default(),
            risk: RiskConfig::default(),
        }
    }
}

/// 读取环境变量，缺失时使用默认值，格式错误时报错
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Invalid {}", key)),
        _ => Ok(default),
    }
}

impl EngineConfig {
    /// 从 .env 与环境变量加载配置
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let defaults = EngineConfig::default();

        let routing = RoutingConfig {
            weights: RouteScoreWeights {
                amount_out: env_or("ROUTE_WEIGHT_AMOUNT_OUT", defaults.routing.weights.amount_out)?,
                reliability: env_or("ROUTE_WEIGHT_RELIABILITY", defaults.routing.weights.reliability)?,
                gas_efficiency: env_or("ROUTE_WEIGHT_GAS", defaults.routing.weights.gas_efficiency)?,
            },
            selection_criteria: env_or("ROUTE_SELECTION_CRITERIA", defaults.routing.selection_criteria)?,
            quote_timeout_ms: env_or("QUOTE_TIMEOUT_MS", defaults.routing.quote_timeout_ms)?,
            quote_budget_ms: env_or("QUOTE_BUDGET_MS", defaults.routing.quote_budget_ms)?,
        };

        // 备用顺序 (逗号分隔, 例如: "balancer,aave_v3")
        let fallback_order: Vec<String> = env::var("FALLBACK_ORDER")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let loan = LoanConfig {
            weights: LoanScoreWeights {
                fee: env_or("LOAN_WEIGHT_FEE", defaults.loan.weights.fee)?,
                liquidity: env_or("LOAN_WEIGHT_LIQUIDITY", defaults.loan.weights.liquidity)?,
                reliability: env_or("LOAN_WEIGHT_RELIABILITY", defaults.loan.weights.reliability)?,
                priority: env_or("LOAN_WEIGHT_PRIORITY", defaults.loan.weights.priority)?,
            },
            selection_criteria: env_or("LOAN_SELECTION_CRITERIA", defaults.loan.selection_criteria)?,
            max_fallback_attempts: env_or("MAX_FALLBACK_ATTEMPTS", defaults.loan.max_fallback_attempts)?,
            fallback_order,
            quote_timeout_ms: env_or("LOAN_QUOTE_TIMEOUT_MS", defaults.loan.quote_timeout_ms)?,
        };

        let simulation = SimulationConfig {
            max_pool_percentage_bps: env_or(
                "MAX_POOL_PERCENTAGE_BPS",
                defaults.simulation.max_pool_percentage_bps,
            )?,
            max_slippage_bps: env_or("MAX_SLIPPAGE_BPS", defaults.simulation.max_slippage_bps)?,
            min_profit_threshold: env_or(
                "MIN_PROFIT_THRESHOLD",
                defaults.simulation.min_profit_threshold,
            )?,
            protocol_fee_bps: env_or("PROTOCOL_FEE_BPS", defaults.simulation.protocol_fee_bps)?,
            gas_price: env_or("GAS_PRICE", defaults.simulation.gas_price)?,
            base_gas: env_or("BASE_GAS", defaults.simulation.base_gas)?,
            per_hop_gas: env_or("PER_HOP_GAS", defaults.simulation.per_hop_gas)?,
        };

        let risk = RiskConfig {
            max_single_trade_loss_bps: env_or(
                "MAX_SINGLE_TRADE_LOSS_BPS",
                defaults.risk.max_single_trade_loss_bps,
            )?,
            self_funded_trade_loss_bps: env_or(
                "SELF_FUNDED_TRADE_LOSS_BPS",
                defaults.risk.self_funded_trade_loss_bps,
            )?,
            max_daily_loss: env_or("MAX_DAILY_LOSS", defaults.risk.max_daily_loss)?,
            window_secs: env_or("RISK_WINDOW_SECS", defaults.risk.window_secs)?,
        };

        let config = Self {
            routing,
            loan,
            simulation,
            risk,
        };
        config.validate()?;
        Ok(config)
    }

    /// 校验取值范围
    pub fn validate(&self) -> Result<()> {
        let bps_fields = [
            ("max_pool_percentage_bps", self.simulation.max_pool_percentage_bps),
            ("max_slippage_bps", self.simulation.max_slippage_bps),
            ("protocol_fee_bps", self.simulation.protocol_fee_bps),
            ("max_single_trade_loss_bps", self.risk.max_single_trade_loss_bps),
            ("self_funded_trade_loss_bps", self.risk.self_funded_trade_loss_bps),
        ];
        for (name, value) in bps_fields {
            ensure!(value <= MAX_BPS, "{} out of range: {}", name, value);
        }

        let route_weights = &self.routing.weights;
        ensure!(
            route_weights.amount_out >= Decimal::ZERO
                && route_weights.reliability >= Decimal::ZERO
                && route_weights.gas_efficiency >= Decimal::ZERO,
            "route weights must be non-negative"
        );
        ensure!(route_weights.total() > Decimal::ZERO, "route weights sum to zero");

        let loan_weights = &self.loan.weights;
        ensure!(
            loan_weights.fee >= Decimal::ZERO
                && loan_weights.liquidity >= Decimal::ZERO
                && loan_weights.reliability >= Decimal::ZERO
                && loan_weights.priority >= Decimal::ZERO,
            "loan weights must be non-negative"
        );
        ensure!(loan_weights.total() > Decimal::ZERO, "loan weights sum to zero");

        ensure!(self.risk.window_secs > 0, "risk window must be positive");
        ensure!(self.routing.quote_budget_ms > 0, "quote budget must be positive");

        Ok(())
    }
}

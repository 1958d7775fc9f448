use std::fs;
use std::path::Path;
use time::macros::offset;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::filter::{FilterFn, LevelFilter};
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// 引擎各组件使用的日志 target
pub const LOG_TARGETS: [&str; 5] = [
    "route_optimizer",
    "loan_aggregator",
    "profit_simulator",
    "risk_governor",
    "intent_execution",
];

fn is_routing(target: &str) -> bool {
    matches!(target, "route_optimizer" | "loan_aggregator")
}

fn is_execution(target: &str) -> bool {
    matches!(target, "intent_execution" | "profit_simulator")
}

/// 日志管理器 - 基于 target 分类的日志系统
pub struct LoggerManager {
    _guards: Vec<non_blocking::WorkerGuard>,
}

impl LoggerManager {
    /// 初始化日志系统 (写入 ./logs)
    ///
    /// 日志分类：
    /// - engine.log: 通用日志
    /// - routing.log: 路由与闪电贷选择
    /// - risk.log: 风控
    /// - execution.log: 意图执行与利润模拟
    ///
    /// 已存在全局订阅器时保持现状，只返回空的管理器。
    pub fn init() -> Self {
        Self::try_init("logs").unwrap_or(Self { _guards: Vec::new() })
    }

    /// 在指定目录初始化日志系统
    pub fn try_init(log_dir: impl AsRef<Path>) -> Result<Self, TryInitError> {
        let log_dir = log_dir.as_ref();
        let mut guards = Vec::new();

        // 创建日志目录
        fs::create_dir_all(log_dir).ok();

        // 配置时区为东八区 (UTC+8 上海时间)
        let timer = OffsetTime::new(
            offset!(+8),
            time::format_description::well_known::Rfc3339,
        );

        // 1. 控制台输出
        let console_layer = fmt::layer()
            .compact()
            .with_target(true)
            .with_timer(timer.clone())
            .with_filter(LevelFilter::INFO);

        // 2. 通用日志 (engine.log)
        let (engine_writer, engine_guard) = non_blocking(rolling::daily(log_dir, "engine.log"));
        guards.push(engine_guard);

        let engine_layer = fmt::layer()
            .compact()
            .with_writer(engine_writer)
            .with_ansi(false)
            .with_target(true)
            .with_timer(timer.clone())
            .with_filter(LevelFilter::INFO)
            .with_filter(FilterFn::new(|metadata| {
                !LOG_TARGETS.contains(&metadata.target())
            }));

        // 3. 路由日志 (routing.log)
        let (routing_writer, routing_guard) = non_blocking(rolling::daily(log_dir, "routing.log"));
        guards.push(routing_guard);

        let routing_layer = fmt::layer()
            .compact()
            .with_writer(routing_writer)
            .with_ansi(false)
            .with_target(true)
            .with_timer(timer.clone())
            .with_filter(FilterFn::new(|metadata| is_routing(metadata.target())));

        // 4. 风控日志 (risk.log)
        let (risk_writer, risk_guard) = non_blocking(rolling::daily(log_dir, "risk.log"));
        guards.push(risk_guard);

        let risk_layer = fmt::layer()
            .compact()
            .with_writer(risk_writer)
            .with_ansi(false)
            .with_target(true)
            .with_timer(timer.clone())
            .with_filter(FilterFn::new(|metadata| metadata.target() == "risk_governor"));

        // 5. 执行日志 (execution.log)
        let (execution_writer, execution_guard) =
            non_blocking(rolling::daily(log_dir, "execution.log"));
        guards.push(execution_guard);

        let execution_layer = fmt::layer()
            .compact()
            .with_writer(execution_writer)
            .with_ansi(false)
            .with_target(true)
            .with_timer(timer)
            .with_filter(FilterFn::new(|metadata| is_execution(metadata.target())));

        tracing_subscriber::registry()
            .with(console_layer)
            .with(engine_layer)
            .with(routing_layer)
            .with(risk_layer)
            .with(execution_layer)
            .try_init()?;

        Ok(Self { _guards: guards })
    }
}

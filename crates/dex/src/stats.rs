//! 提供商运行统计存储
//!
//! 场所与闪电贷提供商共用同一个按 ProviderId 分键的存储。所有修改都经由 `update`，
//! 实现方必须保证同一个键上的读-改-写是串行的 (单键单写者)，否则并发结束的意图会丢失更新。

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ethers::types::U256;
use models::{ProviderConfig, ProviderId};
use std::sync::Arc;

pub trait ProviderStatsStore: Send + Sync {
    /// 读取统计，未登记的提供商返回默认值
    fn get(&self, id: &ProviderId) -> ProviderConfig;

    /// 登记或覆盖提供商配置
    fn register(&self, id: ProviderId, config: ProviderConfig);

    /// 在键锁内修改统计并返回修改后的副本
    fn update(&self, id: &ProviderId, f: &mut dyn FnMut(&mut ProviderConfig)) -> ProviderConfig;

    fn snapshot(&self) -> Vec<(ProviderId, ProviderConfig)>;

    fn set_active(&self, id: &ProviderId, active: bool) -> ProviderConfig {
        self.update(id, &mut |cfg| cfg.active = active)
    }

    fn record_execution(
        &self,
        id: &ProviderId,
        success: bool,
        gas_used: U256,
        at: DateTime<Utc>,
    ) -> ProviderConfig {
        self.update(id, &mut |cfg| cfg.record_execution(success, gas_used, at))
    }
}

pub type SharedStatsStore = Arc<dyn ProviderStatsStore>;

/// 内存实现
#[derive(Debug, Default)]
pub struct InMemoryProviderStats {
    configs: DashMap<ProviderId, ProviderConfig>,
}

impl InMemoryProviderStats {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProviderStatsStore for InMemoryProviderStats {
    fn get(&self, id: &ProviderId) -> ProviderConfig {
        self.configs
            .get(id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    fn register(&self, id: ProviderId, config: ProviderConfig) {
        self.configs.insert(id, config);
    }

    fn update(&self, id: &ProviderId, f: &mut dyn FnMut(&mut ProviderConfig)) -> ProviderConfig {
        // entry 持有分片写锁，整个读-改-写在锁内完成
        let mut entry = self.configs.entry(id.clone()).or_default();
        f(entry.value_mut());
        entry.value().clone()
    }

    fn snapshot(&self) -> Vec<(ProviderId, ProviderConfig)> {
        let mut all: Vec<_> = self
            .configs
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

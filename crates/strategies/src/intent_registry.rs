use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ethers::types::H256;
use serde::Serialize;
use std::sync::Arc;

/// 已登记意图的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IntentStatus {
    /// 已通过校验，执行中
    InFlight,
    Completed,
    Rejected,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentRecord {
    pub status: IntentStatus,
    pub recorded_at: DateTime<Utc>,
    /// 意图的截止时间，过后重复提交只会以过期结束
    pub deadline: DateTime<Utc>,
}

/// 已执行意图登记表，用于拒绝重复提交
pub trait IntentRegistry: Send + Sync {
    fn contains(&self, id: &H256) -> bool;

    /// 原子的"不存在则插入"，返回是否由本次调用插入
    fn try_record(&self, id: H256, at: DateTime<Utc>, deadline: DateTime<Utc>) -> bool;

    fn finalize(&self, id: &H256, status: IntentStatus);

    fn status(&self, id: &H256) -> Option<IntentStatus>;

    /// 清理已结束且截止时间早于 `now` 的记录，返回清理数量
    fn prune_expired(&self, now: DateTime<Utc>) -> usize;
}

pub type SharedIntentRegistry = Arc<dyn IntentRegistry>;

#[derive(Debug, Default)]
pub struct InMemoryIntentRegistry {
    records: DashMap<H256, IntentRecord>,
}

impl InMemoryIntentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl IntentRegistry for InMemoryIntentRegistry {
    fn contains(&self, id: &H256) -> bool {
        self.records.contains_key(id)
    }

    fn try_record(&self, id: H256, at: DateTime<Utc>, deadline: DateTime<Utc>) -> bool {
        match self.records.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(IntentRecord {
                    status: IntentStatus::InFlight,
                    recorded_at: at,
                    deadline,
                });
                true
            }
        }
    }

    fn finalize(&self, id: &H256, status: IntentStatus) {
        if let Some(mut record) = self.records.get_mut(id) {
            record.status = status;
        }
    }

    fn status(&self, id: &H256) -> Option<IntentStatus> {
        self.records.get(id).map(|record| record.status)
    }

    fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| {
            record.status == IntentStatus::InFlight || record.deadline >= now
        });
        before.saturating_sub(self.records.len())
    }
}

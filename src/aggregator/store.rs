// src/aggregator/store.rs

use std::collections::HashMap;

use crate::error::Anomaly;
use crate::model::record::AuctionRecord;

/// **拍卖记录存储**
///
/// auctionId → AuctionRecord。记录在 flush 之后也保留，直到聚合器被丢弃。
/// 并发访问由外层 `Aggregator` 的互斥锁保证。
#[derive(Debug, Default)]
pub struct AuctionStore {
    records: HashMap<String, AuctionRecord>,
}

impl AuctionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建记录；同一个 auctionId 重复创建时保留原记录
    pub fn create(&mut self, record: AuctionRecord) -> Result<&mut AuctionRecord, Anomaly> {
        use std::collections::hash_map::Entry;
        match self.records.entry(record.auction_id.clone()) {
            Entry::Occupied(entry) => Err(Anomaly::DuplicateInit { auction_id: entry.key().clone() }),
            Entry::Vacant(entry) => Ok(entry.insert(record)),
        }
    }

    pub fn get(&self, auction_id: &str) -> Option<&AuctionRecord> {
        self.records.get(auction_id)
    }

    /// 查找记录，不存在时返回 UnknownAuction
    pub fn require_mut(&mut self, auction_id: &str) -> Result<&mut AuctionRecord, Anomaly> {
        self.records
            .get_mut(auction_id)
            .ok_or_else(|| Anomaly::UnknownAuction { auction_id: auction_id.to_string() })
    }

    pub fn snapshot(&self) -> HashMap<String, AuctionRecord> {
        self.records.clone()
    }
}

// src/aggregator/completion.rs

use std::collections::{BTreeSet, HashMap};
use tokio::task::AbortHandle;

use crate::error::Anomaly;

/// 每个拍卖的完成状态：Pending → AwaitingWins → Flushed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pending,
    AwaitingWins,
    Flushed,
}

#[derive(Debug)]
struct Completion {
    phase: Phase,
    declared: BTreeSet<String>, // 拍卖声明的全部广告位
    won: BTreeSet<String>,      // 已收到 bidWon 的广告位
    deadline: Option<AbortHandle>,
}

/// **完成状态表**
///
/// 以 auctionId 为键记录等待中的广告位集合和宽限期定时器，
/// 不依赖闭包，可以单独测试。
#[derive(Debug, Default)]
pub struct CompletionTracker {
    table: HashMap<String, Completion>,
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 拍卖初始化时登记为 Pending，重复登记不改变已有状态
    pub fn register(&mut self, auction_id: &str) {
        self.table.entry(auction_id.to_string()).or_insert_with(|| Completion {
            phase: Phase::Pending,
            declared: BTreeSet::new(),
            won: BTreeSet::new(),
            deadline: None,
        });
    }

    pub fn phase(&self, auction_id: &str) -> Option<Phase> {
        self.table.get(auction_id).map(|c| c.phase)
    }

    /// auctionEnd：Pending → AwaitingWins
    pub fn begin_awaiting<I>(&mut self, auction_id: &str, declared: I) -> Result<(), Anomaly>
    where
        I: IntoIterator<Item = String>,
    {
        let completion = self
            .table
            .get_mut(auction_id)
            .ok_or_else(|| Anomaly::UnknownAuction { auction_id: auction_id.to_string() })?;
        match completion.phase {
            Phase::Pending => {
                completion.phase = Phase::AwaitingWins;
                completion.declared = declared.into_iter().collect();
                Ok(())
            }
            Phase::AwaitingWins => Err(Anomaly::DuplicateEnd { auction_id: auction_id.to_string() }),
            Phase::Flushed => Err(Anomaly::AlreadyFlushed { auction_id: auction_id.to_string() }),
        }
    }

    /// 记录宽限期定时器，只在 AwaitingWins 阶段保存；其它阶段直接取消
    pub fn arm_deadline(&mut self, auction_id: &str, handle: AbortHandle) {
        match self.table.get_mut(auction_id) {
            Some(completion) if completion.phase == Phase::AwaitingWins => {
                if let Some(previous) = completion.deadline.replace(handle) {
                    previous.abort();
                }
            }
            _ => handle.abort(),
        }
    }

    /// 某个广告位收到 bidWon。返回 true 表示所有声明的广告位都已覆盖，可以提前 flush。
    /// auctionEnd 之前的 bidWon 不参与计数。
    pub fn mark_won(&mut self, auction_id: &str, ad_unit_code: &str) -> bool {
        let Some(completion) = self.table.get_mut(auction_id) else {
            return false;
        };
        if completion.phase != Phase::AwaitingWins {
            return false;
        }
        completion.won.insert(ad_unit_code.to_string());
        completion.declared.is_subset(&completion.won)
    }

    /// 进入 Flushed，释放等待状态。返回仍在等待的定时器，由调用方决定是否取消
    pub fn close(&mut self, auction_id: &str) -> Option<AbortHandle> {
        let completion = self.table.get_mut(auction_id)?;
        completion.phase = Phase::Flushed;
        completion.declared.clear();
        completion.won.clear();
        completion.deadline.take()
    }
}

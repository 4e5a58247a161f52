// src/aggregator/engine.rs

use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, error, warn};

use crate::aggregator::completion::{CompletionTracker, Phase};
use crate::aggregator::merge::{RequestedPatch, ResponsePatch, TimeoutPatch, WonPatch};
use crate::aggregator::store::AuctionStore;
use crate::config::config_manager::ConfigManager;
use crate::delivery::sink::{DeliverySink, LateWinReport};
use crate::error::Anomaly;
use crate::logging::report_logger::{ReportKind, ReportLogger};
use crate::model::events::{
    AuctionEndArgs, AuctionInitArgs, BidRequestedArgs, BidResponseArgs, BidTimeoutEntry, BidWonArgs,
    LifecycleEvent,
};
use crate::model::metadata::capture;
use crate::model::record::{AdUnitRecord, AuctionRecord, AuctionStatus, BidRecord};

#[derive(Debug, Default)]
struct AggregatorState {
    store: AuctionStore,
    tracker: CompletionTracker,
}

/// finalize 的结果，在释放锁之后再投递
struct Flushed {
    record: AuctionRecord,
    deadline: Option<AbortHandle>,
}

struct Inner {
    state: Mutex<AggregatorState>,
    config: Arc<ConfigManager>,
    sink: Arc<dyn DeliverySink>,
    reports: Option<Arc<ReportLogger>>,
}

/// **拍卖事件聚合器**
///
/// 每个事件在锁内同步处理完毕，不会等待 I/O。
/// 宽限期定时器是一个 tokio 任务，提前完成时被取消；
/// 两条路径同时到达时由 `flushed` 标记保证只投递一次。
#[derive(Clone)]
pub struct Aggregator {
    inner: Arc<Inner>,
}

impl Aggregator {
    pub fn new(
        config: Arc<ConfigManager>,
        sink: Arc<dyn DeliverySink>,
        reports: Option<Arc<ReportLogger>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(AggregatorState::default()),
                config,
                sink,
                reports,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AggregatorState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 事件总线入口，返回本次处理中记录下来的异常（已写日志）
    pub fn track(&self, event: &LifecycleEvent) -> Vec<Anomaly> {
        debug!(event = event.name(), "tracking lifecycle event");
        match event {
            LifecycleEvent::AuctionInit(args) => self.on_auction_init(args),
            LifecycleEvent::BidRequested(args) => self.on_bid_requested(args),
            LifecycleEvent::BidResponse(args) => self.on_bid_response(args),
            LifecycleEvent::BidWon(args) => self.on_bid_won(args),
            LifecycleEvent::BidTimeout(entries) => self.on_bid_timeout(entries),
            LifecycleEvent::AuctionEnd(args) => self.on_auction_end(args),
        }
    }

    pub fn on_auction_init(&self, args: &AuctionInitArgs) -> Vec<Anomaly> {
        let metadata = capture(&args.page.clone().unwrap_or_default());
        let mut record = AuctionRecord::new(
            &args.auction_id,
            args.timestamp,
            args.timeout,
            self.inner.config.site(),
            metadata,
        );
        for unit in &args.ad_units {
            record.ad_units.entry(unit.code.clone()).or_insert_with(|| AdUnitRecord {
                media_types: unit.media_types.keys().cloned().collect(),
                bids: Vec::new(),
            });
        }

        let mut anomalies = Vec::new();
        for bid in args.bidder_requests.iter().flat_map(|r| r.bids.iter()) {
            let Some(unit) = record.ad_units.get_mut(&bid.ad_unit_code) else {
                anomalies.push(Anomaly::UnknownAdUnit {
                    auction_id: args.auction_id.clone(),
                    ad_unit_code: bid.ad_unit_code.clone(),
                });
                continue;
            };
            // 同一个 requestId 只保留第一次出现
            if unit.find_bid(&bid.request_id).is_none() {
                unit.bids.push(BidRecord::seed(&bid.bidder, bid.params.clone(), &bid.request_id));
            }
        }

        let created = {
            let mut state = self.lock();
            let created = state.store.create(record).map(|_| ());
            if created.is_ok() {
                state.tracker.register(&args.auction_id);
            }
            created
        };
        if let Err(duplicate) = created {
            anomalies = vec![duplicate];
        }
        self.observe(anomalies)
    }

    pub fn on_bid_requested(&self, args: &BidRequestedArgs) -> Vec<Anomaly> {
        let now = Utc::now().timestamp_millis();
        let mut anomalies = Vec::new();
        {
            let mut state = self.lock();
            match require_open(&mut state.store, &args.auction_id) {
                Err(anomaly) => anomalies.push(anomaly),
                Ok(record) => {
                    for bid in &args.bids {
                        match locate(record, &bid.ad_unit_code, &bid.request_id) {
                            Ok(existing) => existing.apply_requested(RequestedPatch::from_event(bid, now)),
                            Err(anomaly) => anomalies.push(anomaly),
                        }
                    }
                }
            }
        }
        self.observe(anomalies)
    }

    pub fn on_bid_response(&self, args: &BidResponseArgs) -> Vec<Anomaly> {
        let merged = {
            let mut state = self.lock();
            require_open(&mut state.store, &args.auction_id)
                .and_then(|record| locate(record, &args.ad_unit_code, &args.request_id))
                .map(|existing| existing.apply_response(ResponsePatch::from(args)))
        };
        self.observe(merged.err().into_iter().collect())
    }

    pub fn on_bid_won(&self, args: &BidWonArgs) -> Vec<Anomaly> {
        let merged = {
            let mut state = self.lock();
            merge_win(&mut state, args)
        };
        match merged {
            Ok(Some(flushed)) => {
                self.complete(flushed, false);
                Vec::new()
            }
            Ok(None) => Vec::new(),
            Err(anomaly) => {
                if let Anomaly::LateWin { auction_id, ad_unit_code, request_id } = &anomaly {
                    self.inner.sink.report_late_win(&LateWinReport {
                        auction_id: auction_id.clone(),
                        ad_unit_code: ad_unit_code.clone(),
                        request_id: request_id.clone(),
                        received_at: Utc::now().timestamp_millis(),
                    });
                }
                self.observe(vec![anomaly])
            }
        }
    }

    pub fn on_bid_timeout(&self, entries: &[BidTimeoutEntry]) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();
        {
            let mut state = self.lock();
            for entry in entries {
                let merged = require_open(&mut state.store, &entry.auction_id)
                    .and_then(|record| locate(record, &entry.ad_unit_code, &entry.request_id))
                    .map(|existing| existing.apply_timeout(TimeoutPatch::from(entry)));
                if let Err(anomaly) = merged {
                    anomalies.push(anomaly);
                }
            }
        }
        self.observe(anomalies)
    }

    /// auctionEnd：进入 AwaitingWins 并启动宽限期定时器
    pub fn on_auction_end(&self, args: &AuctionEndArgs) -> Vec<Anomaly> {
        let now = Utc::now().timestamp_millis();
        let grace = self.inner.config.flush_timeout();
        let mut state = self.lock();
        if let Err(anomaly) = close_bidding(&mut state, args, now) {
            drop(state);
            return self.observe(vec![anomaly]);
        }

        match Handle::try_current() {
            Ok(handle) => {
                let aggregator = self.clone();
                let auction_id = args.auction_id.clone();
                let task = handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    aggregator.finalize(&auction_id, true);
                });
                state.tracker.arm_deadline(&args.auction_id, task.abort_handle());
                Vec::new()
            }
            Err(_) => {
                drop(state);
                let mut anomalies = self.observe(vec![Anomaly::NoRuntime { auction_id: args.auction_id.clone() }]);
                anomalies.extend(self.finalize(&args.auction_id, true));
                anomalies
            }
        }
    }

    /// 结束拍卖并投递。记录不存在或已经 flush 时什么也不做
    pub fn finalize(&self, auction_id: &str, timeout_reached: bool) -> Vec<Anomaly> {
        let flushed = {
            let mut state = self.lock();
            finalize_locked(&mut state, auction_id, timeout_reached)
        };
        match flushed {
            Ok(flushed) => {
                self.complete(flushed, timeout_reached);
                Vec::new()
            }
            Err(anomaly) => self.observe(vec![anomaly]),
        }
    }

    fn complete(&self, flushed: Flushed, timeout_reached: bool) {
        if !timeout_reached {
            if let Some(deadline) = flushed.deadline {
                deadline.abort();
            }
        }
        self.inner.sink.deliver(&flushed.record);
    }

    pub fn auction(&self, auction_id: &str) -> Option<AuctionRecord> {
        self.lock().store.get(auction_id).cloned()
    }

    pub fn auctions(&self) -> HashMap<String, AuctionRecord> {
        self.lock().store.snapshot()
    }

    pub fn phase(&self, auction_id: &str) -> Option<Phase> {
        self.lock().tracker.phase(auction_id)
    }

    fn observe(&self, anomalies: Vec<Anomaly>) -> Vec<Anomaly> {
        for anomaly in &anomalies {
            let auction_id = anomaly.auction_id();
            if anomaly.is_error() {
                error!(auction_id, kind = anomaly.kind(), "{}", anomaly);
            } else {
                warn!(auction_id, kind = anomaly.kind(), "{}", anomaly);
            }
            if let Some(reports) = &self.inner.reports {
                reports.report(
                    ReportKind::Anomaly,
                    json!({
                        "kind": anomaly.kind(),
                        "auctionId": auction_id,
                        "message": anomaly.to_string(),
                    }),
                );
            }
        }
        anomalies
    }
}

/// 已 flush 的记录不再接受补丁
fn require_open<'a>(store: &'a mut AuctionStore, auction_id: &str) -> Result<&'a mut AuctionRecord, Anomaly> {
    let record = store.require_mut(auction_id)?;
    if record.flushed {
        return Err(Anomaly::AlreadyFlushed { auction_id: auction_id.to_string() });
    }
    Ok(record)
}

fn locate<'a>(
    record: &'a mut AuctionRecord,
    ad_unit_code: &str,
    request_id: &str,
) -> Result<&'a mut BidRecord, Anomaly> {
    let auction_id = record.auction_id.clone();
    let unit = record.ad_units.get_mut(ad_unit_code).ok_or_else(|| Anomaly::UnknownAdUnit {
        auction_id: auction_id.clone(),
        ad_unit_code: ad_unit_code.to_string(),
    })?;
    unit.find_bid_mut(request_id).ok_or_else(|| Anomaly::UnknownBid {
        auction_id,
        ad_unit_code: ad_unit_code.to_string(),
        request_id: request_id.to_string(),
    })
}

fn merge_win(state: &mut AggregatorState, args: &BidWonArgs) -> Result<Option<Flushed>, Anomaly> {
    let record = state.store.require_mut(&args.auction_id)?;
    if record.flushed {
        return Err(Anomaly::LateWin {
            auction_id: args.auction_id.clone(),
            ad_unit_code: args.ad_unit_code.clone(),
            request_id: args.request_id.clone(),
        });
    }
    locate(record, &args.ad_unit_code, &args.request_id)?.apply_won(WonPatch::from(args));
    if state.tracker.mark_won(&args.auction_id, &args.ad_unit_code) {
        return finalize_locked(state, &args.auction_id, false).map(Some);
    }
    Ok(None)
}

fn close_bidding(state: &mut AggregatorState, args: &AuctionEndArgs, now: i64) -> Result<(), Anomaly> {
    let record = require_open(&mut state.store, &args.auction_id)?;
    state.tracker.begin_awaiting(&args.auction_id, record.ad_unit_codes())?;
    record.end_time = Some(now);
    if args.timeout.is_some() {
        record.timeout = args.timeout;
    }
    record.status = AuctionStatus::Ended;
    Ok(())
}

fn finalize_locked(state: &mut AggregatorState, auction_id: &str, timeout_reached: bool) -> Result<Flushed, Anomaly> {
    let record = state.store.require_mut(auction_id)?;
    if record.flushed {
        return Err(Anomaly::AlreadyFlushed { auction_id: auction_id.to_string() });
    }
    record.timeout_reached = timeout_reached;
    record.flushed = true;
    let record = record.clone();
    let deadline = state.tracker.close(auction_id);
    Ok(Flushed { record, deadline })
}

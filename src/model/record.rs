// src/model/record.rs

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::model::metadata::MetadataSnapshot;

/// 拍卖状态（flushed 是独立的标记，不在这里）
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuctionStatus {
    Started,
    Ended,
}

/// 单个 Bid 的状态：requested → responded → {won | timeout}
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BidStatus {
    Requested,
    Responded,
    Won,
    Timeout,
}

/// 底价诊断信息（floorData），原样上报
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct FloorData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floor_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floor_rule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floor_currency: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub matched_fields: BTreeMap<String, Value>,
    /// 其余诊断字段（floorRuleValue、enforcements、fetchStatus 等）原样保留
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 广告服务器定向信息，只保留 hb_pb / hb_bidder / hb_deal 三项
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct AdServerTargeting {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hb_pb: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hb_bidder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hb_deal: Option<String>,
}

/// **单个出价记录**
///
/// 以 `request_id` 为键，字段随生命周期事件逐步补齐。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BidRecord {
    pub bidder: String,
    #[serde(default)]
    pub params: Value,
    pub request_id: String,

    // bidRequested
    #[serde(default, rename = "isS2S", skip_serializing_if = "Option::is_none")]
    pub is_s2s: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Vec<[u32; 2]>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_requested: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<BidStatus>,

    // bidResponse
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_cpm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_revenue: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creative_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttr: Option<u64>, // 响应耗时（毫秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deal_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floor_data: Option<FloorData>,

    // bidWon
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad_server_targeting: Option<AdServerTargeting>,

    // bidTimeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl BidRecord {
    /// 拍卖初始化时创建，只带 bidder / params / requestId
    pub fn seed(bidder: &str, params: Value, request_id: &str) -> Self {
        Self {
            bidder: bidder.to_string(),
            params,
            request_id: request_id.to_string(),
            is_s2s: None,
            alias: None,
            size: None,
            time_requested: None,
            status: None,
            cpm: None,
            original_cpm: None,
            currency: None,
            net_revenue: None,
            creative_id: None,
            ttr: None,
            width: None,
            height: None,
            ttl: None,
            media_type: None,
            deal_id: None,
            ad_id: None,
            floor_data: None,
            ad_server_targeting: None,
            timeout: None,
        }
    }
}

/// 广告位记录：媒体类型在初始化时固定，bids 集合也不再增长
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AdUnitRecord {
    pub media_types: Vec<String>,
    pub bids: Vec<BidRecord>,
}

impl AdUnitRecord {
    pub fn find_bid(&self, request_id: &str) -> Option<&BidRecord> {
        self.bids.iter().find(|b| b.request_id == request_id)
    }

    pub fn find_bid_mut(&mut self, request_id: &str) -> Option<&mut BidRecord> {
        self.bids.iter_mut().find(|b| b.request_id == request_id)
    }
}

/// **拍卖聚合记录**，flush 时整体序列化上报
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuctionRecord {
    pub auction_id: String,
    pub start_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub timeout_reached: bool,
    pub status: AuctionStatus,
    #[serde(default)]
    pub site: Option<String>,
    pub metadata: MetadataSnapshot,
    pub ad_units: BTreeMap<String, AdUnitRecord>,
    #[serde(default)]
    pub flushed: bool,
}

impl AuctionRecord {
    pub fn new(
        auction_id: &str,
        start_time: i64,
        timeout: Option<u64>,
        site: Option<String>,
        metadata: MetadataSnapshot,
    ) -> Self {
        Self {
            auction_id: auction_id.to_string(),
            start_time,
            end_time: None,
            timeout,
            timeout_reached: false,
            status: AuctionStatus::Started,
            site,
            metadata,
            ad_units: BTreeMap::new(),
            flushed: false,
        }
    }

    pub fn ad_unit_codes(&self) -> Vec<String> {
        self.ad_units.keys().cloned().collect()
    }
}

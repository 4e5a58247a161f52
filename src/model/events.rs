// src/model/events.rs

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::model::metadata::PageEnvironment;
use crate::model::record::FloorData;

/// 宿主事件总线投递的事件，格式为 `{ "eventType": ..., "args": ... }`
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "eventType", content = "args", rename_all = "camelCase")]
pub enum LifecycleEvent {
    AuctionInit(AuctionInitArgs),
    BidRequested(BidRequestedArgs),
    BidResponse(BidResponseArgs),
    BidWon(BidWonArgs),
    BidTimeout(Vec<BidTimeoutEntry>),
    AuctionEnd(AuctionEndArgs),
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::AuctionInit(_) => "auctionInit",
            LifecycleEvent::BidRequested(_) => "bidRequested",
            LifecycleEvent::BidResponse(_) => "bidResponse",
            LifecycleEvent::BidWon(_) => "bidWon",
            LifecycleEvent::BidTimeout(_) => "bidTimeout",
            LifecycleEvent::AuctionEnd(_) => "auctionEnd",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AuctionInitArgs {
    pub auction_id: String,
    pub timestamp: i64,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub ad_units: Vec<AdUnitDecl>,
    #[serde(default)]
    pub bidder_requests: Vec<BidderRequest>,
    /// 页面环境；缺省时由接入层补齐
    #[serde(default)]
    pub page: Option<PageEnvironment>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AdUnitDecl {
    pub code: String,
    #[serde(default)]
    pub media_types: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BidderRequest {
    #[serde(default)]
    pub bids: Vec<InitBid>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InitBid {
    pub ad_unit_code: String,
    pub bidder: String,
    #[serde(default)]
    pub params: Value,
    #[serde(alias = "bidId")]
    pub request_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BidRequestedArgs {
    pub auction_id: String,
    #[serde(default)]
    pub bids: Vec<RequestedBid>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RequestedBid {
    pub ad_unit_code: String,
    #[serde(alias = "bidId")]
    pub request_id: String,
    #[serde(default)]
    pub bidder: Option<String>,
    #[serde(default)]
    pub bidder_code: Option<String>,
    #[serde(default)]
    pub src: Option<String>,
    /// 原始尺寸声明，格式不合法时记为空列表
    #[serde(default)]
    pub sizes: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BidResponseArgs {
    pub auction_id: String,
    pub ad_unit_code: String,
    pub request_id: String,
    #[serde(default)]
    pub cpm: Option<f64>,
    #[serde(default)]
    pub original_cpm: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub net_revenue: Option<bool>,
    #[serde(default, deserialize_with = "opaque_id")]
    pub creative_id: Option<String>,
    #[serde(default)]
    pub time_to_respond: Option<u64>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub ttl: Option<u64>,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default, deserialize_with = "opaque_id")]
    pub deal_id: Option<String>,
    #[serde(default, deserialize_with = "opaque_id")]
    pub ad_id: Option<String>,
    #[serde(default)]
    pub floor_data: Option<FloorData>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BidWonArgs {
    pub auction_id: String,
    pub ad_unit_code: String,
    pub request_id: String,
    #[serde(default)]
    pub floor_data: Option<FloorData>,
    #[serde(default, deserialize_with = "opaque_id")]
    pub deal_id: Option<String>,
    #[serde(default, alias = "adserverTargeting")]
    pub ad_server_targeting: Option<Map<String, Value>>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BidTimeoutEntry {
    pub auction_id: String,
    pub ad_unit_code: String,
    #[serde(alias = "bidId")]
    pub request_id: String,
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AuctionEndArgs {
    pub auction_id: String,
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// 规范化尺寸声明：`[[w, h], ...]` 或单个 `[w, h]`，其余一律为空
pub fn normalize_sizes(sizes: Option<&Value>) -> Vec<[u32; 2]> {
    let Some(Value::Array(items)) = sizes else {
        return Vec::new();
    };
    if let Some(pair) = as_pair(items) {
        return vec![pair];
    }
    let pairs: Option<Vec<[u32; 2]>> = items
        .iter()
        .map(|item| match item {
            Value::Array(inner) => as_pair(inner),
            _ => None,
        })
        .collect();
    pairs.unwrap_or_default()
}

fn as_pair(items: &[Value]) -> Option<[u32; 2]> {
    match items {
        [w, h] => {
            let w = u32::try_from(w.as_u64()?).ok()?;
            let h = u32::try_from(h.as_u64()?).ok()?;
            Some([w, h])
        }
        _ => None,
    }
}

/// 出价方自定义的 id（creativeId / dealId / adId），字符串和数字都接受
fn opaque_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// 从 adServerTargeting 中取出字符串值（数字也转成字符串）
pub fn targeting_value(targeting: &Map<String, Value>, key: &str) -> Option<String> {
    match targeting.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

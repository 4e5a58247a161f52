// src/aggregator/merge.rs

use crate::model::events::{
    normalize_sizes, targeting_value, BidResponseArgs, BidTimeoutEntry, BidWonArgs, RequestedBid,
};
use crate::model::record::{AdServerTargeting, BidRecord, BidStatus, FloorData};

/// bidRequested 阶段的补丁
#[derive(Debug, Clone, PartialEq)]
pub struct RequestedPatch {
    pub is_s2s: bool,
    pub alias: Option<String>,
    pub size: Vec<[u32; 2]>,
    pub time_requested: i64,
}

impl RequestedPatch {
    pub fn from_event(bid: &RequestedBid, now_ms: i64) -> Self {
        // bidderCode 与 bidder 不同时才算别名
        let alias = match (&bid.bidder_code, &bid.bidder) {
            (Some(code), Some(bidder)) if code == bidder => None,
            (Some(code), _) => Some(code.clone()),
            (None, _) => None,
        };
        Self {
            is_s2s: bid.src.as_deref() == Some("s2s"),
            alias,
            size: normalize_sizes(bid.sizes.as_ref()),
            time_requested: now_ms,
        }
    }
}

/// bidResponse 阶段的补丁，整组字段一起覆盖
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResponsePatch {
    pub cpm: Option<f64>,
    pub original_cpm: Option<f64>,
    pub currency: Option<String>,
    pub net_revenue: Option<bool>,
    pub creative_id: Option<String>,
    pub ttr: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub ttl: Option<u64>,
    pub media_type: Option<String>,
    pub deal_id: Option<String>,
    pub ad_id: Option<String>,
    pub floor_data: Option<FloorData>,
}

impl From<&BidResponseArgs> for ResponsePatch {
    fn from(args: &BidResponseArgs) -> Self {
        Self {
            cpm: args.cpm,
            original_cpm: args.original_cpm,
            currency: args.currency.clone(),
            net_revenue: args.net_revenue,
            creative_id: args.creative_id.clone(),
            ttr: args.time_to_respond,
            width: args.width,
            height: args.height,
            ttl: args.ttl,
            media_type: args.media_type.clone(),
            deal_id: args.deal_id.clone(),
            ad_id: args.ad_id.clone(),
            floor_data: args.floor_data.clone(),
        }
    }
}

/// bidWon 阶段的补丁；floorData / dealId 缺省时沿用已有值
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WonPatch {
    pub floor_data: Option<FloorData>,
    pub deal_id: Option<String>,
    pub targeting: AdServerTargeting,
}

impl From<&BidWonArgs> for WonPatch {
    fn from(args: &BidWonArgs) -> Self {
        let targeting = args
            .ad_server_targeting
            .as_ref()
            .map(|t| AdServerTargeting {
                hb_pb: targeting_value(t, "hb_pb"),
                hb_bidder: targeting_value(t, "hb_bidder"),
                hb_deal: targeting_value(t, "hb_deal"),
            })
            .unwrap_or_default();
        Self {
            floor_data: args.floor_data.clone(),
            deal_id: args.deal_id.clone().filter(|d| !d.is_empty()),
            targeting,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimeoutPatch {
    pub timeout: Option<u64>,
}

impl From<&BidTimeoutEntry> for TimeoutPatch {
    fn from(entry: &BidTimeoutEntry) -> Self {
        Self { timeout: entry.timeout }
    }
}

impl BidRecord {
    pub fn apply_requested(&mut self, patch: RequestedPatch) {
        self.is_s2s = Some(patch.is_s2s);
        self.alias = patch.alias;
        self.size = Some(patch.size);
        self.time_requested = Some(patch.time_requested);
        self.status = Some(BidStatus::Requested);
    }

    pub fn apply_response(&mut self, patch: ResponsePatch) {
        self.cpm = patch.cpm;
        self.original_cpm = patch.original_cpm;
        self.currency = patch.currency;
        self.net_revenue = patch.net_revenue;
        self.creative_id = patch.creative_id;
        self.ttr = patch.ttr;
        self.width = patch.width;
        self.height = patch.height;
        self.ttl = patch.ttl;
        self.media_type = patch.media_type;
        self.deal_id = patch.deal_id;
        self.ad_id = patch.ad_id;
        self.floor_data = patch.floor_data;
        self.status = Some(BidStatus::Responded);
    }

    pub fn apply_won(&mut self, patch: WonPatch) {
        if patch.floor_data.is_some() {
            self.floor_data = patch.floor_data;
        }
        if patch.deal_id.is_some() {
            self.deal_id = patch.deal_id;
        }
        self.ad_server_targeting = Some(patch.targeting);
        self.status = Some(BidStatus::Won);
    }

    pub fn apply_timeout(&mut self, patch: TimeoutPatch) {
        self.timeout = patch.timeout;
        self.status = Some(BidStatus::Timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn seeded() -> BidRecord {
        BidRecord::seed("bidderX", json!({"placement": 7}), "b1")
    }

    fn response(cpm: f64) -> ResponsePatch {
        ResponsePatch {
            cpm: Some(cpm),
            original_cpm: Some(cpm),
            currency: Some("USD".to_string()),
            deal_id: Some("deal-1".to_string()),
            floor_data: Some(FloorData { floor_value: Some(0.8), ..FloorData::default() }),
            ..ResponsePatch::default()
        }
    }

    #[test]
    fn alias_only_when_bidder_code_differs() {
        let mut bid = RequestedBid {
            ad_unit_code: "slot".to_string(),
            request_id: "b1".to_string(),
            bidder: Some("appnexus".to_string()),
            bidder_code: Some("appnexus".to_string()),
            src: Some("client".to_string()),
            sizes: Some(json!([[300, 250]])),
        };
        let patch = RequestedPatch::from_event(&bid, 42);
        assert_eq!(patch.alias, None);
        assert!(!patch.is_s2s);
        assert_eq!(patch.size, vec![[300, 250]]);

        bid.bidder_code = Some("anAlias".to_string());
        bid.src = Some("s2s".to_string());
        bid.sizes = None;
        let patch = RequestedPatch::from_event(&bid, 42);
        assert_eq!(patch.alias.as_deref(), Some("anAlias"));
        assert!(patch.is_s2s);
        assert!(patch.size.is_empty());
    }

    #[test]
    fn patches_keep_untouched_fields() {
        let mut record = seeded();
        record.apply_requested(RequestedPatch {
            is_s2s: true,
            alias: None,
            size: vec![[300, 250]],
            time_requested: 100,
        });
        record.apply_response(response(1.25));
        assert_eq!(record.bidder, "bidderX");
        assert_eq!(record.params, json!({"placement": 7}));
        assert_eq!(record.time_requested, Some(100));
        assert_eq!(record.is_s2s, Some(true));
        assert_eq!(record.cpm, Some(1.25));
        assert_eq!(record.status, Some(BidStatus::Responded));
    }

    #[test]
    fn won_falls_back_to_stored_floor_and_deal() {
        let mut record = seeded();
        record.apply_response(response(2.0));
        record.apply_won(WonPatch {
            floor_data: None,
            deal_id: None,
            targeting: AdServerTargeting { hb_pb: Some("2.00".to_string()), ..AdServerTargeting::default() },
        });
        assert_eq!(record.status, Some(BidStatus::Won));
        assert_eq!(record.deal_id.as_deref(), Some("deal-1"));
        assert_eq!(record.floor_data.as_ref().and_then(|f| f.floor_value), Some(0.8));
        assert_eq!(record.ad_server_targeting.as_ref().unwrap().hb_pb.as_deref(), Some("2.00"));

        record.apply_won(WonPatch {
            floor_data: Some(FloorData { floor_value: Some(0.9), ..FloorData::default() }),
            deal_id: Some("deal-2".to_string()),
            targeting: AdServerTargeting::default(),
        });
        assert_eq!(record.deal_id.as_deref(), Some("deal-2"));
        assert_eq!(record.floor_data.unwrap().floor_value, Some(0.9));
    }

    #[test]
    fn won_may_follow_timeout() {
        let mut record = seeded();
        record.apply_timeout(TimeoutPatch { timeout: Some(3000) });
        record.apply_won(WonPatch::default());
        assert_eq!(record.status, Some(BidStatus::Won));
        assert_eq!(record.timeout, Some(3000));
    }

    #[derive(Debug, Clone)]
    enum Step {
        Requested(RequestedPatch),
        Response(ResponsePatch),
        Won(WonPatch),
        Timeout(TimeoutPatch),
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (any::<bool>(), prop::option::of("[a-z]{3,6}"), 0i64..1_000_000).prop_map(|(s2s, alias, t)| {
                Step::Requested(RequestedPatch { is_s2s: s2s, alias, size: vec![[300, 250]], time_requested: t })
            }),
            (prop::option::of(0.0f64..20.0), prop::option::of("deal-[0-9]")).prop_map(|(cpm, deal)| {
                Step::Response(ResponsePatch { cpm, deal_id: deal, ..ResponsePatch::default() })
            }),
            (prop::option::of("deal-[0-9]"), prop::option::of("[0-9]\\.[0-9]{2}")).prop_map(|(deal, pb)| {
                Step::Won(WonPatch {
                    floor_data: None,
                    deal_id: deal,
                    targeting: AdServerTargeting { hb_pb: pb, ..AdServerTargeting::default() },
                })
            }),
            prop::option::of(100u64..5000).prop_map(|t| Step::Timeout(TimeoutPatch { timeout: t })),
        ]
    }

    proptest! {
        /// 最终值等于最后一个触达该字段的补丁写入的值
        #[test]
        fn later_patches_override_overlapping_fields(steps in prop::collection::vec(step(), 0..12)) {
            let mut record = seeded();
            for s in steps.clone() {
                match s {
                    Step::Requested(p) => record.apply_requested(p),
                    Step::Response(p) => record.apply_response(p),
                    Step::Won(p) => record.apply_won(p),
                    Step::Timeout(p) => record.apply_timeout(p),
                }
            }

            let mut status = None;
            let mut cpm = None;
            let mut deal_id: Option<String> = None;
            let mut time_requested = None;
            let mut timeout = None;
            let mut hb_pb: Option<Option<String>> = None;
            for s in &steps {
                match s {
                    Step::Requested(p) => {
                        status = Some(BidStatus::Requested);
                        time_requested = Some(p.time_requested);
                    }
                    Step::Response(p) => {
                        status = Some(BidStatus::Responded);
                        cpm = p.cpm;
                        deal_id = p.deal_id.clone();
                    }
                    Step::Won(p) => {
                        status = Some(BidStatus::Won);
                        if p.deal_id.is_some() {
                            deal_id = p.deal_id.clone();
                        }
                        hb_pb = Some(p.targeting.hb_pb.clone());
                    }
                    Step::Timeout(p) => {
                        status = Some(BidStatus::Timeout);
                        timeout = p.timeout;
                    }
                }
            }

            prop_assert_eq!(record.status, status);
            prop_assert_eq!(record.cpm, cpm);
            prop_assert_eq!(record.deal_id, deal_id);
            prop_assert_eq!(record.time_requested, time_requested);
            prop_assert_eq!(record.timeout, timeout);
            prop_assert_eq!(record.ad_server_targeting.map(|t| t.hb_pb), hb_pb);
            prop_assert_eq!(record.bidder, "bidderX".to_string());
            prop_assert_eq!(record.request_id, "b1".to_string());
        }
    }
}

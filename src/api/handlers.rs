use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::model::events::LifecycleEvent;
use crate::model::metadata::PageEnvironment;
use crate::model::record::AuctionRecord;
use crate::AppState;

/// 用 simd-json 解析事件信封
pub fn decode_event(body: &[u8]) -> Result<LifecycleEvent, String> {
    let mut buf = body.to_vec();
    simd_json::serde::from_slice::<LifecycleEvent>(&mut buf).map_err(|e| e.to_string())
}

/// 事件没有携带页面环境时，从请求头推导
pub fn page_from_headers(headers: &HeaderMap) -> PageEnvironment {
    let text = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    // Accept-Language 只取第一个语言标签
    let language = text(header::ACCEPT_LANGUAGE).and_then(|v| {
        v.split(',')
            .next()
            .map(|tag| tag.split(';').next().unwrap_or(tag).trim().to_string())
            .filter(|tag| !tag.is_empty())
    });
    PageEnvironment {
        url: text(header::REFERER).unwrap_or_default(),
        referrer: None,
        user_agent: text(header::USER_AGENT),
        language,
        screen_width: None,
        screen_height: None,
    }
}

/// **接收宿主事件总线投递的生命周期事件**
pub async fn handle_track_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let mut event = match decode_event(&body) {
        Ok(event) => event,
        Err(reason) => {
            warn!(reason = %reason, "rejecting undecodable lifecycle event");
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": reason })));
        }
    };

    if let LifecycleEvent::AuctionInit(args) = &mut event {
        if args.page.is_none() {
            args.page = Some(page_from_headers(&headers));
        }
    }

    let anomalies = state.aggregator.track(&event);
    let kinds: Vec<&str> = anomalies.iter().map(|a| a.kind()).collect();
    (
        StatusCode::ACCEPTED,
        Json(json!({ "eventType": event.name(), "anomalies": kinds })),
    )
}

/// 当前所有拍卖记录
pub async fn handle_list_auctions(State(state): State<Arc<AppState>>) -> Json<HashMap<String, AuctionRecord>> {
    Json(state.aggregator.auctions())
}

pub async fn handle_get_auction(
    State(state): State<Arc<AppState>>,
    Path(auction_id): Path<String>,
) -> Result<Json<AuctionRecord>, StatusCode> {
    state.aggregator.auction(&auction_id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::engine::Aggregator;
    use crate::config::config_manager::ConfigManager;
    use crate::delivery::sink::testing::RecordingSink;
    use crate::delivery::sink::DeliverySink;
    use axum::http::HeaderValue;

    fn state() -> Arc<AppState> {
        let sink: Arc<dyn DeliverySink> = Arc::new(RecordingSink::default());
        Arc::new(AppState { aggregator: Aggregator::new(Arc::new(ConfigManager::new()), sink, None) })
    }

    #[test]
    fn page_environment_comes_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::REFERER, HeaderValue::from_static("https://news.example.com/?utm_source=x"));
        headers.insert(header::USER_AGENT, HeaderValue::from_static("Mozilla/5.0"));
        headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("de-DE;q=0.9, en;q=0.8"));
        let page = page_from_headers(&headers);
        assert_eq!(page.url, "https://news.example.com/?utm_source=x");
        assert_eq!(page.user_agent.as_deref(), Some("Mozilla/5.0"));
        assert_eq!(page.language.as_deref(), Some("de-DE"));
        assert_eq!(page_from_headers(&HeaderMap::new()), PageEnvironment::default());
    }

    #[tokio::test]
    async fn init_event_is_tracked_with_header_metadata() {
        let state = state();
        let mut headers = HeaderMap::new();
        headers.insert(header::REFERER, HeaderValue::from_static("https://news.example.com/?gclid=g1"));
        let body = Bytes::from(
            r#"{"eventType":"auctionInit","args":{"auctionId":"A1","timestamp":1750296000569,
                "adUnits":[{"code":"slot-1","mediaTypes":{"banner":{}}}],
                "bidderRequests":[{"bids":[{"adUnitCode":"slot-1","bidder":"bidderX","bidId":"b1"}]}]}}"#,
        );
        let (status, Json(reply)) = handle_track_event(State(state.clone()), headers, body).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(reply["eventType"], "auctionInit");
        assert_eq!(reply["anomalies"], json!([]));

        let Json(record) = handle_get_auction(State(state.clone()), Path("A1".to_string())).await.unwrap();
        assert_eq!(record.metadata.utm_params["gclid"], "g1");
        assert_eq!(record.ad_units["slot-1"].bids[0].request_id, "b1");
        assert_eq!(
            handle_get_auction(State(state), Path("A2".to_string())).await.unwrap_err(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn malformed_events_are_rejected_and_anomalies_echoed() {
        let state = state();
        let (status, _) = handle_track_event(State(state.clone()), HeaderMap::new(), Bytes::from("{ nope")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let body = Bytes::from(r#"{"eventType":"auctionEnd","args":{"auctionId":"ghost"}}"#);
        let (status, Json(reply)) = handle_track_event(State(state.clone()), HeaderMap::new(), body).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(reply["anomalies"], json!(["unknown_auction"]));

        let Json(all) = handle_list_auctions(State(state)).await;
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn numeric_ids_and_floor_diagnostics_reach_the_record() {
        let state = state();
        let events = [
            r#"{"eventType":"auctionInit","args":{"auctionId":"A1","timestamp":1750296000569,
                "adUnits":[{"code":"slot-1","mediaTypes":{"banner":{}}}],
                "bidderRequests":[{"bids":[{"adUnitCode":"slot-1","bidder":"bidderX","bidId":"b1"}]}]}}"#,
            r#"{"eventType":"bidResponse","args":{"auctionId":"A1","adUnitCode":"slot-1","requestId":"b1",
                "cpm":2.5,"creativeId":29681110,"dealId":4411,
                "floorData":{"floorValue":0.8,"floorRuleValue":0.7,"fetchStatus":"success",
                    "enforcements":{"enforceJS":true,"floorDeals":false}}}}"#,
        ];
        for body in events {
            let (status, Json(reply)) = handle_track_event(State(state.clone()), HeaderMap::new(), Bytes::from(body)).await;
            assert_eq!(status, StatusCode::ACCEPTED);
            assert_eq!(reply["anomalies"], json!([]));
        }

        let Json(record) = handle_get_auction(State(state), Path("A1".to_string())).await.unwrap();
        let bid = serde_json::to_value(&record.ad_units["slot-1"].bids[0]).unwrap();
        assert_eq!(bid["status"], "responded");
        assert_eq!(bid["cpm"], 2.5);
        assert_eq!(bid["creativeId"], "29681110");
        assert_eq!(bid["dealId"], "4411");
        assert_eq!(bid["floorData"]["floorValue"], 0.8);
        assert_eq!(bid["floorData"]["floorRuleValue"], 0.7);
        assert_eq!(bid["floorData"]["fetchStatus"], "success");
        assert_eq!(bid["floorData"]["enforcements"], json!({ "enforceJS": true, "floorDeals": false }));
    }
}

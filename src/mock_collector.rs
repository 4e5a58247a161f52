use axum::http::StatusCode;
use axum::serve;
use axum::{routing::post, Json, Router};
use rand::Rng;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::time::{sleep, Duration};
use tracing::info;
use uuid::Uuid;

use crate::delivery::sink::LateWinReport;
use crate::model::record::{AuctionRecord, BidStatus};

/// 统计各状态的出价数量，写入接收日志
fn summarize(record: &AuctionRecord) -> Value {
    let bids = record.ad_units.values().flat_map(|unit| unit.bids.iter());
    let (mut won, mut timed_out, mut silent) = (0usize, 0usize, 0usize);
    for bid in bids {
        match bid.status {
            Some(BidStatus::Won) => won += 1,
            Some(BidStatus::Timeout) => timed_out += 1,
            None => silent += 1,
            _ => {}
        }
    }
    json!({
        "auction_id": record.auction_id,
        "ad_units": record.ad_units.len(),
        "won": won,
        "timed_out": timed_out,
        "never_requested": silent,
        "timeout_reached": record.timeout_reached,
    })
}

fn simulated_latency() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(5..50))
}

/// 模拟采集端：接收拍卖记录并返回回执
async fn handle_auction_record(Json(record): Json<AuctionRecord>) -> (StatusCode, Json<Value>) {
    let receipt = Uuid::new_v4();
    sleep(simulated_latency()).await;
    info!(receipt = %receipt, summary = %summarize(&record), "Mock collector received auction record");
    (StatusCode::OK, Json(json!({ "receipt": receipt.to_string() })))
}

async fn handle_late_win(Json(report): Json<LateWinReport>) -> (StatusCode, Json<Value>) {
    let receipt = Uuid::new_v4();
    info!(
        receipt = %receipt,
        auction_id = %report.auction_id,
        request_id = %report.request_id,
        "Mock collector received late win"
    );
    (StatusCode::OK, Json(json!({ "receipt": receipt.to_string() })))
}

/// 启动模拟采集端，路由与默认投递地址一致：
/// `/api/track/auction` 和 `/api/track/late-win`
pub async fn start_mock_collector(port: u16) -> std::io::Result<()> {
    let app = Router::new()
        .route("/api/track/auction", post(handle_auction_record))
        .route("/api/track/late-win", post(handle_late_win));

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Mock collector running at http://{}", addr);
    serve(listener, app).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::metadata::{capture, PageEnvironment};
    use crate::model::record::{AdUnitRecord, BidRecord};
    use serde_json::Value as JsonValue;

    #[test]
    fn summary_counts_bid_outcomes() {
        let mut record = AuctionRecord::new("A1", 1, None, None, capture(&PageEnvironment::default()));
        let mut won = BidRecord::seed("x", JsonValue::Null, "b1");
        won.status = Some(BidStatus::Won);
        let mut late = BidRecord::seed("y", JsonValue::Null, "b2");
        late.status = Some(BidStatus::Timeout);
        let idle = BidRecord::seed("z", JsonValue::Null, "b3");
        record.ad_units.insert(
            "slot-1".to_string(),
            AdUnitRecord { media_types: vec![], bids: vec![won, late, idle] },
        );
        let summary = summarize(&record);
        assert_eq!(summary["won"], 1);
        assert_eq!(summary["timed_out"], 1);
        assert_eq!(summary["never_requested"], 1);
        assert_eq!(summary["ad_units"], 1);
    }

    #[tokio::test]
    async fn collector_acknowledges_records() {
        let record = AuctionRecord::new("A1", 1, None, None, capture(&PageEnvironment::default()));
        let (status, Json(reply)) = handle_auction_record(Json(record)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(Uuid::parse_str(reply["receipt"].as_str().unwrap()).is_ok());
    }
}

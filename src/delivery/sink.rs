// src/delivery/sink.rs

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::logging::report_logger::{ReportKind, ReportLogger};
use crate::model::record::AuctionRecord;

/// flush 之后才到达的 bidWon，单独上报，不修改已发送的数据
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LateWinReport {
    pub auction_id: String,
    pub ad_unit_code: String,
    pub request_id: String,
    pub received_at: i64,
}

/// **投递出口**
///
/// `deliver` 只负责提交，不等待结果，也不重试。
pub trait DeliverySink: Send + Sync {
    fn deliver(&self, record: &AuctionRecord);

    fn report_late_win(&self, report: &LateWinReport) {
        warn!(
            auction_id = %report.auction_id,
            ad_unit_code = %report.ad_unit_code,
            request_id = %report.request_id,
            "late win dropped, no late-win channel configured"
        );
    }
}

/// 通过 HTTP POST 把记录发给采集端
pub struct HttpSink {
    client: Client,
    endpoint: String,
    late_win_endpoint: Option<String>,
    request_timeout: Duration,
    reports: Option<Arc<ReportLogger>>,
}

impl HttpSink {
    pub fn new(endpoint: &str, late_win_endpoint: Option<&str>, request_timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.to_string(),
            late_win_endpoint: late_win_endpoint.map(str::to_string),
            request_timeout,
            reports: None,
        }
    }

    /// 投递失败时写入报告日志
    pub fn with_reports(mut self, reports: Arc<ReportLogger>) -> Self {
        self.reports = Some(reports);
        self
    }

    /// 提交到运行时后立即返回
    fn submit(&self, url: &str, body: String, auction_id: &str) {
        let Ok(handle) = Handle::try_current() else {
            warn!(auction_id, url, "no async runtime, payload dropped");
            return;
        };
        let client = self.client.clone();
        let url = url.to_string();
        let auction_id = auction_id.to_string();
        let request_timeout = self.request_timeout;
        let reports = self.reports.clone();
        handle.spawn(async move {
            let start = Instant::now();
            let response = timeout(
                request_timeout,
                client
                    .post(&url)
                    .header("Content-Type", "application/json")
                    .body(body)
                    .send(),
            )
            .await;
            let elapsed = start.elapsed().as_millis();
            let failure = match response {
                Ok(Ok(resp)) if resp.status().is_success() => {
                    debug!(auction_id = %auction_id, url = %url, elapsed_ms = elapsed as u64, "payload delivered");
                    return;
                }
                Ok(Ok(resp)) => format!("status {}", resp.status()),
                Ok(Err(e)) => e.to_string(),
                Err(_) => "timeout".to_string(),
            };
            warn!(auction_id = %auction_id, url = %url, reason = %failure, "delivery failed");
            if let Some(reports) = reports {
                reports.report(
                    ReportKind::Delivery,
                    json!({
                        "auctionId": auction_id,
                        "url": url,
                        "reason": failure,
                        "elapsedMs": elapsed as u64,
                    }),
                );
            }
        });
    }
}

impl DeliverySink for HttpSink {
    fn deliver(&self, record: &AuctionRecord) {
        match serde_json::to_string(record) {
            Ok(body) => {
                info!(
                    auction_id = %record.auction_id,
                    timeout_reached = record.timeout_reached,
                    ad_units = record.ad_units.len(),
                    "flushing auction record"
                );
                self.submit(&self.endpoint, body, &record.auction_id);
            }
            Err(e) => warn!(auction_id = %record.auction_id, error = %e, "failed to serialize auction record"),
        }
    }

    fn report_late_win(&self, report: &LateWinReport) {
        if let Some(reports) = &self.reports {
            if let Ok(payload) = serde_json::to_value(report) {
                reports.report(ReportKind::LateWin, payload);
            }
        }
        let Some(url) = &self.late_win_endpoint else {
            debug!(auction_id = %report.auction_id, "no late-win endpoint configured");
            return;
        };
        match serde_json::to_string(report) {
            Ok(body) => self.submit(url, body, &report.auction_id),
            Err(e) => warn!(auction_id = %report.auction_id, error = %e, "failed to serialize late win"),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::metadata::{capture, PageEnvironment};

    #[test]
    fn deliver_without_runtime_is_a_silent_drop() {
        let sink = HttpSink::new("http://127.0.0.1:9/api/track/auction", None, Duration::from_millis(50));
        let record = AuctionRecord::new("A1", 1, None, None, capture(&PageEnvironment::default()));
        sink.deliver(&record);
        sink.report_late_win(&LateWinReport {
            auction_id: "A1".to_string(),
            ad_unit_code: "slot-1".to_string(),
            request_id: "b1".to_string(),
            received_at: 2,
        });
    }

    #[tokio::test]
    async fn transport_failure_stays_inside_the_sink() {
        // 端口 9 (discard) 上没有服务，连接失败只会记录日志
        let sink = HttpSink::new("http://127.0.0.1:9/api/track/auction", None, Duration::from_millis(200));
        let record = AuctionRecord::new("A1", 1, None, None, capture(&PageEnvironment::default()));
        sink.deliver(&record);
        tokio::time::sleep(Duration::from_millis(300)).await;
    }
}

// src/main.rs

use axum::routing::{get, post};
use axum::{serve, Router};
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

mod aggregator;
mod api;
mod config;
mod delivery;
mod error;
mod logging;
mod mock_collector;
mod model;

use aggregator::engine::Aggregator;
use api::handlers::{handle_get_auction, handle_list_auctions, handle_track_event};
use config::adapters::{ConfigAdapter, FileConfigAdapter};
use config::config_manager::{AnalyticsConfig, ConfigManager};
use delivery::sink::HttpSink;
use logging::report_logger::ReportLogger;

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Aggregator,
}

#[derive(Parser, Debug)]
#[command(author = "whiteCcinn", version = "1.0", about = "Auction lifecycle analytics aggregator")]
struct CliArgs {
    #[arg(short, long, default_value_t = 8080)]
    port: u16,
    #[arg(long, default_value = "logs")]
    log_dir: String,
    /// 分析配置文件（JSON）
    #[arg(long, default_value = "static/analytics.json")]
    config: String,
    /// 覆盖配置文件中的 site
    #[arg(long)]
    site: Option<String>,
    /// 覆盖配置文件中的采集端地址
    #[arg(long)]
    endpoint: Option<String>,
    /// 覆盖配置文件中的迟到 bidWon 上报地址
    #[arg(long)]
    late_win_endpoint: Option<String>,
    #[arg(long)]
    flush_timeout_ms: Option<u64>,
    /// 同时启动本地模拟采集端
    #[arg(long, default_value_t = false)]
    mock_collector: bool,
    #[arg(long, default_value_t = 8061)]
    mock_collector_port: u16,
}

impl CliArgs {
    /// 命令行参数覆盖配置文件中的值
    fn apply_overrides(&self, config: &mut AnalyticsConfig) {
        if let Some(site) = &self.site {
            config.site = Some(site.clone());
        }
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(late_win_endpoint) = &self.late_win_endpoint {
            config.late_win_endpoint = Some(late_win_endpoint.clone());
        }
        if let Some(flush_timeout_ms) = self.flush_timeout_ms {
            config.flush_timeout_ms = flush_timeout_ms;
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
    }
    info!("Shutting down gracefully...");
}

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    // 初始化全局 tracing 日志
    let log_file = rolling::hourly(&args.log_dir, "analytics_log.json");
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default()
        .with(filter)
        .with(fmt::layer().json().with_writer(non_blocking));
    tracing::subscriber::set_global_default(subscriber)
        .expect("Unable to set global tracing subscriber");

    // 报告日志：异常、迟到的 bidWon、投递失败
    let reports = ReportLogger::new(&args.log_dir, "reports", 1000, 100, 1000);

    // 读取配置文件，命令行参数优先
    let mut analytics = FileConfigAdapter::new(&args.config).load();
    args.apply_overrides(&mut analytics);

    let config = Arc::new(ConfigManager::new());
    config.enable(analytics.clone());

    let sink = HttpSink::new(
        &analytics.endpoint,
        analytics.late_win_endpoint.as_deref(),
        analytics.request_timeout(),
    )
    .with_reports(reports.clone());
    let aggregator = Aggregator::new(config, Arc::new(sink), Some(reports.clone()));

    let collector = args.mock_collector.then(|| {
        let port = args.mock_collector_port;
        tokio::spawn(async move {
            if let Err(e) = mock_collector::start_mock_collector(port).await {
                error!(port, error = %e, "mock collector stopped");
            }
        })
    });

    let state = Arc::new(AppState { aggregator });
    let app = Router::new()
        .route("/events", post(handle_track_event))
        .route("/auctions", get(handle_list_auctions))
        .route("/auctions/{auction_id}", get(handle_get_auction))
        .with_state(state);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %addr, error = %e, "failed to bind event listener");
            return;
        }
    };
    info!(
        site = ?analytics.site,
        endpoint = %analytics.endpoint,
        flush_timeout_ms = analytics.flush_timeout_ms,
        "Auction analytics listening at http://{}",
        addr
    );

    if let Err(e) = serve(listener, app).with_graceful_shutdown(shutdown_signal()).await {
        error!(error = %e, "event server failed");
    }

    if let Some(collector) = collector {
        collector.abort();
    }
    reports.shutdown().await;
    info!("Auction analytics shut down.");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_override_file_values() {
        let args = CliArgs::try_parse_from([
            "auction-analytics",
            "--site",
            "site-cli",
            "--late-win-endpoint",
            "http://localhost:8061/api/track/late-win",
            "--flush-timeout-ms",
            "1500",
        ])
        .unwrap();
        let mut config = AnalyticsConfig {
            endpoint: "http://collector.example.com/track".to_string(),
            ..AnalyticsConfig::default()
        };
        args.apply_overrides(&mut config);

        assert_eq!(config.site.as_deref(), Some("site-cli"));
        assert_eq!(config.endpoint, "http://collector.example.com/track");
        assert_eq!(config.late_win_endpoint.as_deref(), Some("http://localhost:8061/api/track/late-win"));
        assert_eq!(config.flush_timeout_ms, 1500);
    }
}

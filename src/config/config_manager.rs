// src/config/config_manager.rs

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_ENDPOINT: &str = "http://localhost:8061/api/track/auction";
/// auctionEnd 之后等待 bidWon 的宽限期
pub const DEFAULT_FLUSH_TIMEOUT_MS: u64 = 2100;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_flush_timeout_ms() -> u64 {
    DEFAULT_FLUSH_TIMEOUT_MS
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

/// 分析模块配置
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsConfig {
    #[serde(default)]
    pub site: Option<String>, // 站点标识，原样写入每条记录
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub late_win_endpoint: Option<String>,
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            site: None,
            endpoint: default_endpoint(),
            late_win_endpoint: None,
            flush_timeout_ms: DEFAULT_FLUSH_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl AnalyticsConfig {
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// **配置管理**：只允许启用一次，之后的调用被忽略
#[derive(Debug, Default)]
pub struct ConfigManager {
    config: OnceCell<AnalyticsConfig>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 启用分析模块，返回本次调用是否生效
    pub fn enable(&self, config: AnalyticsConfig) -> bool {
        let site = config.site.clone();
        match self.config.set(config) {
            Ok(()) => {
                info!(site = ?site, "auction analytics enabled");
                true
            }
            Err(_) => {
                warn!("auction analytics already enabled, ignoring repeated enable");
                false
            }
        }
    }

    /// 未启用或未配置时为 None
    pub fn site(&self) -> Option<String> {
        self.config.get().and_then(|c| c.site.clone())
    }

    pub fn flush_timeout(&self) -> Duration {
        self.config
            .get()
            .map(AnalyticsConfig::flush_timeout)
            .unwrap_or(Duration::from_millis(DEFAULT_FLUSH_TIMEOUT_MS))
    }
}

// src/config/adapters.rs

use serde_json::Result as JsonResult;
use std::fs;
use tracing::warn;

use crate::config::config_manager::AnalyticsConfig;

pub trait ConfigAdapter: Send + Sync {
    fn load(&self) -> AnalyticsConfig;
}

/// 从 JSON 文件读取分析配置，文件缺失或格式错误时使用默认值
pub struct FileConfigAdapter {
    pub config_file: String,
}

impl FileConfigAdapter {
    pub fn new(config_file: &str) -> Self {
        Self {
            config_file: config_file.to_string(),
        }
    }
}

impl ConfigAdapter for FileConfigAdapter {
    fn load(&self) -> AnalyticsConfig {
        let content = match fs::read_to_string(&self.config_file) {
            Ok(content) => content,
            Err(e) => {
                warn!(file = %self.config_file, error = %e, "config file unreadable, using defaults");
                return AnalyticsConfig::default();
            }
        };
        let config: JsonResult<AnalyticsConfig> = serde_json::from_str(&content);
        config.unwrap_or_else(|e| {
            warn!(file = %self.config_file, error = %e, "config file malformed, using defaults");
            AnalyticsConfig::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_file_and_falls_back_to_defaults() {
        let dir = std::env::temp_dir().join(format!("auction-config-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();

        let good = dir.join("analytics.json");
        fs::write(&good, r#"{ "site": "5c4fab7a829e955d6c265e72", "flushTimeoutMs": 500 }"#).unwrap();
        let config = FileConfigAdapter::new(good.to_str().unwrap()).load();
        assert_eq!(config.site.as_deref(), Some("5c4fab7a829e955d6c265e72"));
        assert_eq!(config.flush_timeout_ms, 500);
        assert_eq!(config.endpoint, AnalyticsConfig::default().endpoint);

        let bad = dir.join("broken.json");
        fs::write(&bad, "{ site: ").unwrap();
        assert_eq!(FileConfigAdapter::new(bad.to_str().unwrap()).load(), AnalyticsConfig::default());

        let missing = dir.join("missing.json");
        assert_eq!(FileConfigAdapter::new(missing.to_str().unwrap()).load(), AnalyticsConfig::default());

        fs::remove_dir_all(&dir).unwrap();
    }
}

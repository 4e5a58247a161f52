// src/model/metadata.rs

use chrono::Utc;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 允许上报的营销归因参数
pub const ATTRIBUTION_KEYS: [&str; 7] = [
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "gclid",
    "fbclid",
];

/// 页面运行环境，由宿主提供（事件自带或从请求头推导）
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageEnvironment {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub referrer: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub screen_width: Option<u32>,
    #[serde(default)]
    pub screen_height: Option<u32>,
}

/// **拍卖初始化时采集的环境快照**，之后不再修改
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetadataSnapshot {
    pub url: String,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
    pub language: Option<String>,
    pub screen_width: Option<u32>,
    pub screen_height: Option<u32>,
    #[serde(default)]
    pub utm_params: BTreeMap<String, String>,
    pub library_version: String,
    pub timestamp: i64, // 采集时间（毫秒）
}

/// 从页面 URL 中提取白名单内的归因参数，空值和缺失的键都不保留
pub fn attribution_params(page_url: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    let Ok(url) = Url::parse(page_url) else {
        return params;
    };
    for (key, value) in url.query_pairs() {
        if value.is_empty() || !ATTRIBUTION_KEYS.contains(&key.as_ref()) {
            continue;
        }
        // 重复的键以第一次出现为准
        params.entry(key.into_owned()).or_insert_with(|| value.into_owned());
    }
    params
}

/// 采集快照。空字符串和 0 尺寸视为不可用
pub fn capture(env: &PageEnvironment) -> MetadataSnapshot {
    let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
    MetadataSnapshot {
        url: env.url.clone(),
        referrer: non_empty(&env.referrer),
        user_agent: non_empty(&env.user_agent),
        language: non_empty(&env.language),
        screen_width: env.screen_width.filter(|w| *w > 0),
        screen_height: env.screen_height.filter(|h| *h > 0),
        utm_params: attribution_params(&env.url),
        library_version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().timestamp_millis(),
    }
}

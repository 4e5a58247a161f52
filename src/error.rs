// src/error.rs

use std::fmt;

/// 聚合过程中的异常情况。全部是本地错误，只记录，不向宿主抛出
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
    UnknownAuction { auction_id: String },
    UnknownAdUnit { auction_id: String, ad_unit_code: String },
    UnknownBid { auction_id: String, ad_unit_code: String, request_id: String },
    DuplicateInit { auction_id: String },
    DuplicateEnd { auction_id: String },
    LateWin { auction_id: String, ad_unit_code: String, request_id: String },
    AlreadyFlushed { auction_id: String },
    NoRuntime { auction_id: String },
}

impl Anomaly {
    /// 报告日志里使用的稳定标识
    pub fn kind(&self) -> &'static str {
        match self {
            Anomaly::UnknownAuction { .. } => "unknown_auction",
            Anomaly::UnknownAdUnit { .. } => "unknown_ad_unit",
            Anomaly::UnknownBid { .. } => "unknown_bid",
            Anomaly::DuplicateInit { .. } => "duplicate_init",
            Anomaly::DuplicateEnd { .. } => "duplicate_end",
            Anomaly::LateWin { .. } => "late_win",
            Anomaly::AlreadyFlushed { .. } => "already_flushed",
            Anomaly::NoRuntime { .. } => "no_runtime",
        }
    }

    pub fn auction_id(&self) -> &str {
        match self {
            Anomaly::UnknownAuction { auction_id }
            | Anomaly::UnknownAdUnit { auction_id, .. }
            | Anomaly::UnknownBid { auction_id, .. }
            | Anomaly::DuplicateInit { auction_id }
            | Anomaly::DuplicateEnd { auction_id }
            | Anomaly::LateWin { auction_id, .. }
            | Anomaly::AlreadyFlushed { auction_id }
            | Anomaly::NoRuntime { auction_id } => auction_id,
        }
    }

    /// 未知 bid 说明事件乱序或者宿主数据有问题，按 error 级别记录
    pub fn is_error(&self) -> bool {
        matches!(self, Anomaly::UnknownBid { .. } | Anomaly::NoRuntime { .. })
    }
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::UnknownAuction { auction_id } => write!(f, "unknown auction {}", auction_id),
            Anomaly::UnknownAdUnit { auction_id, ad_unit_code } => {
                write!(f, "unknown ad unit {} in auction {}", ad_unit_code, auction_id)
            }
            Anomaly::UnknownBid { auction_id, ad_unit_code, request_id } => write!(
                f,
                "unknown bid {} for ad unit {} in auction {}",
                request_id, ad_unit_code, auction_id
            ),
            Anomaly::DuplicateInit { auction_id } => {
                write!(f, "auction {} already initialized, keeping original record", auction_id)
            }
            Anomaly::DuplicateEnd { auction_id } => write!(f, "auction {} already ended", auction_id),
            Anomaly::LateWin { auction_id, ad_unit_code, request_id } => write!(
                f,
                "win for bid {} on ad unit {} arrived after auction {} was flushed",
                request_id, ad_unit_code, auction_id
            ),
            Anomaly::AlreadyFlushed { auction_id } => write!(f, "auction {} already flushed", auction_id),
            Anomaly::NoRuntime { auction_id } => write!(
                f,
                "no async runtime to schedule grace window for auction {}, flushing now",
                auction_id
            ),
        }
    }
}

impl std::error::Error for Anomaly {}

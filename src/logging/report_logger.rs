// src/logging/report_logger.rs

use chrono::{FixedOffset, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};
use tokio::sync::oneshot;
use tokio::task;
use tokio::time::{self, Duration};
use tracing::warn;
use tracing_appender::rolling;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::fmt::MakeWriter;

/// 报告类型，每种类型写入单独的文件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    Anomaly,
    LateWin,
    Delivery,
}

impl ReportKind {
    pub const ALL: [ReportKind; 3] = [ReportKind::Anomaly, ReportKind::LateWin, ReportKind::Delivery];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Anomaly => "anomaly",
            ReportKind::LateWin => "late_win",
            ReportKind::Delivery => "delivery",
        }
    }
}

enum Command {
    Entry { kind: ReportKind, content: String },
    Flush(oneshot::Sender<()>),
}

/// **报告日志**
///
/// 异常、迟到的 bidWon、投递失败等带外信息按类型写入滚动文件。
/// `report` 不会阻塞，通道满时直接丢弃并记一条 tracing 警告。
pub struct ReportLogger {
    sender: Sender<Command>,
}

impl ReportLogger {
    /// - `log_dir`: 报告文件目录
    /// - `file_prefix`: 文件前缀，最终文件名形如 `reports_anomaly.json`
    /// - `buffer_size`: 通道容量
    /// - `batch_size`: 每种类型攒够多少条写一次盘
    /// - `flush_interval`: 定时刷盘间隔（毫秒）
    pub fn new(
        log_dir: &str,
        file_prefix: &str,
        buffer_size: usize,
        batch_size: usize,
        flush_interval: u64,
    ) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let mut log_files = HashMap::new();
        for kind in ReportKind::ALL {
            let file_name = format!("{}_{}.json", file_prefix, kind.as_str());
            log_files.insert(kind, Arc::new(rolling::hourly(log_dir, &file_name)));
        }
        tokio::spawn(Self::background_log_writer(log_files, receiver, batch_size, flush_interval));
        {
            let log_dir = log_dir.to_string();
            let file_prefix = file_prefix.to_string();
            tokio::spawn(async move {
                let retention_hours = 72;
                let cleanup_interval = Duration::from_secs(3600);
                loop {
                    Self::cleanup_old_logs(&log_dir, &file_prefix, retention_hours).await;
                    time::sleep(cleanup_interval).await;
                }
            });
        }
        Arc::new(Self { sender })
    }

    /// 记录一条报告，返回是否成功入队
    pub fn report(&self, kind: ReportKind, payload: Value) -> bool {
        let timestamp = match FixedOffset::east_opt(8 * 3600) {
            Some(tz) => Utc::now().with_timezone(&tz).to_rfc3339(),
            None => Utc::now().to_rfc3339(),
        };
        let content = json!({
            "timestamp": timestamp,
            "kind": kind.as_str(),
            "report": payload,
        })
        .to_string();

        match self.sender.try_send(Command::Entry { kind, content }) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(kind = kind.as_str(), "report channel full, dropping report");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// 把所有缓冲中的报告写盘，写完后返回
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.sender.send(Command::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
    }

    pub async fn shutdown(&self) {
        self.flush().await;
    }

    async fn background_log_writer(
        log_files: HashMap<ReportKind, Arc<RollingFileAppender>>,
        mut receiver: Receiver<Command>,
        batch_size: usize,
        flush_interval: u64,
    ) {
        let mut buffers: HashMap<ReportKind, Vec<String>> = HashMap::new();
        let mut interval = time::interval(Duration::from_millis(flush_interval));
        loop {
            tokio::select! {
                command = receiver.recv() => match command {
                    Some(Command::Entry { kind, content }) => {
                        let buffer = buffers.entry(kind).or_default();
                        buffer.push(content);
                        if buffer.len() >= batch_size {
                            if let Some(appender) = log_files.get(&kind) {
                                Self::write_logs_to_disk(appender.clone(), std::mem::take(buffer)).await;
                            }
                        }
                    }
                    Some(Command::Flush(ack)) => {
                        Self::drain(&log_files, &mut buffers).await;
                        let _ = ack.send(());
                    }
                    None => {
                        Self::drain(&log_files, &mut buffers).await;
                        break;
                    }
                },
                _ = interval.tick() => {
                    Self::drain(&log_files, &mut buffers).await;
                }
            }
        }
    }

    async fn drain(
        log_files: &HashMap<ReportKind, Arc<RollingFileAppender>>,
        buffers: &mut HashMap<ReportKind, Vec<String>>,
    ) {
        for (kind, buffer) in buffers.iter_mut() {
            if buffer.is_empty() {
                continue;
            }
            if let Some(appender) = log_files.get(kind) {
                Self::write_logs_to_disk(appender.clone(), std::mem::take(buffer)).await;
            }
        }
    }

    async fn write_logs_to_disk(file: Arc<RollingFileAppender>, lines: Vec<String>) {
        let content = lines.join("\n") + "\n";
        let written = task::spawn_blocking(move || {
            let mut writer = file.make_writer();
            writer.write_all(content.as_bytes())
        })
        .await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "failed to write report logs"),
            Err(e) => warn!(error = %e, "report writer task failed"),
        }
    }

    /// 只清理本前缀的过期文件
    async fn cleanup_old_logs(log_dir: &str, file_prefix: &str, retention_hours: u64) {
        use std::time::SystemTime;
        let retention = std::time::Duration::from_secs(retention_hours * 3600);
        let now = SystemTime::now();
        let mut dir = match tokio::fs::read_dir(log_dir).await {
            Ok(dir) => dir,
            Err(e) => {
                warn!(log_dir, error = %e, "failed to read report directory");
                return;
            }
        };
        while let Ok(Some(entry)) = dir.next_entry().await {
            if !entry.file_name().to_string_lossy().starts_with(file_prefix) {
                continue;
            }
            let Ok(modified) = entry.metadata().await.and_then(|m| m.modified()) else {
                continue;
            };
            if now.duration_since(modified).unwrap_or_default() > retention {
                let path = entry.path();
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %e, "failed to delete old report file");
                }
            }
        }
    }
}

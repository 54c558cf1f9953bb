// ワーカープールで受け渡すデータ型定義

use serde::Serialize;
use std::fmt;

/// ワーカーの役割
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerRole {
    Producer,
    Consumer,
    Worker,
}

impl WorkerRole {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Producer => "producer",
            Self::Consumer => "consumer",
            Self::Worker => "worker",
        }
    }
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// チャンネル上のメッセージ
///
/// `Terminate`は読み手のワーカー1つにつき1回だけ送られる
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage<T> {
    Task(T),
    Terminate,
}

/// `ignore_errors`有効時に下流へ転送される変換失敗
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{role}#{worker_id}: {message}")]
pub struct TransformFailure {
    pub role: WorkerRole,
    pub worker_id: usize,
    pub message: String,
}

impl TransformFailure {
    pub fn new(role: WorkerRole, worker_id: usize, error: &anyhow::Error) -> Self {
        Self {
            role,
            worker_id,
            message: format!("{error:#}"),
        }
    }
}

/// Producerの1タスク分の出力。失敗は型で区別される
pub type TransformOutcome<T> = Result<T, TransformFailure>;

/// 実行モード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// ワーカー0: 呼び出し元で逐次実行
    Foreground,
    /// ワーカースレッドで並列実行
    Background,
}

/// ワーカー1つ分の待ち時間テレメトリ
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerTimings {
    pub role: WorkerRole,
    pub worker_id: usize,
    pub items_processed: usize,
    pub failures: usize,
    /// 受信待ちの平均秒数
    pub avg_wait_get_secs: f64,
    /// 送信待ちの平均秒数（送信しないワーカーはNone）
    pub avg_wait_put_secs: Option<f64>,
}

/// 実行全体のサマリー
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub mode: ExecutionMode,
    pub description: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub total_tasks: usize,
    pub failures: usize,
    pub elapsed_secs: f64,
    pub avg_main_put_wait_secs: f64,
    pub workers: Vec<WorkerTimings>,
}

impl RunSummary {
    /// 1タスクあたりの平均秒数
    pub fn seconds_per_task(&self) -> f64 {
        self.elapsed_secs / self.total_tasks.max(1) as f64
    }

    /// 役割・指標ごとの平均待ち時間
    ///
    /// 例: `[("producer-get", 0.1), ("producer-put", 0.0), ("consumer-get", 0.3)]`
    pub fn wait_breakdown(&self) -> Vec<(String, f64)> {
        let mut breakdown: Vec<(String, f64, usize)> = Vec::new();
        let mut add = |key: String, value: f64| {
            match breakdown.iter_mut().find(|(k, _, _)| *k == key) {
                Some((_, sum, count)) => {
                    *sum += value;
                    *count += 1;
                }
                None => breakdown.push((key, value, 1)),
            }
        };

        for timing in &self.workers {
            add(format!("{}-get", timing.role), timing.avg_wait_get_secs);
            if let Some(put) = timing.avg_wait_put_secs {
                add(format!("{}-put", timing.role), put);
            }
        }

        breakdown
            .into_iter()
            .map(|(key, sum, count)| (key, sum / count as f64))
            .collect()
    }

    /// 完了時にログへ出すテレメトリ行
    pub fn telemetry_line(&self) -> String {
        let waits = self
            .wait_breakdown()
            .iter()
            .map(|(key, value)| format!("{key}: {value:.1}s"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut line = format!("Average wait: main put: {:.2}s", self.avg_main_put_wait_secs);
        if !waits.is_empty() {
            line.push_str(", ");
            line.push_str(&waits);
        }
        line.push_str(&format!(". Final speed: {:.3}s/it", self.seconds_per_task()));
        line
    }
}

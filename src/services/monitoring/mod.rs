// 進捗監視機能
// 処理進捗の報告、エラー通知、完了時のテレメトリ

pub mod implementations;
pub mod metrics;

// 公開API
pub use implementations::{ConsoleProgressReporter, NoOpProgressReporter};
pub use metrics::{format_seconds_adaptive, AvgMetric, EmaRate};

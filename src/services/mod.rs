// サービス層 - 機能別のヘルパー
// 各サービスは特定の責任を持ち、エンジン層から組み合わせて使われる

pub mod adapters;
pub mod config;
pub mod logging;
pub mod monitoring;

// 公開API - 各サービスの主要機能を明示的にエクスポート
pub use adapters::{producer_fn, CollectConsumer, ConsumeCount, FnConsumer, FnProducer};
pub use config::PoolConfig;
pub use logging::{LogConfig, LogFormat, LogGuard};
pub use monitoring::{ConsoleProgressReporter, NoOpProgressReporter};

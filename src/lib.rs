// multiproc - Producer / Consumer ワーカープール
//
// core: トレイト・型・エラー
// services: 関数アダプタ、設定、ログ、進捗表示
// engine: ワーカースレッドとプールのオーケストレーション
// cli: デモ用コマンドライン

pub mod cli;
pub mod core;
pub mod engine;
pub mod services;

pub use crate::core::{
    Consumer, ExecutionMode, ProcessingError, ProcessingResult, Producer, ProgressReporter,
    RunSummary, TransformFailure, TransformOutcome, WorkerRole, WorkerTimings,
};
pub use crate::engine::{map_parallel, produce_consume, ProducerConsumerPool, WorkerPool};
pub use crate::services::{
    producer_fn, CollectConsumer, ConsoleProgressReporter, ConsumeCount, FnConsumer, FnProducer,
    LogConfig, LogFormat, NoOpProgressReporter, PoolConfig,
};

// エンジン層 - ワーカースレッドとオーケストレーション
// コア層のトレイトとサービス層の部品を組み合わせてプールを提供

pub mod api;
pub mod consumer;
mod lifecycle;
pub mod pipeline;
pub mod producer;
pub mod worker_pool;

pub use api::{map_parallel, produce_consume};
pub use pipeline::ProducerConsumerPool;
pub use worker_pool::WorkerPool;

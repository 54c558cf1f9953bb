// 高レベル公開API
// プールを組み立てずに関数だけで並列処理するための便利な関数

use super::{ProducerConsumerPool, WorkerPool};
use crate::core::{ProcessingError, ProcessingResult};
use crate::services::{producer_fn, CollectConsumer, NoOpProgressReporter, PoolConfig};

/// `f`を各入力に並列適用し、出力を完了順で返す
///
/// `workers == 0` の場合は呼び出し元で順に処理するため、入力順が保たれる。
pub async fn map_parallel<I, O, F, It>(
    workers: usize,
    inputs: It,
    f: F,
) -> ProcessingResult<Vec<O>>
where
    I: Send + 'static,
    O: Send + 'static,
    F: FnMut(I) -> O + Send + Clone + 'static,
    It: IntoIterator<Item = I>,
{
    let mut pool = WorkerPool::new(
        workers,
        PoolConfig::default(),
        NoOpProgressReporter::new(),
        |_| producer_fn(f.clone()),
    )?;
    for input in inputs {
        pool.put(input).await?;
    }

    // ignore_errorsを有効にしていないので失敗は含まれない
    pool.run()
        .await?
        .into_iter()
        .map(|outcome| outcome.map_err(|failure| ProcessingError::internal(failure.into())))
        .collect()
}

/// `produce`を`producers`個、`consume`を`consumers`個のワーカーで流し、Consumerごとの収集結果を返す
pub async fn produce_consume<I, M, O, PF, CF, It>(
    producers: usize,
    consumers: usize,
    inputs: It,
    produce: PF,
    consume: CF,
) -> ProcessingResult<Vec<Vec<O>>>
where
    I: Send + 'static,
    M: Send + 'static,
    O: Send + 'static,
    PF: FnMut(I) -> M + Send + Clone + 'static,
    CF: FnMut(M) -> O + Send + Clone + 'static,
    It: IntoIterator<Item = I>,
{
    let mut pool = ProducerConsumerPool::new(
        producers,
        consumers,
        PoolConfig::default(),
        NoOpProgressReporter::new(),
        |_| producer_fn(produce.clone()),
        |_| CollectConsumer::new(consume.clone()),
    )?;
    for input in inputs {
        pool.put(input).await?;
    }
    pool.run().await
}

// 統合テスト用のProducer / Consumerとヘルパー
#![allow(dead_code)]

use multiproc::{
    Consumer, ProcessingResult, Producer, ProducerConsumerPool, ProgressReporter, TransformFailure,
    TransformOutcome, WorkerPool,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// ワーカー間で共有する呼び出し回数
#[derive(Clone, Default)]
pub struct CallCounters {
    setups: Arc<AtomicUsize>,
    completes: Arc<AtomicUsize>,
}

impl CallCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn setups(&self) -> usize {
        self.setups.load(Ordering::SeqCst)
    }

    pub fn completes(&self) -> usize {
        self.completes.load(Ordering::SeqCst)
    }
}

/// x -> x * 2
pub struct Doubler {
    counters: CallCounters,
}

impl Doubler {
    pub fn new() -> Self {
        Self::with_counters(CallCounters::new())
    }

    pub fn with_counters(counters: CallCounters) -> Self {
        Self { counters }
    }
}

impl Producer for Doubler {
    type Input = i64;
    type Output = i64;

    fn setup(&mut self) -> anyhow::Result<()> {
        self.counters.setups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn produce(&mut self, input: i64) -> anyhow::Result<i64> {
        Ok(input * 2)
    }
}

/// 指定した入力で失敗する x -> x * 2
pub struct FailingDoubler {
    fail_on: Vec<i64>,
}

impl FailingDoubler {
    pub fn new(fail_on: &[i64]) -> Self {
        Self {
            fail_on: fail_on.to_vec(),
        }
    }
}

impl Producer for FailingDoubler {
    type Input = i64;
    type Output = i64;

    fn produce(&mut self, input: i64) -> anyhow::Result<i64> {
        if self.fail_on.contains(&input) {
            anyhow::bail!("cannot double {input}");
        }
        Ok(input * 2)
    }
}

/// Consumerが受け取ったものの記録
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded<T> {
    pub setup_done: bool,
    pub items: Vec<T>,
    pub failures: Vec<TransformFailure>,
}

/// 受け取ったアイテムと失敗をそのまま記録するConsumer
pub struct RecordingConsumer<T> {
    counters: CallCounters,
    recorded: Recorded<T>,
}

impl<T> RecordingConsumer<T> {
    pub fn new() -> Self {
        Self::with_counters(CallCounters::new())
    }

    pub fn with_counters(counters: CallCounters) -> Self {
        Self {
            counters,
            recorded: Recorded {
                setup_done: false,
                items: Vec::new(),
                failures: Vec::new(),
            },
        }
    }
}

impl<T: Send + 'static> Consumer for RecordingConsumer<T> {
    type Item = T;
    type Output = Recorded<T>;

    fn setup(&mut self) -> anyhow::Result<()> {
        self.counters.setups.fetch_add(1, Ordering::SeqCst);
        self.recorded.setup_done = true;
        Ok(())
    }

    fn consume(&mut self, item: T) -> anyhow::Result<()> {
        self.recorded.items.push(item);
        Ok(())
    }

    fn consume_failure(&mut self, failure: &TransformFailure) {
        self.recorded.failures.push(failure.clone());
    }

    fn complete(self) -> anyhow::Result<Recorded<T>> {
        self.counters.completes.fetch_add(1, Ordering::SeqCst);
        Ok(self.recorded)
    }
}

/// 全タスクを投入してからrunする
pub async fn run_pipeline<P, C, R, I>(
    mut pool: ProducerConsumerPool<P, C, R>,
    inputs: I,
) -> ProcessingResult<Vec<C::Output>>
where
    P: Producer,
    C: Consumer<Item = P::Output>,
    R: ProgressReporter + 'static,
    I: IntoIterator<Item = P::Input>,
{
    for input in inputs {
        pool.put(input).await?;
    }
    pool.run().await
}

/// 全タスクを投入してからrunする
pub async fn run_pool<P, R, I>(
    mut pool: WorkerPool<P, R>,
    inputs: I,
) -> ProcessingResult<Vec<TransformOutcome<P::Output>>>
where
    P: Producer,
    R: ProgressReporter + 'static,
    I: IntoIterator<Item = P::Input>,
{
    for input in inputs {
        pool.put(input).await?;
    }
    pool.run().await
}

/// 全Consumerの記録アイテムを1つにまとめて昇順に並べる
pub fn sorted_items<T: Ord + Clone>(results: &[Recorded<T>]) -> Vec<T> {
    let mut items: Vec<T> = results.iter().flat_map(|r| r.items.clone()).collect();
    items.sort();
    items
}

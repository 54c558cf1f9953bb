use super::print_summary;
use crate::core::{Consumer, Producer, TransformFailure};
use crate::engine::ProducerConsumerPool;
use crate::services::{ConsoleProgressReporter, PoolConfig};
use anyhow::{Context, Result};
use serde::Serialize;
use std::time::Duration;

/// producer-consumerコマンドの引数
pub struct ProducerConsumerOptions {
    pub producers: usize,
    pub consumers: usize,
    pub count: usize,
    pub delay: Duration,
    pub verbose: bool,
    pub json: bool,
}

/// タスク番号を(番号, 2乗)に変換するProducer
pub struct SquareProducer {
    delay: Duration,
}

impl SquareProducer {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Producer for SquareProducer {
    type Input = u64;
    type Output = (u64, u64);

    fn produce(&mut self, task: u64) -> Result<(u64, u64)> {
        std::thread::sleep(self.delay);
        let square = task
            .checked_mul(task)
            .with_context(|| format!("{task}の2乗がu64に収まりません"))?;
        Ok((task, square))
    }
}

/// 1つのConsumerが集計した値
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SquareTotals {
    pub items: usize,
    pub sum: u64,
    pub max_task: Option<u64>,
    pub failures: usize,
}

/// 2乗値を合計するConsumer
#[derive(Default)]
pub struct SumConsumer {
    totals: SquareTotals,
}

impl Consumer for SumConsumer {
    type Item = (u64, u64);
    type Output = SquareTotals;

    fn setup(&mut self) -> Result<()> {
        self.totals = SquareTotals::default();
        Ok(())
    }

    fn consume(&mut self, (task, square): (u64, u64)) -> Result<()> {
        let sum = self.totals.sum;
        self.totals.sum = sum
            .checked_add(square)
            .with_context(|| format!("合計がu64に収まりません: {sum} + {square}"))?;
        self.totals.items += 1;
        self.totals.max_task = self.totals.max_task.max(Some(task));
        Ok(())
    }

    fn consume_failure(&mut self, _failure: &TransformFailure) {
        self.totals.failures += 1;
    }

    fn complete(self) -> Result<SquareTotals> {
        Ok(self.totals)
    }
}

pub async fn execute_producer_consumer(
    options: ProducerConsumerOptions,
) -> Result<Vec<SquareTotals>> {
    let config = PoolConfig::new()
        .with_total(options.count)
        .with_description("producer-consumer")
        .with_verbose(options.verbose);

    let delay = options.delay;
    let mut pool = ProducerConsumerPool::new(
        options.producers,
        options.consumers,
        config,
        ConsoleProgressReporter::new(),
        |_| SquareProducer::new(delay),
        |_| SumConsumer::default(),
    )?;

    tracing::info!(
        producers = options.producers,
        consumers = options.consumers,
        tasks = options.count,
        "producer-consumer started"
    );
    for task in 0..options.count as u64 {
        pool.put(task).await?;
    }
    let (totals, summary) = pool.run_with_summary().await?;

    for (index, total) in totals.iter().enumerate() {
        tracing::info!(
            consumer = index,
            items = total.items,
            sum = total.sum,
            "consumer result"
        );
    }
    let grand_total: u64 = totals.iter().map(|t| t.sum).sum();
    tracing::info!(sum = grand_total, "sum of squares");

    print_summary(&summary, options.json)?;
    Ok(totals)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(producers: usize, consumers: usize, count: usize) -> ProducerConsumerOptions {
        ProducerConsumerOptions {
            producers,
            consumers,
            count,
            delay: Duration::ZERO,
            verbose: false,
            json: false,
        }
    }

    #[test]
    fn test_sum_consumer_rejects_overflow() {
        let mut consumer = SumConsumer::default();
        consumer.consume((1, u64::MAX - 1)).unwrap();

        let error = consumer.consume((2, 4)).unwrap_err();
        assert!(error.to_string().contains("u64"));

        let totals = consumer.complete().unwrap();
        assert_eq!(totals.items, 1);
        assert_eq!(totals.sum, u64::MAX - 1);
    }

    #[test]
    fn test_square_producer_rejects_overflow() {
        let mut producer = SquareProducer::new(Duration::ZERO);
        assert_eq!(producer.produce(12).unwrap(), (12, 144));
        assert!(producer.produce(u64::MAX).is_err());
    }

    #[tokio::test]
    async fn test_execute_producer_consumer_background() {
        let totals = execute_producer_consumer(options(3, 2, 10)).await.unwrap();

        assert_eq!(totals.len(), 2);
        assert_eq!(totals.iter().map(|t| t.items).sum::<usize>(), 10);
        assert_eq!(totals.iter().map(|t| t.sum).sum::<u64>(), 285);
    }

    #[tokio::test]
    async fn test_execute_producer_consumer_foreground() {
        let totals = execute_producer_consumer(options(0, 0, 4)).await.unwrap();

        assert_eq!(
            totals,
            vec![SquareTotals {
                items: 4,
                sum: 14,
                max_task: Some(3),
                failures: 0,
            }]
        );
    }

    #[tokio::test]
    async fn test_execute_producer_consumer_rejects_half_foreground() {
        let error = execute_producer_consumer(options(0, 2, 4)).await.unwrap_err();
        assert!(error.to_string().contains("設定エラー"));
    }
}

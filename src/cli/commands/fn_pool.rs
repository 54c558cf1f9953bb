use super::print_summary;
use crate::engine::WorkerPool;
use crate::services::{ConsoleProgressReporter, FnProducer, PoolConfig};
use anyhow::Result;
use std::time::Duration;

/// fn-poolコマンドの引数
pub struct FnPoolOptions {
    pub workers: usize,
    pub count: usize,
    pub with_output: bool,
    pub ignore_errors: bool,
    pub fail_every: Option<usize>,
    pub delay: Duration,
    pub smoothing: f64,
    pub verbose: bool,
    pub json: bool,
}

/// デモ用の変換。一定時間かけて2乗し、`fail_every`件ごとに失敗する
pub fn slow_square(task: usize, delay: Duration, fail_every: Option<usize>) -> Result<usize> {
    std::thread::sleep(delay);
    if let Some(every) = fail_every.filter(|&every| every > 0) {
        if (task + 1) % every == 0 {
            anyhow::bail!("task {task} failed on purpose");
        }
    }
    Ok(task * task)
}

pub async fn execute_fn_pool(options: FnPoolOptions) -> Result<()> {
    let config = PoolConfig::new()
        .with_total(options.count)
        .with_description("fn-pool")
        .with_output(options.with_output)
        .with_ignore_errors(options.ignore_errors)
        .with_smoothing(options.smoothing)
        .with_verbose(options.verbose);

    let delay = options.delay;
    let fail_every = options.fail_every;
    let mut pool = WorkerPool::new(
        options.workers,
        config,
        ConsoleProgressReporter::new(),
        move |_| FnProducer::new(move |task: usize| slow_square(task, delay, fail_every)),
    )?;

    tracing::info!(workers = options.workers, tasks = options.count, "fn-pool started");
    for task in 0..options.count {
        pool.put(task).await?;
    }
    let (outputs, summary) = pool.run_with_summary().await?;

    if options.with_output {
        let succeeded: Vec<usize> = outputs
            .iter()
            .filter_map(|o| o.as_ref().ok().copied())
            .collect();
        let sum: usize = succeeded.iter().sum();
        tracing::info!(
            succeeded = succeeded.len(),
            failed = outputs.len() - succeeded.len(),
            sum,
            "fn-pool outputs collected"
        );
    }
    print_summary(&summary, options.json)
}

// Consumer - Producer出力を集約するワーカースレッド

use super::lifecycle::{spawn_worker, WorkerHandle};
use super::producer::{SharedReceiver, WorkerContext};
use crate::core::{
    Consumer, ProcessingError, ProcessingResult, ProgressReporter, TransformOutcome,
    WorkerMessage, WorkerTimings,
};
use crate::services::monitoring::AvgMetric;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// 単一Consumerワーカー
///
/// 終了シグナルを受け取ったら`complete()`を一度だけ呼び、その結果を`result_tx`に送る。
pub(crate) fn spawn_consumer<C, R>(
    ctx: WorkerContext,
    consumer: C,
    item_rx: SharedReceiver<WorkerMessage<TransformOutcome<C::Item>>>,
    result_tx: mpsc::UnboundedSender<C::Output>,
    reporter: Arc<R>,
) -> ProcessingResult<WorkerHandle>
where
    C: Consumer,
    R: ProgressReporter + 'static,
{
    spawn_worker(ctx.thread_name(), move || {
        run_consumer(ctx, consumer, item_rx, result_tx, reporter.as_ref())
    })
}

fn run_consumer<C, R>(
    ctx: WorkerContext,
    mut consumer: C,
    item_rx: SharedReceiver<WorkerMessage<TransformOutcome<C::Item>>>,
    result_tx: mpsc::UnboundedSender<C::Output>,
    reporter: &R,
) -> ProcessingResult<WorkerTimings>
where
    C: Consumer,
    R: ProgressReporter,
{
    consumer
        .setup()
        .map_err(|e| ProcessingError::setup(ctx.role, ctx.worker_id, e))?;

    let mut wait_get = AvgMetric::new();
    let mut items_processed = 0;
    let mut failures = 0;

    loop {
        let started = Instant::now();
        let message = item_rx.blocking_lock().blocking_recv();
        wait_get.update_duration(started.elapsed());

        match message {
            Some(WorkerMessage::Task(Ok(item))) => {
                items_processed += 1;
                if let Err(error) = consumer.consume(item) {
                    failures += 1;
                    ctx.handle_failure(error, reporter)?;
                }
            }
            // 上流の失敗はProducer側で報告済み
            Some(WorkerMessage::Task(Err(failure))) => consumer.consume_failure(&failure),
            Some(WorkerMessage::Terminate) | None => break,
        }
    }

    let output = consumer
        .complete()
        .map_err(|e| ProcessingError::transform(ctx.role, ctx.worker_id, e))?;
    result_tx
        .send(output)
        .map_err(|_| ProcessingError::channel("結果キューが閉じられました"))?;

    tracing::debug!(
        role = %ctx.role,
        worker_id = ctx.worker_id,
        items_processed,
        failures,
        "worker finished"
    );

    Ok(WorkerTimings {
        role: ctx.role,
        worker_id: ctx.worker_id,
        items_processed,
        failures,
        avg_wait_get_secs: wait_get.avg(),
        avg_wait_put_secs: None,
    })
}

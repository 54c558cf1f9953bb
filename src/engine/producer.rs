// Producer - タスクを変換するワーカースレッド
// ProducerConsumerPoolのProducerとWorkerPoolのワーカーで共通

use super::lifecycle::{spawn_worker, WorkerHandle};
use crate::core::{
    ProcessingError, ProcessingResult, Producer, ProgressReporter, TransformFailure,
    TransformOutcome, WorkerMessage, WorkerRole, WorkerTimings,
};
use crate::services::monitoring::AvgMetric;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// 複数ワーカーで共有する受信側
pub type SharedReceiver<T> = Arc<tokio::sync::Mutex<mpsc::Receiver<T>>>;

pub fn shared_receiver<T>(rx: mpsc::Receiver<T>) -> SharedReceiver<T> {
    Arc::new(tokio::sync::Mutex::new(rx))
}

/// ワーカーの識別とエラー方針
#[derive(Debug, Clone, Copy)]
pub struct WorkerContext {
    pub role: WorkerRole,
    pub worker_id: usize,
    pub ignore_errors: bool,
}

impl WorkerContext {
    pub fn new(role: WorkerRole, worker_id: usize, ignore_errors: bool) -> Self {
        Self {
            role,
            worker_id,
            ignore_errors,
        }
    }

    pub fn thread_name(&self) -> String {
        format!("{}-{}", self.role, self.worker_id)
    }

    /// 変換エラーの扱いを決める
    ///
    /// `ignore_errors`なら報告して失敗として下流へ流し、そうでなければ致命的エラーにする。
    pub fn handle_failure<R: ProgressReporter>(
        &self,
        error: anyhow::Error,
        reporter: &R,
    ) -> ProcessingResult<TransformFailure> {
        if !self.ignore_errors {
            return Err(ProcessingError::transform(self.role, self.worker_id, error));
        }
        let failure = TransformFailure::new(self.role, self.worker_id, &error);
        tracing::error!(
            role = %self.role,
            worker_id = self.worker_id,
            "Error in worker: {error:#}"
        );
        reporter.report_error(&failure);
        Ok(failure)
    }
}

/// Producer出力の送り先
pub enum OutputSink<T> {
    /// Consumer段への有界キュー
    Stage(mpsc::Sender<WorkerMessage<TransformOutcome<T>>>),
    /// WorkerPoolの出力キュー
    Collect(mpsc::UnboundedSender<TransformOutcome<T>>),
    /// 出力を捨てる
    Discard,
}

impl<T> OutputSink<T> {
    fn deliver(&self, outcome: TransformOutcome<T>) -> ProcessingResult<()> {
        match self {
            OutputSink::Stage(tx) => tx
                .blocking_send(WorkerMessage::Task(outcome))
                .map_err(|_| ProcessingError::channel("Consumerキューが閉じられました")),
            OutputSink::Collect(tx) => tx
                .send(outcome)
                .map_err(|_| ProcessingError::channel("出力キューが閉じられました")),
            OutputSink::Discard => Ok(()),
        }
    }

    /// 送信待ちが発生し得るかどうか
    fn may_block(&self) -> bool {
        matches!(self, OutputSink::Stage(_))
    }
}

/// 単一Producerワーカー
///
/// 終了シグナルかチャンネル終了まで、タスクを1件ずつ変換して`sink`に送る。
/// 1件処理するごとに`completed`を加算する。
pub(crate) fn spawn_producer<P, R>(
    ctx: WorkerContext,
    producer: P,
    task_rx: SharedReceiver<WorkerMessage<P::Input>>,
    sink: OutputSink<P::Output>,
    completed: Arc<AtomicUsize>,
    reporter: Arc<R>,
) -> ProcessingResult<WorkerHandle>
where
    P: Producer,
    R: ProgressReporter + 'static,
{
    spawn_worker(ctx.thread_name(), move || {
        run_producer(ctx, producer, task_rx, sink, completed, reporter.as_ref())
    })
}

fn run_producer<P, R>(
    ctx: WorkerContext,
    mut producer: P,
    task_rx: SharedReceiver<WorkerMessage<P::Input>>,
    sink: OutputSink<P::Output>,
    completed: Arc<AtomicUsize>,
    reporter: &R,
) -> ProcessingResult<WorkerTimings>
where
    P: Producer,
    R: ProgressReporter,
{
    producer
        .setup()
        .map_err(|e| ProcessingError::setup(ctx.role, ctx.worker_id, e))?;

    let mut wait_get = AvgMetric::new();
    let mut wait_put = AvgMetric::new();
    let mut items_processed = 0;
    let mut failures = 0;

    loop {
        let started = Instant::now();
        let message = task_rx.blocking_lock().blocking_recv();
        wait_get.update_duration(started.elapsed());

        let input = match message {
            Some(WorkerMessage::Task(input)) => input,
            // 終了シグナル、または送信側が全て閉じた
            Some(WorkerMessage::Terminate) | None => break,
        };

        let outcome = match producer.produce(input) {
            Ok(output) => Ok(output),
            Err(error) => {
                failures += 1;
                Err(ctx.handle_failure(error, reporter)?)
            }
        };
        items_processed += 1;

        let started = Instant::now();
        sink.deliver(outcome)?;
        wait_put.update_duration(started.elapsed());

        completed.fetch_add(1, Ordering::Relaxed);
    }

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
        avg_wait_put_secs: sink.may_block().then(|| wait_put.avg()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{producer_fn, ConsoleProgressReporter, FnProducer, NoOpProgressReporter};

    fn context(ignore_errors: bool) -> WorkerContext {
        WorkerContext::new(WorkerRole::Worker, 0, ignore_errors)
    }

    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_ignored_failure_is_logged_at_error_level() {
        let buffer = Arc::new(std::sync::Mutex::new(Vec::new()));
        let writer = Arc::clone(&buffer);
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::ERROR)
            .with_ansi(false)
            .with_writer(move || CapturedLogs(Arc::clone(&writer)))
            .finish();

        // NoOpでもエラーログは出る
        let reporter = NoOpProgressReporter::new();
        let failure = tracing::subscriber::with_default(subscriber, || {
            context(true).handle_failure(anyhow::anyhow!("bad input"), &reporter)
        })
        .unwrap();

        let logs = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("ERROR"));
        assert!(logs.contains("bad input"));
        assert_eq!(failure.message, "bad input");
    }

    #[test]
    fn test_failure_is_fatal_without_ignore_errors() {
        let error = context(false)
            .handle_failure(anyhow::anyhow!("bad input"), &NoOpProgressReporter::new())
            .unwrap_err();
        assert!(matches!(error, ProcessingError::TransformError { .. }));
    }

    #[tokio::test]
    async fn test_single_producer_processes_tasks() {
        let (task_tx, task_rx) = mpsc::channel(10);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let completed = Arc::new(AtomicUsize::new(0));

        let handle = spawn_producer(
            context(false),
            producer_fn(|x: u32| x * 10),
            shared_receiver(task_rx),
            OutputSink::Collect(out_tx),
            Arc::clone(&completed),
            Arc::new(NoOpProgressReporter::new()),
        )
        .unwrap();

        for i in 1..=3 {
            task_tx.send(WorkerMessage::Task(i)).await.unwrap();
        }
        task_tx.send(WorkerMessage::Terminate).await.unwrap();

        let timings = handle.join().await.unwrap();
        assert_eq!(timings.items_processed, 3);
        assert_eq!(timings.avg_wait_put_secs, None);
        assert_eq!(completed.load(Ordering::Relaxed), 3);

        let mut outputs = Vec::new();
        while let Some(outcome) = out_rx.recv().await {
            outputs.push(outcome.unwrap());
        }
        assert_eq!(outputs, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn test_producer_stops_when_channel_closes() {
        let (task_tx, task_rx) = mpsc::channel::<WorkerMessage<u32>>(4);
        drop(task_tx);

        let handle = spawn_producer(
            context(false),
            producer_fn(|x: u32| x),
            shared_receiver(task_rx),
            OutputSink::Discard,
            Arc::new(AtomicUsize::new(0)),
            Arc::new(NoOpProgressReporter::new()),
        )
        .unwrap();

        let timings = handle.join().await.unwrap();
        assert_eq!(timings.items_processed, 0);
    }

    #[tokio::test]
    async fn test_producer_forwards_failures_when_ignoring_errors() {
        let (task_tx, task_rx) = mpsc::channel(4);
        let (item_tx, mut item_rx) = mpsc::channel(4);
        let reporter = Arc::new(ConsoleProgressReporter::quiet());

        let failing = FnProducer::new(|x: i32| {
            if x % 2 == 1 {
                anyhow::bail!("odd input {x}");
            }
            Ok(x)
        });
        let handle = spawn_producer(
            WorkerContext::new(WorkerRole::Producer, 2, true),
            failing,
            shared_receiver(task_rx),
            OutputSink::Stage(item_tx),
            Arc::new(AtomicUsize::new(0)),
            Arc::clone(&reporter),
        )
        .unwrap();

        task_tx.send(WorkerMessage::Task(2)).await.unwrap();
        task_tx.send(WorkerMessage::Task(3)).await.unwrap();
        task_tx.send(WorkerMessage::Terminate).await.unwrap();

        let timings = handle.join().await.unwrap();
        assert_eq!(timings.items_processed, 2);
        assert_eq!(timings.failures, 1);
        assert!(timings.avg_wait_put_secs.is_some());
        assert_eq!(reporter.failures(), 1);

        assert_eq!(item_rx.recv().await, Some(WorkerMessage::Task(Ok(2))));
        match item_rx.recv().await {
            Some(WorkerMessage::Task(Err(failure))) => {
                assert_eq!(failure.role, WorkerRole::Producer);
                assert_eq!(failure.worker_id, 2);
                assert!(failure.message.contains("odd input 3"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_producer_error_is_fatal_by_default() {
        let (task_tx, task_rx) = mpsc::channel(4);
        let failing = FnProducer::new(|_: i32| -> anyhow::Result<i32> { anyhow::bail!("boom") });

        let handle = spawn_producer(
            context(false),
            failing,
            shared_receiver(task_rx),
            OutputSink::Discard,
            Arc::new(AtomicUsize::new(0)),
            Arc::new(NoOpProgressReporter::new()),
        )
        .unwrap();
        task_tx.send(WorkerMessage::Task(1)).await.unwrap();

        let error = handle.join().await.unwrap_err();
        assert!(matches!(error, ProcessingError::TransformError { .. }));
        assert!(error.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_producer_setup_failure() {
        struct Broken;

        impl Producer for Broken {
            type Input = ();
            type Output = ();

            fn setup(&mut self) -> anyhow::Result<()> {
                anyhow::bail!("no resource")
            }

            fn produce(&mut self, _input: ()) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let (_task_tx, task_rx) = mpsc::channel(1);
        let handle = spawn_producer(
            context(false),
            Broken,
            shared_receiver(task_rx),
            OutputSink::Discard,
            Arc::new(AtomicUsize::new(0)),
            Arc::new(NoOpProgressReporter::new()),
        )
        .unwrap();

        let error = handle.join().await.unwrap_err();
        assert!(matches!(error, ProcessingError::SetupError { .. }));
    }
}

// エラー処理の統合テスト
// 致命的エラーはハングせずErrとして返り、ignore_errors時は下流へ失敗として流れる
mod fixtures;

use fixtures::*;
use multiproc::{
    CollectConsumer, Consumer, FnConsumer, FnProducer, NoOpProgressReporter, PoolConfig,
    ProcessingError, Producer, ProducerConsumerPool, WorkerPool, WorkerRole,
};
use std::time::Duration;
use tokio::time::timeout;

const NO_HANG: Duration = Duration::from_secs(10);

#[tokio::test]
async fn test_fatal_producer_error_surfaces() {
    let pool = ProducerConsumerPool::new(
        2,
        2,
        PoolConfig::default(),
        NoOpProgressReporter::new(),
        |_| FailingDoubler::new(&[3]),
        |_| RecordingConsumer::<i64>::new(),
    )
    .unwrap();

    let result = timeout(NO_HANG, run_pipeline(pool, 0..50))
        .await
        .expect("pipeline hung after a producer error");

    match result {
        Err(ProcessingError::TransformError { role, source, .. }) => {
            assert_eq!(role, WorkerRole::Producer);
            assert!(source.to_string().contains("cannot double 3"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_fatal_consumer_error_surfaces() {
    let pool = ProducerConsumerPool::new(
        2,
        1,
        PoolConfig::default(),
        NoOpProgressReporter::new(),
        |_| FailingDoubler::new(&[]),
        |_| {
            FnConsumer::new(|x: i64| {
                if x == 10 {
                    anyhow::bail!("refusing {x}");
                }
                Ok(())
            })
        },
    )
    .unwrap();

    let result = timeout(NO_HANG, run_pipeline(pool, 0..100))
        .await
        .expect("pipeline hung after a consumer error");

    match result {
        Err(ProcessingError::TransformError { role, .. }) => {
            assert_eq!(role, WorkerRole::Consumer);
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_ignore_errors_routes_failures_to_consumers() {
    let pool = ProducerConsumerPool::new(
        3,
        2,
        PoolConfig::new().with_ignore_errors(true),
        NoOpProgressReporter::new(),
        |_| FailingDoubler::new(&[1, 4]),
        |_| RecordingConsumer::<i64>::new(),
    )
    .unwrap();

    let results = run_pipeline(pool, 0..6).await.unwrap();

    assert_eq!(sorted_items(&results), vec![0, 4, 6, 10]);
    let mut messages: Vec<String> = results
        .iter()
        .flat_map(|r| r.failures.iter().map(|f| f.message.clone()))
        .collect();
    messages.sort();
    assert_eq!(messages, vec!["cannot double 1", "cannot double 4"]);
    for result in &results {
        assert!(result.failures.iter().all(|f| f.role == WorkerRole::Producer));
    }
}

#[tokio::test]
async fn test_ignore_errors_in_foreground() {
    let mut pool = ProducerConsumerPool::new(
        0,
        0,
        PoolConfig::new().with_ignore_errors(true),
        NoOpProgressReporter::new(),
        |_| FailingDoubler::new(&[2]),
        |_| RecordingConsumer::<i64>::new(),
    )
    .unwrap();
    for x in 0..4 {
        pool.put(x).await.unwrap();
    }

    let (results, summary) = pool.run_with_summary().await.unwrap();

    assert_eq!(results[0].items, vec![0, 2, 6]);
    assert_eq!(results[0].failures.len(), 1);
    assert_eq!(summary.failures, 1);
}

#[tokio::test]
async fn test_consumer_errors_ignored_keep_consuming() {
    let pool = ProducerConsumerPool::new(
        1,
        1,
        PoolConfig::new().with_ignore_errors(true),
        NoOpProgressReporter::new(),
        |_| FailingDoubler::new(&[]),
        |_| {
            FnConsumer::new(|x: i64| {
                if x % 4 == 0 {
                    anyhow::bail!("multiple of four: {x}");
                }
                Ok(())
            })
        },
    )
    .unwrap();

    let results = run_pipeline(pool, 0..10).await.unwrap();

    // 0, 4, 8, 12, 16 (入力0, 2, 4, 6, 8) が失敗
    assert_eq!(results[0].consumed, 5);
}

#[tokio::test]
async fn test_setup_error_surfaces() {
    struct Unready;

    impl Producer for Unready {
        type Input = i64;
        type Output = i64;

        fn setup(&mut self) -> anyhow::Result<()> {
            anyhow::bail!("resource unavailable")
        }

        fn produce(&mut self, input: i64) -> anyhow::Result<i64> {
            Ok(input)
        }
    }

    let pool = WorkerPool::new(2, PoolConfig::default(), NoOpProgressReporter::new(), |_| {
        Unready
    })
    .unwrap();

    let result = timeout(NO_HANG, run_pool(pool, 0..20))
        .await
        .expect("pool hung after a setup error");
    assert!(matches!(result, Err(ProcessingError::SetupError { .. })));
}

#[tokio::test]
async fn test_foreground_setup_error_is_reported_by_new() {
    struct Unready;

    impl Consumer for Unready {
        type Item = i64;
        type Output = ();

        fn setup(&mut self) -> anyhow::Result<()> {
            anyhow::bail!("no sink")
        }

        fn consume(&mut self, _item: i64) -> anyhow::Result<()> {
            Ok(())
        }

        fn complete(self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    let result = ProducerConsumerPool::new(
        0,
        0,
        PoolConfig::default(),
        NoOpProgressReporter::new(),
        |_| Doubler::new(),
        |_| Unready,
    );
    assert!(matches!(
        result,
        Err(ProcessingError::SetupError {
            role: WorkerRole::Consumer,
            ..
        })
    ));
}

#[tokio::test]
async fn test_panicking_worker_is_reported() {
    let pool = WorkerPool::new(1, PoolConfig::default(), NoOpProgressReporter::new(), |_| {
        FnProducer::new(|x: i64| -> anyhow::Result<i64> {
            if x == 2 {
                panic!("worker exploded");
            }
            Ok(x)
        })
    })
    .unwrap();

    let result = timeout(NO_HANG, run_pool(pool, 0..10))
        .await
        .expect("pool hung after a panic");
    assert!(matches!(result, Err(ProcessingError::TaskError { .. })));
}

#[tokio::test]
async fn test_failing_complete_surfaces() {
    struct Stubborn;

    impl Consumer for Stubborn {
        type Item = i64;
        type Output = ();

        fn consume(&mut self, _item: i64) -> anyhow::Result<()> {
            Ok(())
        }

        fn complete(self) -> anyhow::Result<()> {
            anyhow::bail!("cannot flush")
        }
    }

    let pool = ProducerConsumerPool::new(
        1,
        2,
        PoolConfig::default(),
        NoOpProgressReporter::new(),
        |_| Doubler::new(),
        |_| Stubborn,
    )
    .unwrap();

    let result = timeout(NO_HANG, run_pipeline(pool, 0..5))
        .await
        .expect("pipeline hung after complete() failed");
    assert!(matches!(
        result,
        Err(ProcessingError::TransformError {
            role: WorkerRole::Consumer,
            ..
        })
    ));
}

#[tokio::test]
async fn test_worker_pool_ignore_errors_keeps_failures_in_place() {
    let pool = WorkerPool::new(
        2,
        PoolConfig::new().with_ignore_errors(true),
        NoOpProgressReporter::new(),
        |_| FailingDoubler::new(&[0, 5]),
    )
    .unwrap();

    let outputs = run_pool(pool, 0..8).await.unwrap();

    assert_eq!(outputs.len(), 8);
    let failures: Vec<_> = outputs.iter().filter_map(|o| o.as_ref().err()).collect();
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().all(|f| f.role == WorkerRole::Worker));

    let mut succeeded: Vec<i64> = outputs.into_iter().filter_map(Result::ok).collect();
    succeeded.sort();
    assert_eq!(succeeded, vec![2, 4, 6, 8, 12, 14]);
}

#[tokio::test]
async fn test_put_after_failure_is_rejected() {
    let mut pool = ProducerConsumerPool::new(
        1,
        1,
        PoolConfig::new().with_queue_factor(1),
        NoOpProgressReporter::new(),
        |_| FailingDoubler::new(&[0]),
        |_| CollectConsumer::<_, i64, i64>::new(|x: i64| x),
    )
    .unwrap();

    // 最初のタスクでProducerが停止するので、いずれput()がエラーになる
    let mut first_error = None;
    for x in 0..100 {
        if let Err(error) = pool.put(x).await {
            first_error = Some(error);
            break;
        }
    }

    let error = first_error.expect("put() never failed");
    assert!(matches!(
        error,
        ProcessingError::TransformError {
            role: WorkerRole::Producer,
            ..
        }
    ));
    assert!(pool.put(1).await.is_err());
}

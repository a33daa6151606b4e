#[cfg(test)]
mod tests {
    use stockflow::{
        errors::{ExecutorError, TaskError},
        model::{PoolState, ShutdownReport},
        pool::Config,
        Product,
        TaskExecutor,
    };
    use std::{
        collections::HashSet,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        time::{Duration, Instant},
    };
    use tokio_util::sync::CancellationToken;

    fn executor(workers: usize) -> TaskExecutor {
        TaskExecutor::with_config(Config::default().with_workers(workers))
    }

    fn products(n: u64) -> Vec<Product> {
        (0..n).map(|i| Product::new(i, format!("p{i}"), 10.0 + i as f64, 5)).collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_submit_parallel_keeps_submission_order() {
        println!("\n=== TEST: submit_parallel order ===");
        let executor = executor(4);

        // Earlier items sleep longer so they finish last.
        let handles = executor
            .submit_parallel((0..8u64).collect(), |i| {
                std::thread::sleep(Duration::from_millis(40 - i * 5));
                Ok::<_, String>(i * 10)
            })
            .unwrap();

        let mut values = Vec::new();
        for handle in handles {
            values.push(handle.await.unwrap());
        }
        assert_eq!(values, (0..8).map(|i| i * 10).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_submit_parallel_failures_stay_on_their_handle() {
        println!("\n=== TEST: isolated task failures ===");
        let executor = executor(4);

        let handles = executor
            .submit_parallel((0..6).collect(), |i: i32| {
                if i == 2 {
                    return Err("bad item");
                }
                if i == 4 {
                    panic!("boom");
                }
                Ok(i)
            })
            .unwrap();

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await);
        }

        assert_eq!(outcomes[0], Ok(0));
        assert_eq!(outcomes[2], Err(TaskError::Failed("bad item".into())));
        assert!(matches!(outcomes[4], Err(TaskError::Panic(_))));
        assert_eq!(outcomes[5], Ok(5));
        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_for_each_visits_every_item_once() {
        println!("\n=== TEST: for_each_parallel ===");
        let executor = executor(4);
        let seen = Arc::new(Mutex::new(HashSet::new()));
        let visits = Arc::new(AtomicUsize::new(0));

        let (seen_in, visits_in) = (seen.clone(), visits.clone());
        let handles = executor
            .for_each_parallel(products(100), move |p| {
                visits_in.fetch_add(1, Ordering::SeqCst);
                seen_in.lock().unwrap().insert(p.id);
                Ok::<_, String>(())
            })
            .unwrap();

        assert_eq!(handles.len(), 100);
        for handle in handles {
            assert_eq!(handle.await, Ok(()));
        }
        assert_eq!(visits.load(Ordering::SeqCst), 100);
        assert_eq!(seen.lock().unwrap().len(), 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_update_all_sync_tolerates_one_failure() {
        println!("\n=== TEST: update_all_sync partial failure ===");
        let executor = executor(4);
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let report = executor
            .update_all_sync(products(10), move |p: &Product| {
                counter.fetch_add(1, Ordering::SeqCst);
                if p.id == 3 {
                    return Err("price feed unavailable");
                }
                Ok(Product { price: p.price * 2.0, ..p.clone() })
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 10);
        assert_eq!(report.failed, vec![3]);
        assert_eq!(report.updated(), 9);
        for (i, p) in report.items.iter().enumerate() {
            assert_eq!(p.id, i as u64);
            let original = 10.0 + i as f64;
            if i == 3 {
                assert_eq!(p.price, original);
            } else {
                assert_eq!(p.price, original * 2.0);
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_update_all_sync_survives_panics() {
        println!("\n=== TEST: update_all_sync panic ===");
        let executor = executor(2);

        let report = executor
            .update_all_sync(vec![1, 2, 3], |n: &i32| {
                if *n == 2 {
                    panic!("corrupt record");
                }
                Ok::<_, String>(n * 100)
            })
            .await
            .unwrap();

        assert_eq!(report.items, vec![100, 2, 300]);
        assert_eq!(report.failed, vec![1]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_update_all_sync_interruption_is_propagated() {
        println!("\n=== TEST: update_all_sync interruption ===");
        let executor = executor(2);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = executor
            .update_all_sync_until(vec![1, 2, 3, 4], |n: &i32| {
                std::thread::sleep(Duration::from_millis(200));
                Ok::<_, String>(*n)
            }, &cancel)
            .await;

        assert_eq!(result.err(), Some(ExecutorError::Interrupted));
        assert!(cancel.is_cancelled(), "caller's cancellation must stay set");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_compute_all_returns_values_in_input_order() {
        println!("\n=== TEST: compute_all success ===");
        let executor = executor(4);

        let values = executor
            .compute_all((0..12u64).collect(), |i| {
                std::thread::sleep(Duration::from_millis((12 - i) * 2));
                Ok::<_, String>(format!("item-{i}"))
            })
            .await
            .unwrap();

        assert_eq!(values, (0..12).map(|i| format!("item-{i}")).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_compute_all_fails_whole_batch_on_one_failure() {
        println!("\n=== TEST: compute_all fail-fast ===");
        let executor = executor(4);

        let result = executor
            .compute_all((0..10).collect(), |i: i32| {
                if i == 6 {
                    return Err(format!("item {i} rejected"));
                }
                Ok(i * 2)
            })
            .await;

        match result {
            Err(ExecutorError::Aggregate { index, source }) => {
                assert_eq!(index, 6);
                assert_eq!(source, TaskError::Failed("item 6 rejected".into()));
            }
            other => panic!("expected aggregate failure, got {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_compute_all_on_empty_input() {
        let executor = executor(2);
        let values = executor
            .compute_all(Vec::<u8>::new(), |b| Ok::<_, String>(b))
            .await
            .unwrap();
        assert!(values.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_batch_with_delay_spaces_batches() {
        println!("\n=== TEST: batch_with_delay timing ===");
        let executor = executor(4);
        let delay = Duration::from_millis(40);
        let started = Instant::now();
        let log = Arc::new(Mutex::new(Vec::new()));

        let log_in = log.clone();
        let report = executor
            .batch_with_delay((0..5u32).collect(), move |i| {
                log_in.lock().unwrap().push((i, started.elapsed()));
                Ok::<_, String>(())
            }, 2, delay)
            .await
            .unwrap();

        assert_eq!(report.batches, 3);
        assert_eq!(report.items, 5);
        assert_eq!(report.failed_items, 0);

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 5);
        for (item, elapsed) in log.iter() {
            let batch = item / 2;
            assert!(
                *elapsed >= delay * batch,
                "item {} of batch {} ran after {:?}",
                item, batch, elapsed
            );
        }

        // Batches run in order: every item of batch i is logged before batch i + 1.
        let batch_order: Vec<u32> = log.iter().map(|(item, _)| item / 2).collect();
        assert!(batch_order.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_batch_with_delay_counts_failed_items() {
        let executor = executor(4);
        let report = executor
            .batch_with_delay((0..6).collect(), |i: i32| {
                if i % 3 == 0 {
                    return Err("downstream rejected");
                }
                Ok(())
            }, 3, Duration::from_millis(1))
            .await
            .unwrap();

        assert_eq!(report.batches, 2);
        assert_eq!(report.failed_items, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_batch_with_delay_times_out() {
        println!("\n=== TEST: batch_with_delay timeout ===");
        let executor = TaskExecutor::with_config(
            Config::default()
                .with_workers(2)
                .with_batch_grace(Duration::from_millis(50)),
        );

        let result = executor
            .batch_with_delay((0..4).collect(), |_: i32| {
                std::thread::sleep(Duration::from_millis(300));
                Ok::<_, String>(())
            }, 1, Duration::from_millis(10))
            .await;

        match result {
            Err(ExecutorError::BatchTimedOut { dispatched, total }) => {
                assert_eq!(total, 4);
                assert!(dispatched < total);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_batch_with_delay_calls_do_not_queue_behind_each_other() {
        println!("\n=== TEST: concurrent batch_with_delay calls ===");
        let executor = TaskExecutor::with_config(
            Config::default()
                .with_workers(4)
                .with_batch_grace(Duration::from_millis(100)),
        );

        let slow = executor.batch_with_delay(
            (0..3).collect(),
            |_: i32| Ok::<_, String>(()),
            1,
            Duration::from_millis(300),
        );
        let fast = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let started = Instant::now();
            let report = executor
                .batch_with_delay(vec![1], |_: i32| Ok::<_, String>(()), 1, Duration::from_millis(10))
                .await;
            (report, started.elapsed())
        };

        let (slow, (fast, fast_elapsed)) = tokio::join!(slow, fast);

        let fast = fast.unwrap();
        assert_eq!((fast.batches, fast.items, fast.failed_items), (1, 1, 0));
        assert!(fast_elapsed < Duration::from_millis(100), "fast call took {:?}", fast_elapsed);
        assert_eq!(slow.unwrap().batches, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_batch_with_delay_interruption_is_propagated() {
        println!("\n=== TEST: batch_with_delay interruption ===");
        let executor = executor(2);
        let cancel = CancellationToken::new();
        let ran = Arc::new(AtomicUsize::new(0));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            trigger.cancel();
        });

        let counter = ran.clone();
        let result = executor
            .batch_with_delay_until((0..5).collect(), move |_: i32| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(())
            }, 1, Duration::from_millis(100), &cancel)
            .await;

        assert_eq!(result, Err(ExecutorError::Interrupted));
        assert!(cancel.is_cancelled(), "caller's cancellation must stay set");

        let at_interrupt = ran.load(Ordering::SeqCst);
        assert!(at_interrupt < 5);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(ran.load(Ordering::SeqCst), at_interrupt, "no batch may start after the interrupt");
    }

    #[tokio::test]
    async fn test_batch_with_delay_rejects_zero_batch_size() {
        let executor = executor(1);
        let result = executor
            .batch_with_delay(vec![1], |_: i32| Ok::<_, String>(()), 0, Duration::ZERO)
            .await;
        assert_eq!(result, Err(ExecutorError::InvalidBatchSize));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancel_before_start() {
        println!("\n=== TEST: cancellation before start ===");
        let executor = executor(1);

        let mut handles = executor
            .submit_parallel(vec![150u64, 0], |ms| {
                std::thread::sleep(Duration::from_millis(ms));
                Ok::<_, String>(ms)
            })
            .unwrap();

        let second = handles.pop().unwrap();
        let first = handles.pop().unwrap();
        second.cancel();
        assert!(second.is_cancelled());

        assert_eq!(second.await, Err(TaskError::Cancelled));
        assert_eq!(first.await, Ok(150));
    }

    #[tokio::test]
    async fn test_handle_timeout() {
        let executor = executor(1);
        let handle = executor
            .submit_parallel(vec![()], |_| {
                std::thread::sleep(Duration::from_millis(200));
                Ok::<_, String>(())
            })
            .unwrap()
            .remove(0);

        let result = handle.await_timeout(Duration::from_millis(20)).await;
        assert_eq!(result, Err(TaskError::Timeout));
    }

    #[tokio::test]
    async fn test_shutdown_twice_is_a_noop() {
        println!("\n=== TEST: idempotent shutdown ===");
        let executor = executor(4);
        assert_eq!(executor.metrics().live_workers, 4);

        assert_eq!(executor.shutdown().await, ShutdownReport::Graceful);
        assert_eq!(executor.shutdown().await, ShutdownReport::AlreadyTerminated);

        assert_eq!(executor.state(), PoolState::Terminated);
        assert_eq!(executor.metrics().live_workers, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shutdown_drains_queued_work() {
        let executor = executor(2);
        let handles = executor
            .submit_parallel((0..6).collect(), |i: i32| {
                std::thread::sleep(Duration::from_millis(10));
                Ok::<_, String>(i)
            })
            .unwrap();

        assert_eq!(executor.shutdown().await, ShutdownReport::Graceful);
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await, Ok(i as i32));
        }
        let metrics = executor.metrics();
        assert_eq!(metrics.completed_tasks, 6);
        assert_eq!(metrics.active_tasks, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_forced_shutdown_abandons_slow_work() {
        println!("\n=== TEST: forced shutdown ===");
        let executor = executor(1);
        let handles = executor
            .submit_parallel(vec![0, 1, 2], |i: i32| {
                std::thread::sleep(Duration::from_millis(300));
                Ok::<_, String>(i)
            })
            .unwrap();

        let report = executor.shutdown_timeout(Duration::from_millis(20)).await;
        match report {
            ShutdownReport::Forced { abandoned } => assert_eq!(abandoned, 3),
            other => panic!("expected forced shutdown, got {:?}", other),
        }
        assert_eq!(executor.metrics().live_workers, 0);

        for handle in handles {
            assert_eq!(handle.await, Err(TaskError::Abandoned));
        }
        assert_eq!(executor.shutdown().await, ShutdownReport::AlreadyTerminated);
    }

    #[tokio::test]
    async fn test_rejects_work_after_shutdown() {
        let executor = executor(2);
        executor.shutdown().await;

        let err = executor.submit_parallel(vec![1], |i: i32| Ok::<_, String>(i)).err();
        assert_eq!(err, Some(ExecutorError::NotAccepting(PoolState::Terminated)));

        let err = executor.compute_all(vec![1], |i: i32| Ok::<_, String>(i)).await.err();
        assert_eq!(err, Some(ExecutorError::NotAccepting(PoolState::Terminated)));

        let err = executor
            .batch_with_delay(vec![1], |_: i32| Ok::<_, String>(()), 1, Duration::ZERO)
            .await
            .err();
        assert_eq!(err, Some(ExecutorError::NotAccepting(PoolState::Terminated)));
    }
}

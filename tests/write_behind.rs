// A write-behind setup: the store serves reads and writes synchronously while a
// partitioned executor persists every write in the background, one key at a
// time.

use std::{
    sync::{mpsc, Arc},
    thread,
    time::Duration,
};

use heapcache::{
    pool::ThreadPool, OnHeapStore, PartitionedExecutor, StoreBuilder, StoreError,
};
use parking_lot::Mutex;

const LONG: Duration = Duration::from_secs(10);

type Backend = Arc<Mutex<Vec<(u32, u32)>>>;

fn executor(partition_count: usize) -> PartitionedExecutor {
    let pool = Arc::new(ThreadPool::new("write-behind-test-{}", 4));
    PartitionedExecutor::new(partition_count, pool).expect("non-zero partitions")
}

#[test]
fn writes_reach_the_backend_in_order_per_key() {
    let store: OnHeapStore<u32, u32> = StoreBuilder::new(1_000).build();
    let executor = executor(8);
    let backend: Backend = Arc::default();

    for version in 0..50u32 {
        for key in 0..10u32 {
            store.put(key, version);
            let backend = Arc::clone(&backend);
            executor
                .submit(&key, move || backend.lock().push((key, version)))
                .expect("running");
        }
    }

    executor.shutdown();
    assert!(executor.await_termination(LONG));

    let backend = backend.lock();
    assert_eq!(backend.len(), 500);
    for key in 0..10u32 {
        let versions: Vec<_> = backend
            .iter()
            .filter(|(k, _)| *k == key)
            .map(|(_, v)| *v)
            .collect();
        assert_eq!(versions, (0..50).collect::<Vec<_>>());
        assert_eq!(store.get(&key), Ok(Some(49)));
    }
}

#[test]
fn immediate_shutdown_interrupts_a_task_waiting_on_a_computation() {
    let store: OnHeapStore<u32, u32> = StoreBuilder::new(16).build();
    let executor = executor(2);

    // A computation that holds the key until told to finish.
    let (computing_tx, computing_rx) = mpsc::channel();
    let (finish_tx, finish_rx) = mpsc::channel::<()>();
    let owner = {
        let store = store.clone();
        thread::spawn(move || {
            store.compute_if_absent(1, |_| {
                computing_tx.send(()).expect("test alive");
                finish_rx.recv().expect("test alive");
                Some(10)
            })
        })
    };
    computing_rx.recv().expect("owner alive");

    let (waiting_tx, waiting_rx) = mpsc::channel();
    let reader = {
        let store = store.clone();
        executor
            .submit(&1, move || {
                waiting_tx.send(()).expect("test alive");
                store.get(&1)
            })
            .expect("running")
    };
    waiting_rx.recv().expect("reader alive");
    // Give the reader time to block on the pending computation.
    thread::sleep(Duration::from_millis(50));

    assert!(executor.shutdown_now().is_empty());
    assert_eq!(reader.join().expect("task ran"), Err(StoreError::Interrupted));
    assert!(executor.await_termination(LONG));

    // The computation itself is unaffected.
    finish_tx.send(()).expect("owner alive");
    assert_eq!(owner.join().expect("owner panicked"), Ok(Some(10)));
    assert_eq!(store.get(&1), Ok(Some(10)));
}

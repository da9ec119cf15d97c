use std::{
    path::Path,
    sync::atomic::{AtomicUsize, Ordering},
    sync::Arc,
    thread,
};

use heapcache::{OnHeapStore, StoreBuilder};
use paste::paste;

const NUM_THREADS: u8 = 16;
const FILE: &str = "./Cargo.toml";

fn get_file_size(thread_id: u8, path: impl AsRef<Path>, call_counter: &AtomicUsize) -> Option<u64> {
    println!("get_file_size() called by thread {}.", thread_id);
    call_counter.fetch_add(1, Ordering::AcqRel);
    std::fs::metadata(path).ok().map(|m| m.len())
}

fn try_get_file_size(
    thread_id: u8,
    path: impl AsRef<Path>,
    call_counter: &AtomicUsize,
) -> std::io::Result<Option<u64>> {
    println!("try_get_file_size() called by thread {}.", thread_id);
    call_counter.fetch_add(1, Ordering::AcqRel);
    Ok(Some(std::fs::metadata(path)?.len()))
}

macro_rules! generate_test_compute_if_absent {
    ($name:ident, $store_init:expr) => {
        paste! {
            #[test]
            fn [<test_ $name _compute_if_absent>]() {
                let store: OnHeapStore<String, u64> = $store_init;
                let call_counter = Arc::new(AtomicUsize::default());

                let threads: Vec<_> = (0..NUM_THREADS)
                    .map(|thread_id| {
                        let my_store = store.clone();
                        let my_call_counter = Arc::clone(&call_counter);
                        thread::spawn(move || {
                            println!("Thread {} started.", thread_id);

                            let key = "key1".to_string();
                            let value = match thread_id % 2 {
                                0 => my_store.compute_if_absent(key.clone(), |_key| {
                                    get_file_size(thread_id, FILE, &my_call_counter)
                                }),
                                1 => my_store.try_compute_if_absent(key.clone(), |_key| {
                                    try_get_file_size(thread_id, FILE, &my_call_counter)
                                }),
                                _ => unreachable!(),
                            }
                            .expect("Failed to compute");

                            assert!(value.is_some());
                            assert!(my_store.contains_key(&key));

                            println!(
                                "Thread {} got the value. (len: {})",
                                thread_id,
                                value.unwrap()
                            );
                        })
                    })
                    .collect();

                threads
                    .into_iter()
                    .for_each(|t| t.join().expect("Thread failed"));

                assert_eq!(call_counter.load(Ordering::Acquire), 1);
                assert_eq!(store.stats().compute_success_count(), 1);
            }
        }
    };
}

generate_test_compute_if_absent!(store, StoreBuilder::new(100).build());
generate_test_compute_if_absent!(single_segment_store, StoreBuilder::new(100).segments(1).build());
generate_test_compute_if_absent!(unbounded_store, StoreBuilder::unbounded().build());

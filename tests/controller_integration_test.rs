use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tempfile::NamedTempFile;
use workqueue::{
    stop_channel, Queue, QueueMetrics, RateLimitingQueue, RateLimitingWorkQueue, ResourceType, Settings,
    SharedInformer, SharedInformerFactory,
};

mod fixtures;
use fixtures::{object_keys, sample_settings_toml, wait_until, ListingInformer};

fn settings_from_file(name: &str) -> Settings {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", sample_settings_toml(name)).unwrap();
    Settings::from_file(file.path()).unwrap()
}

/// Informers feed a rate-limited queue, workers retry failures, and everything shuts
/// down cleanly once reconciled
#[test]
fn test_informers_feed_workers_until_reconciled() {
    let settings = settings_from_file("integration");
    let metrics = QueueMetrics::new();
    let queue: Arc<RateLimitingWorkQueue<String>> =
        Arc::new(settings.build_queue(Some(Arc::new(metrics.clone()))).unwrap());

    let factory = SharedInformerFactory::new(settings.default_resync());
    let runs = Arc::new(AtomicUsize::new(0));
    let mut expected = Vec::new();
    for resource in ["esam/v1/equipment", "services/v1/qrcodes"] {
        let keys = object_keys(resource, 5);
        expected.extend(keys.iter().cloned());
        let queue = queue.clone();
        let runs = runs.clone();
        factory.informer_for(ResourceType::new(resource), move |_| -> Arc<dyn SharedInformer> {
            Arc::new(ListingInformer::new(keys, queue, runs))
        });
    }

    // Each key fails once before it succeeds
    let reconciled: Arc<Mutex<FxHashMap<String, usize>>> = Arc::new(Mutex::new(FxHashMap::default()));
    let workers: Vec<_> = (0..settings.queue.workers)
        .map(|_| {
            let queue = queue.clone();
            let reconciled = reconciled.clone();
            thread::spawn(move || {
                while let Some(key) = queue.get() {
                    if queue.num_requeues(&key) == 0 {
                        queue.add_rate_limited(key.clone());
                    } else {
                        queue.forget(&key);
                        *reconciled.lock().entry(key.clone()).or_insert(0) += 1;
                    }
                    queue.done(&key);
                }
            })
        })
        .collect();

    let (stop, signal) = stop_channel();
    factory.start(&signal);
    factory.start(&signal);

    assert!(wait_until(|| reconciled.lock().len() == expected.len()));
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    stop.stop();
    factory.shutdown();
    queue.shut_down_with_drain();
    for worker in workers {
        worker.join().unwrap();
    }

    let reconciled = reconciled.lock();
    for key in &expected {
        assert_eq!(reconciled.get(key), Some(&1), "{key}");
        assert_eq!(queue.num_requeues(key), 0);
    }

    let data = metrics.snapshot("integration").unwrap();
    assert_eq!(data.retries, expected.len() as u64);
    assert_eq!(data.completions, 2 * expected.len() as u64);
}

/// A drain in progress holds until the last worker finishes its item
#[test]
fn test_drain_waits_for_slow_worker() {
    let settings = settings_from_file("drain");
    let queue: Arc<RateLimitingWorkQueue<String>> = Arc::new(settings.build_queue(None).unwrap());
    queue.add("slow".to_string());
    let item = queue.get().unwrap();

    let drainer = {
        let queue = queue.clone();
        thread::spawn(move || queue.shut_down_with_drain())
    };
    assert!(wait_until(|| queue.shutting_down()));
    thread::sleep(Duration::from_millis(20));
    assert!(!drainer.is_finished());

    queue.done(&item);
    drainer.join().unwrap();
    assert_eq!(queue.get(), None);
}

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use workqueue::{Queue, RateLimitingWorkQueue, SharedInformer, StopSignal};

/// Poll until `check` holds or five seconds pass
pub fn wait_until(check: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    check()
}

/// Sample TOML settings with fast retries and a named queue
pub fn sample_settings_toml(name: &str) -> String {
    format!(
        r#"
[queue]
name = "{name}"
heartbeat_ms = 1000
workers = 3

[rate_limiter]
base_delay_ms = 1
max_delay_ms = 50
qps = 1000.0
burst = 1000

[factory]
default_resync_secs = 0

[logging]
level_filter = "debug"
"#
    )
}

/// Informer that pushes a fixed set of keys into a queue once, then waits for stop
pub struct ListingInformer {
    pub keys: Vec<String>,
    pub queue: Arc<RateLimitingWorkQueue<String>>,
    pub runs: Arc<AtomicUsize>,
    pub stopped: AtomicBool,
}

impl ListingInformer {
    pub fn new(keys: Vec<String>, queue: Arc<RateLimitingWorkQueue<String>>, runs: Arc<AtomicUsize>) -> Self {
        Self {
            keys,
            queue,
            runs,
            stopped: AtomicBool::new(false),
        }
    }
}

impl SharedInformer for ListingInformer {
    fn run(&self, stop: StopSignal) {
        self.runs.fetch_add(1, Ordering::SeqCst);
        for key in &self.keys {
            self.queue.add(key.clone());
        }
        stop.wait();
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn name(&self) -> String {
        "listing".to_string()
    }
}

/// Keys named `<resource>/object-<i>`
pub fn object_keys(resource: &str, count: usize) -> Vec<String> {
    (0..count).map(|i| format!("{resource}/object-{i}")).collect()
}

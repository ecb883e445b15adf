use crossbeam_channel::{unbounded, Sender};
use rustc_hash::FxHashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use workqueue::logging::{cleanup_old_logs, init_dual_logging, init_simple_logging, log_system_info};
use workqueue::{
    stop_channel, Queue, QueueMetrics, RateLimitingQueue, RateLimitingWorkQueue, ResourceType, Settings,
    SharedInformer, SharedInformerFactory, StopSignal,
};

/// Objects each synthetic informer lists
const OBJECTS_PER_RESOURCE: usize = 10;

/// How long the demo waits for every object to be reconciled
const RECONCILE_TIMEOUT: Duration = Duration::from_secs(30);

/// Stand-in for a list/watch informer: lists a fixed set of objects into the queue,
/// then relists them every resync period until stopped.
struct SyntheticInformer {
    resource: ResourceType,
    queue: Arc<RateLimitingWorkQueue<String>>,
    resync: Duration,
    stopped: AtomicBool,
}

impl SyntheticInformer {
    fn list(&self) {
        for i in 0..OBJECTS_PER_RESOURCE {
            self.queue.add(format!("{}/object-{}", self.resource, i));
        }
        debug!("📥 Listed {} objects of {}", OBJECTS_PER_RESOURCE, self.resource);
    }
}

impl SharedInformer for SyntheticInformer {
    fn run(&self, stop: StopSignal) {
        self.list();
        loop {
            if self.resync.is_zero() {
                stop.wait();
                break;
            }
            if stop.wait_timeout(self.resync) {
                break;
            }
            self.list();
        }
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn name(&self) -> String {
        self.resource.to_string()
    }
}

/// Typed view over the factory for the resources this demo watches
struct Resources<'a> {
    factory: &'a SharedInformerFactory,
    queue: &'a Arc<RateLimitingWorkQueue<String>>,
}

impl Resources<'_> {
    fn informer(&self, tag: &str) -> Arc<dyn SharedInformer> {
        let resource = ResourceType::new(tag);
        self.factory.informer_for(resource.clone(), |resync| -> Arc<dyn SharedInformer> {
            Arc::new(SyntheticInformer {
                resource,
                queue: Arc::clone(self.queue),
                resync,
                stopped: AtomicBool::new(false),
            })
        })
    }

    fn equipment(&self) -> Arc<dyn SharedInformer> {
        self.informer("esam/v1/equipment")
    }

    fn qr_codes(&self) -> Arc<dyn SharedInformer> {
        self.informer("services/v1/qrcodes")
    }
}

/// Deterministic number of failures before a key reconciles
fn simulated_failures(key: &str) -> usize {
    key.bytes().map(usize::from).sum::<usize>() % 3
}

fn run_worker(id: usize, queue: Arc<RateLimitingWorkQueue<String>>, reconciled: Sender<String>) {
    while let Some(key) = queue.get() {
        let attempts = queue.num_requeues(&key);
        if attempts < simulated_failures(&key) {
            warn!("⚠️ Worker {} failed to reconcile {} (attempt {})", id, key, attempts + 1);
            queue.add_rate_limited(key.clone());
        } else {
            debug!("✅ Worker {} reconciled {}", id, key);
            queue.forget(&key);
            // The receiver only goes away once main stops waiting
            let _ = reconciled.send(key.clone());
        }
        queue.done(&key);
    }
    debug!("🛑 Worker {} exiting", id);
}

fn load_settings() -> Settings {
    match std::env::args().nth(1) {
        Some(path) => match Settings::from_file(&path) {
            Ok(settings) => settings,
            Err(e) => {
                // Logging is not initialized yet
                eprintln!("⚠️ Failed to load {}: {}. Using default settings", path, e);
                Settings::default()
            }
        },
        None => Settings::default(),
    }
}

fn main() {
    let settings = load_settings();

    let _logging_guard = match settings.logging_config() {
        Some(logging_config) => match init_dual_logging(logging_config) {
            Ok(guard) => Some(guard),
            Err(e) => {
                eprintln!("❌ Failed to initialize logging system: {}", e);
                if let Err(e) = init_simple_logging(&settings.logging.level_filter) {
                    eprintln!("❌ Failed to initialize console logging: {}", e);
                }
                None
            }
        },
        None => {
            if let Err(e) = init_simple_logging(&settings.logging.level_filter) {
                eprintln!("❌ Failed to initialize console logging: {}", e);
            }
            None
        }
    };

    if let (Some(log_dir), Some(days)) = (&settings.logging.log_dir, settings.logging.cleanup_days) {
        if let Err(e) = cleanup_old_logs(log_dir, days) {
            warn!("⚠️ Failed to clean up old log files: {}", e);
        }
    }

    log_system_info();
    info!(
        queue = %settings.queue.name,
        workers = settings.queue.workers,
        heartbeat_ms = settings.queue.heartbeat_ms,
        qps = settings.rate_limiter.qps,
        burst = settings.rate_limiter.burst,
        resync_secs = settings.factory.default_resync_secs,
        "🔧 Settings loaded"
    );

    let metrics = QueueMetrics::new();
    let queue: Arc<RateLimitingWorkQueue<String>> = match settings.build_queue(Some(Arc::new(metrics.clone()))) {
        Ok(queue) => Arc::new(queue),
        Err(e) => {
            error!("❌ Failed to build work queue: {}", e);
            std::process::exit(1);
        }
    };

    let factory = SharedInformerFactory::new(settings.default_resync());
    let resources = Resources {
        factory: &factory,
        queue: &queue,
    };
    let informers = [resources.equipment(), resources.qr_codes()];
    // Asking again hands back the same shared informer
    let again = resources.equipment();
    debug!("📋 Equipment informer shared: {}", Arc::ptr_eq(&informers[0], &again));
    let expected = informers.len() * OBJECTS_PER_RESOURCE;

    let (reconciled_tx, reconciled_rx) = unbounded();
    let mut workers = Vec::with_capacity(settings.queue.workers);
    for id in 0..settings.queue.workers {
        let queue = Arc::clone(&queue);
        let reconciled = reconciled_tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("worker-{id}"))
            .spawn(move || run_worker(id, queue, reconciled));
        match spawned {
            Ok(handle) => workers.push(handle),
            Err(e) => error!("❌ Failed to spawn worker {}: {}", id, e),
        }
    }
    drop(reconciled_tx);

    let (stop, signal) = stop_channel();
    factory.start(&signal);
    info!("🚀 Started {} informers and {} workers", factory.started_count(), workers.len());

    let deadline = Instant::now() + RECONCILE_TIMEOUT;
    let mut done = FxHashSet::default();
    while done.len() < expected {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match reconciled_rx.recv_timeout(remaining) {
            Ok(key) => {
                done.insert(key);
            }
            Err(_) => {
                warn!("⚠️ Only {} of {} objects reconciled before the deadline", done.len(), expected);
                break;
            }
        }
    }
    info!("📊 Reconciled {} distinct objects", done.len());

    stop.stop();
    factory.shutdown();
    for informer in &informers {
        debug!("🛑 Informer '{}' stopped: {}", informer.name(), informer.is_stopped());
    }

    queue.shut_down_with_drain();
    for worker in workers {
        if worker.join().is_err() {
            error!("❌ A worker thread panicked");
        }
    }

    metrics.log_summary();
    match metrics.to_json() {
        Ok(json) => info!("📊 Final queue metrics:\n{}", json),
        Err(e) => warn!("⚠️ Failed to serialize queue metrics: {}", e),
    }
    info!("🛑 Shutdown complete");
}

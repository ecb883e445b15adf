use parking_lot::{Condvar, Mutex};
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::shared_informer::{ResourceType, SharedInformer};
use crate::signal::StopSignal;

/// Anything usable to tell informers apart
pub trait InformerDescriptor: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T> InformerDescriptor for T where T: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

/// Counts informer threads that have been launched but not yet returned
#[derive(Debug, Default)]
struct ActiveInformers {
    count: Mutex<usize>,
    idle: Condvar,
}

impl ActiveInformers {
    fn enter(self: &Arc<Self>) -> ActiveGuard {
        *self.count.lock() += 1;
        ActiveGuard {
            active: Arc::clone(self),
        }
    }

    fn wait_idle(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.idle.wait(&mut count);
        }
    }
}

/// Decrements the active count when dropped, even if the informer panicked or its
/// thread was never spawned
struct ActiveGuard {
    active: Arc<ActiveInformers>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut count = self.active.count.lock();
        *count -= 1;
        if *count == 0 {
            self.active.idle.notify_all();
        }
    }
}

struct Registry<D> {
    informers: FxHashMap<D, Arc<dyn SharedInformer>>,
    started: FxHashSet<D>,
    shutting_down: bool,
}

/// Shares one informer per descriptor between every consumer that asks for it, and
/// runs each of them exactly once.
pub struct SharedInformerFactory<D: InformerDescriptor = ResourceType> {
    registry: Mutex<Registry<D>>,
    active: Arc<ActiveInformers>,
    default_resync: Duration,
    custom_resync: FxHashMap<D, Duration>,
}

impl<D: InformerDescriptor> SharedInformerFactory<D> {
    pub fn new(default_resync: Duration) -> Self {
        Self {
            registry: Mutex::new(Registry {
                informers: FxHashMap::default(),
                started: FxHashSet::default(),
                shutting_down: false,
            }),
            active: Arc::new(ActiveInformers::default()),
            default_resync,
            custom_resync: FxHashMap::default(),
        }
    }

    /// Use `resync` instead of the default period for informers of `descriptor`
    pub fn with_custom_resync(mut self, descriptor: D, resync: Duration) -> Self {
        self.custom_resync.insert(descriptor, resync);
        self
    }

    pub fn default_resync(&self) -> Duration {
        self.default_resync
    }

    /// Resync period handed to the constructor of `descriptor`'s informer
    pub fn resync_for(&self, descriptor: &D) -> Duration {
        self.custom_resync
            .get(descriptor)
            .copied()
            .unwrap_or(self.default_resync)
    }

    /// Return the informer registered for `descriptor`, building it with
    /// `new_informer` the first time. The constructor receives the resync period and
    /// is called at most once per descriptor.
    pub fn informer_for<F>(&self, descriptor: D, new_informer: F) -> Arc<dyn SharedInformer>
    where
        F: FnOnce(Duration) -> Arc<dyn SharedInformer>,
    {
        let mut registry = self.registry.lock();
        if let Some(informer) = registry.informers.get(&descriptor) {
            return Arc::clone(informer);
        }

        let informer = new_informer(self.resync_for(&descriptor));
        debug!("📋 Registered informer '{}' for {:?}", informer.name(), descriptor);
        registry.informers.insert(descriptor, Arc::clone(&informer));
        informer
    }

    /// Launch every registered informer that is not running yet, each on its own
    /// thread, until `stop` fires. Does nothing once shutdown has begun.
    pub fn start(&self, stop: &StopSignal) {
        let mut registry = self.registry.lock();
        if registry.shutting_down {
            warn!("⚠️ Informer factory is shutting down, not starting informers");
            return;
        }

        let pending: Vec<(D, Arc<dyn SharedInformer>)> = registry
            .informers
            .iter()
            .filter(|(descriptor, _)| !registry.started.contains(*descriptor))
            .map(|(descriptor, informer)| (descriptor.clone(), Arc::clone(informer)))
            .collect();

        for (descriptor, informer) in pending {
            let name = informer.name();
            let guard = self.active.enter();
            let stop = stop.clone();
            let thread_name = format!("informer-{name}");

            let spawned = thread::Builder::new().name(thread_name).spawn(move || {
                let _guard = guard;
                let informer_name = informer.name();
                info!("🚀 Informer '{}' started", informer_name);
                match panic::catch_unwind(AssertUnwindSafe(|| informer.run(stop))) {
                    Ok(()) => info!("🛑 Informer '{}' stopped", informer_name),
                    Err(_) => error!("❌ Informer '{}' panicked", informer_name),
                }
            });

            match spawned {
                Ok(_) => {
                    registry.started.insert(descriptor);
                }
                // The closure and its guard were dropped, so the count is already restored
                Err(e) => error!("❌ Failed to start informer '{}' for {:?}: {}", name, descriptor, e),
            }
        }
    }

    /// Refuse any further `start` and block until every launched informer returned.
    /// Informers only return once their stop signal fires, so fire it first.
    pub fn shutdown(&self) {
        {
            let mut registry = self.registry.lock();
            registry.shutting_down = true;
        }
        info!("⏳ Waiting for informers to finish");
        self.active.wait_idle();
        info!("🛑 Informer factory shut down");
    }

    pub fn informer_count(&self) -> usize {
        self.registry.lock().informers.len()
    }

    /// Number of informers that have been launched, including ones that already returned
    pub fn started_count(&self) -> usize {
        self.registry.lock().started.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.registry.lock().shutting_down
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::stop_channel;
    use mockall::mock;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Instant;

    mock! {
        pub Informer {}

        impl SharedInformer for Informer {
            fn run(&self, stop: StopSignal);
            fn is_stopped(&self) -> bool;
            fn name(&self) -> String;
        }
    }

    fn blocking_informer(name: &str) -> Arc<MockInformer> {
        let mut informer = MockInformer::new();
        informer.expect_run().returning(|stop| stop.wait());
        informer.expect_name().return_const(name.to_string());
        informer.expect_is_stopped().return_const(false);
        Arc::new(informer)
    }

    /// Informer that records its runs in shared counters
    struct CountingInformer {
        runs: Arc<AtomicUsize>,
        stopped: AtomicBool,
    }

    impl SharedInformer for CountingInformer {
        fn run(&self, stop: StopSignal) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            stop.wait();
            self.stopped.store(true, Ordering::SeqCst);
        }

        fn is_stopped(&self) -> bool {
            self.stopped.load(Ordering::SeqCst)
        }
    }

    fn wait_until(check: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        check()
    }

    #[test]
    fn test_informer_for_builds_once_per_descriptor() {
        let factory: SharedInformerFactory = SharedInformerFactory::new(Duration::from_secs(30));
        let built = AtomicUsize::new(0);

        let build = |_resync: Duration| -> Arc<dyn SharedInformer> {
            built.fetch_add(1, Ordering::SeqCst);
            blocking_informer("pods")
        };
        let first = factory.informer_for(ResourceType::new("pods"), build);
        let second = factory.informer_for(ResourceType::new("pods"), |_| -> Arc<dyn SharedInformer> {
            panic!("constructor called twice")
        });

        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.informer_count(), 1);
    }

    #[test]
    fn test_custom_resync_is_passed_to_constructor() {
        let factory = SharedInformerFactory::new(Duration::from_secs(30))
            .with_custom_resync(ResourceType::new("services"), Duration::from_secs(5));

        let mut seen = Vec::new();
        for tag in ["services", "equipment"] {
            factory.informer_for(ResourceType::new(tag), |resync| -> Arc<dyn SharedInformer> {
                seen.push(resync);
                blocking_informer(tag)
            });
        }
        assert_eq!(seen, vec![Duration::from_secs(5), Duration::from_secs(30)]);
    }

    #[test]
    fn test_concurrent_start_runs_each_informer_once() {
        let factory: Arc<SharedInformerFactory<&'static str>> =
            Arc::new(SharedInformerFactory::new(Duration::ZERO));
        let runs = Arc::new(AtomicUsize::new(0));
        for tag in ["a", "b", "c"] {
            let runs = runs.clone();
            factory.informer_for(tag, move |_| -> Arc<dyn SharedInformer> {
                Arc::new(CountingInformer {
                    runs,
                    stopped: AtomicBool::new(false),
                })
            });
        }

        let (stop, signal) = stop_channel();
        let starters: Vec<_> = (0..4)
            .map(|_| {
                let factory = factory.clone();
                let signal = signal.clone();
                thread::spawn(move || factory.start(&signal))
            })
            .collect();
        for starter in starters {
            starter.join().unwrap();
        }
        factory.start(&signal);

        assert!(wait_until(|| runs.load(Ordering::SeqCst) == 3));
        assert_eq!(factory.started_count(), 3);

        stop.stop();
        factory.shutdown();
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert!(factory.is_shutting_down());
    }

    #[test]
    fn test_shutdown_waits_for_informers() {
        let factory: SharedInformerFactory = SharedInformerFactory::new(Duration::ZERO);
        let runs = Arc::new(AtomicUsize::new(0));
        let informer: Arc<CountingInformer> = Arc::new(CountingInformer {
            runs: runs.clone(),
            stopped: AtomicBool::new(false),
        });
        let registered = informer.clone();
        factory.informer_for("nodes".into(), move |_| -> Arc<dyn SharedInformer> { registered });

        let (stop, signal) = stop_channel();
        factory.start(&signal);
        assert!(wait_until(|| runs.load(Ordering::SeqCst) == 1));

        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            stop.stop();
        });
        factory.shutdown();
        // shutdown only returns once run did
        assert!(informer.is_stopped());
        stopper.join().unwrap();
    }

    #[test]
    fn test_start_after_shutdown_is_ignored() {
        let factory: SharedInformerFactory = SharedInformerFactory::new(Duration::ZERO);
        let mut informer = MockInformer::new();
        informer.expect_run().never();
        informer.expect_name().return_const("idle".to_string());
        let informer = Arc::new(informer);
        factory.informer_for("idle".into(), move |_| -> Arc<dyn SharedInformer> { informer });

        factory.shutdown();
        let (_stop, signal) = stop_channel();
        factory.start(&signal);
        assert_eq!(factory.started_count(), 0);
    }

    #[test]
    fn test_informers_registered_later_start_on_next_call() {
        let factory: SharedInformerFactory = SharedInformerFactory::new(Duration::ZERO);
        let (stop, signal) = stop_channel();

        factory.informer_for("first".into(), |_| -> Arc<dyn SharedInformer> { blocking_informer("first") });
        factory.start(&signal);
        assert_eq!(factory.started_count(), 1);

        factory.informer_for("second".into(), |_| -> Arc<dyn SharedInformer> { blocking_informer("second") });
        factory.start(&signal);
        assert_eq!(factory.started_count(), 2);

        stop.stop();
        factory.shutdown();
    }

    #[test]
    fn test_panicking_informer_still_completes() {
        struct PanickingInformer;

        impl SharedInformer for PanickingInformer {
            fn run(&self, _stop: StopSignal) {
                panic!("watch failed");
            }

            fn is_stopped(&self) -> bool {
                true
            }
        }

        let factory: SharedInformerFactory = SharedInformerFactory::new(Duration::ZERO);
        factory.informer_for("broken".into(), |_| -> Arc<dyn SharedInformer> { Arc::new(PanickingInformer) });

        let (_stop, signal) = stop_channel();
        factory.start(&signal);
        // Returns even though the informer never saw the stop signal
        factory.shutdown();
        assert_eq!(factory.started_count(), 1);
    }
}

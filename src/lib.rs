//! Work queues for controller-style processing: a deduplicating queue, a delaying
//! queue, rate limiters for retries, and a factory that shares long-running informers.

pub mod clock;
pub mod config;
pub mod error;
pub mod informers;
pub mod logging;
pub mod queue;
pub mod signal;

pub use clock::{Clock, FakeClock, RealClock};
pub use config::Settings;
pub use error::{Result, WorkQueueError};
pub use informers::{ResourceType, SharedInformer, SharedInformerFactory};
pub use queue::{
    default_controller_rate_limiter, BucketRateLimiter, DelayingQueue, DelayingWorkQueue,
    ItemExponentialFailureRateLimiter, ItemFastSlowRateLimiter, MaxOfRateLimiter, MetricsProvider,
    Queue, QueueMetrics, RateLimiter, RateLimitingQueue, RateLimitingWorkQueue, WithMaxWaitRateLimiter,
    WorkQueue,
};
pub use signal::{stop_channel, StopHandle, StopSignal};

pub mod delaying_queue;
pub mod metrics;
pub mod rate_limiter;
pub mod rate_limiting_queue;
pub mod types;
mod waiting;
pub mod work_queue;


pub use delaying_queue::DelayingWorkQueue;
pub use metrics::{MetricsProvider, NoopMetrics, QueueMetrics, QueueMetricsData};
pub use rate_limiter::{
    default_controller_rate_limiter, BucketRateLimiter, ItemExponentialFailureRateLimiter,
    ItemFastSlowRateLimiter, MaxOfRateLimiter, RateLimiter, WithMaxWaitRateLimiter,
};
pub use rate_limiting_queue::RateLimitingWorkQueue;
pub use types::{
    DelayingQueue, DelayingQueueConfig, Queue, QueueConfig, QueueKey, RateLimitingQueue,
    RateLimitingQueueConfig,
};
pub use work_queue::WorkQueue;

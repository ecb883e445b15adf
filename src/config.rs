use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::clock::{Clock, RealClock};
use crate::error::{Result, WorkQueueError};
use crate::logging::{LogRotation, LoggingConfig};
use crate::queue::{
    BucketRateLimiter, DelayingQueueConfig, DelayingWorkQueue, ItemExponentialFailureRateLimiter,
    MaxOfRateLimiter, MetricsProvider, QueueConfig, QueueKey, RateLimiter, RateLimitingQueueConfig,
    RateLimitingWorkQueue, WithMaxWaitRateLimiter,
};

/// Settings loaded from a TOML file. Every section and field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub queue: QueueSettings,
    pub rate_limiter: RateLimiterSettings,
    pub factory: FactorySettings,
    pub logging: LoggingSettings,
}

/// `[queue]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Metrics label. Empty disables metrics.
    pub name: String,
    pub heartbeat_ms: u64,
    pub request_capacity: usize,
    pub unfinished_work_update_ms: u64,
    /// Worker threads the demo binary runs
    pub workers: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            name: "workqueue".to_string(),
            heartbeat_ms: 10_000,
            request_capacity: 1000,
            unfinished_work_update_ms: 500,
            workers: 4,
        }
    }
}

/// `[rate_limiter]` section: per-item exponential backoff combined with an overall
/// token bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterSettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub qps: f64,
    pub burst: u32,
    /// Optional cap applied on top of the combined delay
    pub max_wait_ms: Option<u64>,
}

impl Default for RateLimiterSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 5,
            max_delay_ms: 1_000_000,
            qps: 10.0,
            burst: 100,
            max_wait_ms: None,
        }
    }
}

/// `[factory]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorySettings {
    pub default_resync_secs: u64,
}

impl Default for FactorySettings {
    fn default() -> Self {
        Self {
            default_resync_secs: 30,
        }
    }
}

/// `[logging]` section. Without `log_dir` only console logging is set up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level_filter: String,
    pub log_dir: Option<String>,
    pub json: bool,
    pub rotation: LogRotation,
    /// Days to keep rolled log files
    pub cleanup_days: Option<u32>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level_filter: "info,workqueue=info".to_string(),
            log_dir: None,
            json: true,
            rotation: LogRotation::Daily,
            cleanup_days: None,
        }
    }
}

impl Settings {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let settings = Self::from_toml_str(&content)?;
        info!("📋 Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let queue = &self.queue;
        if queue.heartbeat_ms == 0 {
            return Err(WorkQueueError::InvalidConfig("queue.heartbeat_ms must be positive".to_string()));
        }
        if queue.unfinished_work_update_ms == 0 {
            return Err(WorkQueueError::InvalidConfig(
                "queue.unfinished_work_update_ms must be positive".to_string(),
            ));
        }
        if queue.workers == 0 {
            return Err(WorkQueueError::InvalidConfig("queue.workers must be at least 1".to_string()));
        }

        let limiter = &self.rate_limiter;
        if !limiter.qps.is_finite() || limiter.qps < 0.0 {
            return Err(WorkQueueError::InvalidConfig(format!(
                "rate_limiter.qps must be a non-negative number, got {}",
                limiter.qps
            )));
        }
        if limiter.qps == 0.0 && limiter.burst == 0 {
            return Err(WorkQueueError::InvalidConfig(
                "rate_limiter with zero qps and zero burst never admits anything".to_string(),
            ));
        }
        if limiter.max_delay_ms < limiter.base_delay_ms {
            return Err(WorkQueueError::InvalidConfig(format!(
                "rate_limiter.max_delay_ms ({}) is below base_delay_ms ({})",
                limiter.max_delay_ms, limiter.base_delay_ms
            )));
        }
        Ok(())
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.queue.heartbeat_ms)
    }

    pub fn default_resync(&self) -> Duration {
        Duration::from_secs(self.factory.default_resync_secs)
    }

    /// The configured limiter: exponential backoff and token bucket, whichever is
    /// slower, optionally capped by `max_wait_ms`
    pub fn rate_limiter<K: QueueKey>(&self) -> Box<dyn RateLimiter<K>> {
        let limiter = &self.rate_limiter;
        let combined = MaxOfRateLimiter::new(vec![
            Box::new(ItemExponentialFailureRateLimiter::new(
                Duration::from_millis(limiter.base_delay_ms),
                Duration::from_millis(limiter.max_delay_ms),
            )),
            Box::new(BucketRateLimiter::new(limiter.qps, limiter.burst)),
        ]);

        match limiter.max_wait_ms {
            Some(max_wait_ms) => Box::new(WithMaxWaitRateLimiter::new(
                Box::new(combined),
                Duration::from_millis(max_wait_ms),
            )),
            None => Box::new(combined),
        }
    }

    pub fn queue_config(&self, metrics: Option<Arc<dyn MetricsProvider>>) -> QueueConfig {
        QueueConfig {
            name: self.queue.name.clone(),
            clock: Arc::new(RealClock),
            metrics,
            unfinished_work_update_period: Duration::from_millis(self.queue.unfinished_work_update_ms),
        }
    }

    pub fn delaying_queue_config<K>(
        &self,
        clock: Arc<dyn Clock>,
        metrics: Option<Arc<dyn MetricsProvider>>,
    ) -> DelayingQueueConfig<K> {
        DelayingQueueConfig {
            name: self.queue.name.clone(),
            clock,
            metrics,
            queue: None,
            heartbeat: self.heartbeat(),
            request_capacity: self.queue.request_capacity,
        }
    }

    /// Build the full queue stack these settings describe, on the real clock
    pub fn build_queue<K: QueueKey>(
        &self,
        metrics: Option<Arc<dyn MetricsProvider>>,
    ) -> Result<RateLimitingWorkQueue<K>> {
        let clock: Arc<dyn Clock> = Arc::new(RealClock);
        let base = Arc::new(crate::queue::WorkQueue::with_config(QueueConfig {
            clock: clock.clone(),
            ..self.queue_config(metrics.clone())
        }));
        let delaying = DelayingWorkQueue::try_with_config(DelayingQueueConfig {
            queue: Some(base),
            ..self.delaying_queue_config(clock.clone(), metrics.clone())
        })?;

        Ok(RateLimitingWorkQueue::with_config(
            self.rate_limiter(),
            RateLimitingQueueConfig {
                name: self.queue.name.clone(),
                clock,
                metrics,
                delaying_queue: Some(Arc::new(delaying)),
            },
        ))
    }

    /// File logging setup, if a log directory is configured
    pub fn logging_config(&self) -> Option<LoggingConfig> {
        let log_dir = self.logging.log_dir.clone()?;
        Some(LoggingConfig {
            log_dir,
            level_filter: self.logging.level_filter.clone(),
            rotation: self.logging.rotation,
            file_json_format: self.logging.json,
            ..LoggingConfig::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{DelayingQueue, Queue, RateLimitingQueue};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let settings = Settings::from_toml_str("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.heartbeat(), Duration::from_secs(10));
        assert_eq!(settings.queue.request_capacity, 1000);
        assert_eq!(settings.default_resync(), Duration::from_secs(30));
        assert!(settings.logging_config().is_none());
    }

    #[test]
    fn test_partial_sections() {
        let settings = Settings::from_toml_str(
            r#"
            [queue]
            name = "controller"
            workers = 2

            [rate_limiter]
            qps = 50.0
            max_wait_ms = 2000

            [logging]
            log_dir = "/tmp/workqueue-logs"
            rotation = "hourly"
            json = false
            "#,
        )
        .unwrap();

        assert_eq!(settings.queue.name, "controller");
        assert_eq!(settings.queue.workers, 2);
        assert_eq!(settings.queue.heartbeat_ms, 10_000);
        assert_eq!(settings.rate_limiter.qps, 50.0);
        assert_eq!(settings.rate_limiter.burst, 100);
        assert_eq!(settings.rate_limiter.max_wait_ms, Some(2000));

        let logging = settings.logging_config().unwrap();
        assert_eq!(logging.log_dir, "/tmp/workqueue-logs");
        assert_eq!(logging.rotation, LogRotation::Hourly);
        assert!(!logging.file_json_format);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let cases = [
            "[queue]\nheartbeat_ms = 0",
            "[queue]\nworkers = 0",
            "[rate_limiter]\nqps = -1.0",
            "[rate_limiter]\nqps = 0.0\nburst = 0",
            "[rate_limiter]\nbase_delay_ms = 10\nmax_delay_ms = 5",
        ];
        for case in cases {
            assert!(
                matches!(Settings::from_toml_str(case), Err(WorkQueueError::InvalidConfig(_))),
                "accepted: {case}"
            );
        }
    }

    #[test]
    fn test_malformed_toml_is_a_parse_error() {
        assert!(matches!(
            Settings::from_toml_str("[queue\nname = 1"),
            Err(WorkQueueError::ConfigParse(_))
        ));
        assert!(matches!(
            Settings::from_toml_str("[queue]\nworkers = \"many\""),
            Err(WorkQueueError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[factory]\ndefault_resync_secs = 5").unwrap();

        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.default_resync(), Duration::from_secs(5));

        assert!(matches!(
            Settings::from_file(file.path().with_extension("missing")),
            Err(WorkQueueError::Io(_))
        ));
    }

    #[test]
    fn test_rate_limiter_honours_max_wait() {
        let settings = Settings::from_toml_str(
            "[rate_limiter]\nbase_delay_ms = 1000\nmax_delay_ms = 100000\nmax_wait_ms = 3000",
        )
        .unwrap();
        let limiter = settings.rate_limiter::<&str>();
        let delays: Vec<_> = (0..4).map(|_| limiter.when(&"item")).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3),
                Duration::from_secs(3)
            ]
        );
        assert_eq!(limiter.num_requeues(&"item"), 4);
    }

    #[test]
    fn test_tiny_qps_limiter_does_not_panic() {
        let settings = Settings::from_toml_str("[rate_limiter]\nqps = 1e-300\nburst = 1").unwrap();
        let limiter = settings.rate_limiter::<&str>();
        assert_eq!(limiter.when(&"item"), Duration::from_millis(5));
        assert_eq!(limiter.when(&"item"), Duration::MAX);
    }

    #[test]
    fn test_build_queue() {
        let settings = Settings::default();
        let queue = settings.build_queue::<String>(None).unwrap();
        queue.add("a".to_string());
        queue.add_after("b".to_string(), Duration::ZERO);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.num_requeues(&"a".to_string()), 0);
        queue.shut_down();
        assert!(queue.shutting_down());
    }
}

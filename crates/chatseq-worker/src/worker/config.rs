//! Daemon configuration: CLI flags with environment fallbacks, validated
//! into the core's config structs.

use anyhow::ensure;
use chatseq::{CacheConfig, CoreConfig, QueueConfig, RetryPolicy, WorkerConfig};
use clap::Parser;
use core::time::Duration;

/// Raw command-line arguments. Every flag can also be supplied through the
/// environment; a `.env` file is loaded before parsing.
#[derive(Parser, Debug)]
#[command(name = "chatseq-worker", version, about)]
pub struct CliArgs {
    /// Number of delivery tasks in the materialization pool.
    #[arg(long, env = "CHATSEQ_NUM_WORKERS", default_value_t = 4)]
    pub num_workers: usize,

    /// Bounded channel capacity per delivery task.
    #[arg(long, env = "CHATSEQ_QUEUE_BUFFER", default_value_t = 64)]
    pub queue_buffer: usize,

    /// Total execution attempts before a job is dropped.
    #[arg(long, env = "CHATSEQ_MAX_ATTEMPTS", default_value_t = 10)]
    pub max_attempts: u32,

    /// Backoff before the first retry, in milliseconds; doubles per attempt.
    #[arg(long, env = "CHATSEQ_BASE_BACKOFF_MS", default_value_t = 500)]
    pub base_backoff_ms: u64,

    /// Upper bound on any single backoff, in milliseconds.
    #[arg(long, env = "CHATSEQ_MAX_BACKOFF_MS", default_value_t = 30_000)]
    pub max_backoff_ms: u64,

    /// Seconds between counter-reconciliation passes.
    #[arg(long, env = "CHATSEQ_RECONCILE_INTERVAL_SECS", default_value_t = 300)]
    pub reconcile_interval_secs: u64,

    /// Identifier-cache entry TTL, in seconds.
    #[arg(long, env = "CHATSEQ_CACHE_TTL_SECS", default_value_t = 3600)]
    pub cache_ttl_secs: u64,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, env = "CHATSEQ_LOG_FILTER", default_value = "info")]
    pub log_filter: String,
}

/// Validated daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub num_workers: usize,
    pub reconcile_interval: Duration,
    pub log_filter: String,
    pub core: CoreConfig,
}

impl TryFrom<CliArgs> for DaemonConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        ensure!(args.num_workers >= 1, "num-workers must be at least 1");
        ensure!(args.queue_buffer >= 1, "queue-buffer must be at least 1");
        ensure!(args.max_attempts >= 1, "max-attempts must be at least 1");
        ensure!(
            args.base_backoff_ms <= args.max_backoff_ms,
            "base-backoff-ms must not exceed max-backoff-ms"
        );
        ensure!(
            args.reconcile_interval_secs >= 1,
            "reconcile-interval-secs must be at least 1"
        );

        let core = CoreConfig {
            cache: CacheConfig {
                entry_ttl: Duration::from_secs(args.cache_ttl_secs),
                ..CacheConfig::default()
            },
            worker: WorkerConfig::default(),
            queue: QueueConfig {
                num_workers: args.num_workers,
                buffer_size: args.queue_buffer,
                retry: RetryPolicy {
                    max_attempts: args.max_attempts,
                    base_backoff: Duration::from_millis(args.base_backoff_ms),
                    max_backoff: Duration::from_millis(args.max_backoff_ms),
                },
                ..QueueConfig::default()
            },
        };

        Ok(Self {
            num_workers: args.num_workers,
            reconcile_interval: Duration::from_secs(args.reconcile_interval_secs),
            log_filter: args.log_filter,
            core,
        })
    }
}

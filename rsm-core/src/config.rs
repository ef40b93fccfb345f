//! Runtime configuration.
//!
//! In-memory only: no file or environment parsing, built directly with `ConfigBuilder`
//! rather than a `structopt`/`clap` front end, since this crate has no CLI surface of its
//! own.

use std::time::Duration;

use anyhow::bail;
use anyhow::Result;

/// Tunables for a single [`crate::host::RsmHost`] / [`crate::failover::FailoverCoordinator`]
/// pair. Construct via [`ConfigBuilder`].
#[derive(Clone, Debug)]
pub struct Config {
    /// Timeout for each per-peer `store_branch` RPC during failover phase A.
    pub store_branch_timeout: Duration,
    /// Timeout for each per-peer `undo_branch` RPC used as best-effort cleanup.
    pub cleanup_branch_timeout: Duration,
    /// Timeout for each per-peer `undo_branch` RPC during an explicit `try_cancel`.
    pub cancel_branch_timeout: Duration,
    /// Upper bound on how many filtered entries a single reader delivery batches before
    /// handing control back to the host, bounding reader-task latency under a deep backlog.
    pub reader_batch_size: usize,
}

impl Config {
    pub fn build() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_branch_timeout: Duration::from_secs(15),
            cleanup_branch_timeout: Duration::from_secs(5),
            cancel_branch_timeout: Duration::from_secs(15),
            reader_batch_size: 256,
        }
    }
}

/// Builder for [`Config`], via the `Config::build(..).validate()` idiom.
#[derive(Clone, Debug, Default)]
pub struct ConfigBuilder {
    inner: PartialConfig,
}

#[derive(Clone, Debug, Default)]
struct PartialConfig {
    store_branch_timeout: Option<Duration>,
    cleanup_branch_timeout: Option<Duration>,
    cancel_branch_timeout: Option<Duration>,
    reader_batch_size: Option<usize>,
}

impl ConfigBuilder {
    pub fn store_branch_timeout(mut self, d: Duration) -> Self {
        self.inner.store_branch_timeout = Some(d);
        self
    }

    pub fn cleanup_branch_timeout(mut self, d: Duration) -> Self {
        self.inner.cleanup_branch_timeout = Some(d);
        self
    }

    pub fn cancel_branch_timeout(mut self, d: Duration) -> Self {
        self.inner.cancel_branch_timeout = Some(d);
        self
    }

    pub fn reader_batch_size(mut self, n: usize) -> Self {
        self.inner.reader_batch_size = Some(n);
        self
    }

    /// Apply defaults for anything unset, then check internal consistency.
    pub fn validate(self) -> Result<Config> {
        let defaults = Config::default();
        let cfg = Config {
            store_branch_timeout: self.inner.store_branch_timeout.unwrap_or(defaults.store_branch_timeout),
            cleanup_branch_timeout: self.inner.cleanup_branch_timeout.unwrap_or(defaults.cleanup_branch_timeout),
            cancel_branch_timeout: self.inner.cancel_branch_timeout.unwrap_or(defaults.cancel_branch_timeout),
            reader_batch_size: self.inner.reader_batch_size.unwrap_or(defaults.reader_batch_size),
        };

        if cfg.reader_batch_size == 0 {
            bail!("reader_batch_size must be greater than zero");
        }
        if cfg.store_branch_timeout.is_zero() || cfg.cleanup_branch_timeout.is_zero() || cfg.cancel_branch_timeout.is_zero()
        {
            bail!("failover timeouts must be non-zero");
        }

        Ok(cfg)
    }
}

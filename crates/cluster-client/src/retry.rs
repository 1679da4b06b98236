//! Optimistic-concurrency updates with exponential backoff and jitter.
//!
//! Desired-state mutations follow read-modify-write: fetch the object, apply
//! a mutation, replace it carrying the read `resourceVersion`. A conflicting
//! writer makes the replace fail with 409; the loop re-reads and re-applies.

use crate::cluster_trait::ClusterClientTrait;
use crate::error::ClusterClientError;
use crds::DbCluster;
use rand::Rng;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for conflict retries.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts.max(1),
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (1-based), with up to 25% jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let base = self.initial_delay.as_secs_f64() * exp;
        let capped = base.min(self.max_delay.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(0.0..=capped * 0.25);
        Duration::from_secs_f64(capped + jitter)
    }
}

/// Apply `mutate` to the latest copy of a cluster and write it back.
///
/// `mutate` returns `false` when the object already has the desired content,
/// in which case nothing is written. Conflicts are retried until
/// `config.max_attempts` is exhausted; other errors return immediately.
pub async fn update_cluster_with_retry<C, F>(
    client: &C,
    namespace: &str,
    name: &str,
    config: &RetryConfig,
    mut mutate: F,
) -> Result<DbCluster, ClusterClientError>
where
    C: ClusterClientTrait + ?Sized,
    F: FnMut(&mut DbCluster) -> bool + Send,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let mut cluster = client
            .get_cluster(namespace, name)
            .await?
            .ok_or_else(|| ClusterClientError::NotFound(format!("DbCluster {}/{}", namespace, name)))?;

        if !mutate(&mut cluster) {
            debug!("DbCluster {}/{} already up to date", namespace, name);
            return Ok(cluster);
        }

        match client.replace_cluster(namespace, &cluster).await {
            Ok(updated) => return Ok(updated),
            Err(e) if e.is_conflict() && attempt < config.max_attempts => {
                let delay = config.delay_for(attempt);
                warn!(
                    "Conflict updating DbCluster {}/{} (attempt {}/{}), retrying in {:?}",
                    namespace, name, attempt, config.max_attempts, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

use std::time::Duration;

/// Plain construction parameters for a [`crate::pool::Pool`]. Deliberately
/// free of any environment-parsing concerns; the binary that owns process
/// configuration is responsible for producing one of these.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub initial_workers: usize,
    pub max_concurrent_crawls: usize,
    pub crawl_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_workers: 4,
            max_concurrent_crawls: 30,
            crawl_timeout: Duration::from_secs(30),
        }
    }
}

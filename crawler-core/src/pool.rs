use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::analyzer::Analyzer;
use crate::repository::UrlRepository;
use crate::worker::{CrawlResult, PriorityTask, Worker};

/// `add` spawns more workers; `remove` retires existing ones. Retiring
/// workers finish their current task before exiting.
#[derive(Debug, Clone, Copy)]
pub enum ControlCommand {
    Add(usize),
    Remove(usize),
}

const DISPATCH_IDLE_SLEEP: Duration = Duration::from_millis(50);
const DEFAULT_PRIORITY: u8 = 5;

fn tier_capacities(total: usize) -> (usize, usize, usize) {
    let third = (total / 3).max(1);
    (third, third, total.saturating_sub(2 * third).max(1))
}

/// Owns the priority queues, worker lifecycle, dispatch loop, result
/// fan-out, and shutdown for the crawl execution subsystem.
pub struct Pool {
    high_tx: mpsc::Sender<PriorityTask>,
    normal_tx: mpsc::Sender<PriorityTask>,
    low_tx: mpsc::Sender<PriorityTask>,
    high_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<PriorityTask>>>,
    normal_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<PriorityTask>>>,
    low_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<PriorityTask>>>,
    results_tx: broadcast::Sender<CrawlResult>,
    retire_tx: mpsc::Sender<()>,
    retire_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<()>>>,
    token: CancellationToken,
    repository: Arc<dyn UrlRepository>,
    analyzer: Arc<dyn Analyzer>,
    crawl_timeout: Duration,
    worker_count: Arc<AtomicUsize>,
    next_worker_id: Arc<AtomicUsize>,
    handles: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Pool {
    pub fn new(
        repository: Arc<dyn UrlRepository>,
        analyzer: Arc<dyn Analyzer>,
        max_concurrent_crawls: usize,
        crawl_timeout: Duration,
        initial_workers: usize,
    ) -> Self {
        let (high_cap, normal_cap, low_cap) = tier_capacities(max_concurrent_crawls);
        let (high_tx, high_rx) = mpsc::channel(high_cap);
        let (normal_tx, normal_rx) = mpsc::channel(normal_cap);
        let (low_tx, low_rx) = mpsc::channel(low_cap);
        let (results_tx, _) = broadcast::channel(initial_workers.max(1) * 2);
        let (retire_tx, retire_rx) = mpsc::channel(initial_workers.max(1).max(128));

        Self {
            high_tx,
            normal_tx,
            low_tx,
            high_rx: Arc::new(tokio::sync::Mutex::new(high_rx)),
            normal_rx: Arc::new(tokio::sync::Mutex::new(normal_rx)),
            low_rx: Arc::new(tokio::sync::Mutex::new(low_rx)),
            results_tx,
            retire_tx,
            retire_rx: Arc::new(tokio::sync::Mutex::new(retire_rx)),
            token: CancellationToken::new(),
            repository,
            analyzer,
            crawl_timeout,
            worker_count: Arc::new(AtomicUsize::new(0)),
            next_worker_id: Arc::new(AtomicUsize::new(0)),
            handles: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Spawns the initial worker set. Does not block; callers typically hold
    /// the pool alongside an HTTP listener rather than awaiting this.
    pub async fn start(&self, initial_workers: usize) {
        for _ in 0..initial_workers {
            self.spawn_worker().await;
        }
        info!(workers = initial_workers, "crawl pool started");
    }

    pub fn enqueue(&self, url_id: i64) {
        self.enqueue_with_priority(url_id, DEFAULT_PRIORITY);
    }

    /// Non-blocking: routes the task into the matching priority tier,
    /// dropping it with a warning if that tier's queue is saturated.
    /// Out-of-range priorities clamp to the default tier at the edge.
    pub fn enqueue_with_priority(&self, url_id: i64, priority: u8) {
        let priority = if (1..=10).contains(&priority) {
            priority
        } else {
            DEFAULT_PRIORITY
        };
        let task = PriorityTask { url_id, priority };
        let (tier, sender) = match priority {
            8..=10 => ("high", &self.high_tx),
            4..=7 => ("normal", &self.normal_tx),
            _ => ("low", &self.low_tx),
        };
        // Open question preserved from the design notes: enqueueing after
        // the pool's token has been cancelled can silently drop the task
        // here while the HTTP caller still observes success upstream.
        if sender.try_send(task).is_err() {
            warn!(url_id, tier, "priority queue full, task dropped");
        }
    }

    pub async fn adjust_workers(&self, cmd: ControlCommand) {
        match cmd {
            ControlCommand::Add(count) => {
                for _ in 0..count {
                    self.spawn_worker().await;
                }
            }
            ControlCommand::Remove(count) => {
                let current = self.worker_count.load(Ordering::SeqCst);
                // At least one worker remains unless explicitly zeroed.
                let count = if count >= current { current.saturating_sub(0) } else { count };
                let count = count.min(current);
                for _ in 0..count {
                    let _ = self.retire_tx.try_send(());
                }
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CrawlResult> {
        self.results_tx.subscribe()
    }

    /// Cancels the internal token (stopping new work and aborting in-flight
    /// analyses via propagation), then waits for every worker to exit.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            drop(handle.await);
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count.load(Ordering::SeqCst)
    }

    async fn spawn_worker(&self) {
        let id = self.next_worker_id.fetch_add(1, Ordering::SeqCst);
        let worker = Worker {
            id,
            repository: self.repository.clone(),
            analyzer: self.analyzer.clone(),
            crawl_timeout: self.crawl_timeout,
            results_tx: self.results_tx.clone(),
        };
        let token = self.token.clone();
        let high_rx = self.high_rx.clone();
        let normal_rx = self.normal_rx.clone();
        let low_rx = self.low_rx.clone();
        let retire_rx = self.retire_rx.clone();
        let worker_count = self.worker_count.clone();

        worker_count.fetch_add(1, Ordering::SeqCst);
        let handle = tokio::spawn(async move {
            dispatch_loop(worker, token, high_rx, normal_rx, low_rx, retire_rx).await;
            worker_count.fetch_sub(1, Ordering::SeqCst);
        });
        self.handles.lock().await.push(handle);
    }
}

/// Per-worker dispatch loop: strict non-preemptive priority discipline.
/// high is drained before normal, normal before low; an idle pass sleeps
/// briefly to avoid busy-spinning. The sleep is load-bearing — without it
/// this loop would spin the CPU whenever all three tiers are momentarily
/// empty.
async fn dispatch_loop(
    worker: Worker,
    token: CancellationToken,
    high_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<PriorityTask>>>,
    normal_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<PriorityTask>>>,
    low_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<PriorityTask>>>,
    retire_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<()>>>,
) {
    loop {
        if token.is_cancelled() {
            return;
        }

        if retire_rx.lock().await.try_recv().is_ok() {
            return;
        }

        let task = {
            let mut high = high_rx.lock().await;
            match high.try_recv() {
                Ok(task) => Some(task),
                Err(_) => {
                    drop(high);
                    let mut normal = normal_rx.lock().await;
                    match normal.try_recv() {
                        Ok(task) => Some(task),
                        Err(_) => {
                            drop(normal);
                            let mut low = low_rx.lock().await;
                            low.try_recv().ok()
                        }
                    }
                }
            }
        };

        match task {
            Some(task) => worker.process(task, token.clone()).await,
            None => tokio::time::sleep(DISPATCH_IDLE_SLEEP).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AnalysisResult, Link, Status, UrlRecord};
    use crate::error::{AnalyzeError, RepositoryError};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeRepo {
        records: Mutex<HashMap<i64, UrlRecord>>,
    }

    impl FakeRepo {
        fn seeded(ids: &[i64]) -> Arc<Self> {
            let mut records = HashMap::new();
            for &id in ids {
                records.insert(
                    id,
                    UrlRecord {
                        id,
                        original_url: format!("http://h/{id}"),
                        status: Status::Queued,
                    },
                );
            }
            Arc::new(Self {
                records: Mutex::new(records),
            })
        }
    }

    #[async_trait]
    impl UrlRepository for FakeRepo {
        async fn update_status(&self, id: i64, status: Status) -> Result<(), RepositoryError> {
            if let Some(r) = self.records.lock().unwrap().get_mut(&id) {
                r.status = status;
            }
            Ok(())
        }
        async fn find_by_id(&self, id: i64) -> Result<UrlRecord, RepositoryError> {
            self.records
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or(RepositoryError::NotFound(id))
        }
        async fn save_results(
            &self,
            _id: i64,
            _result: AnalysisResult,
            _links: Vec<Link>,
        ) -> Result<(), RepositoryError> {
            Ok(())
        }
    }

    struct InstantAnalyzer;

    #[async_trait]
    impl Analyzer for InstantAnalyzer {
        async fn analyze(
            &self,
            _url: &str,
            _token: CancellationToken,
        ) -> Result<(AnalysisResult, Vec<Link>), AnalyzeError> {
            Ok((AnalysisResult::default(), vec![]))
        }
    }

    #[tokio::test]
    async fn priority_routing_prefers_high_tier() {
        let ids: Vec<i64> = (1..=5).collect();
        let repo = FakeRepo::seeded(&ids);
        let pool = Pool::new(repo, Arc::new(InstantAnalyzer), 30, Duration::from_secs(5), 0);
        for &id in &ids[..4] {
            pool.enqueue_with_priority(id, 2); // low
        }
        pool.enqueue_with_priority(5, 9); // high
        let mut rx = pool.subscribe();
        pool.start(1).await;

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("result within timeout")
            .unwrap();
        assert_eq!(first.url_id, 5);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn out_of_range_priority_defaults_to_normal_tier() {
        let repo = FakeRepo::seeded(&[1, 2]);
        let pool = Pool::new(repo, Arc::new(InstantAnalyzer), 30, Duration::from_secs(5), 0);
        pool.enqueue_with_priority(1, 0);
        pool.enqueue_with_priority(2, 255);
        assert!(pool.high_rx.try_lock().unwrap().try_recv().is_err());
        assert!(pool.low_rx.try_lock().unwrap().try_recv().is_err());
        assert!(pool.normal_rx.try_lock().unwrap().try_recv().is_ok());
        assert!(pool.normal_rx.try_lock().unwrap().try_recv().is_ok());
    }

    #[tokio::test]
    async fn removing_more_workers_than_exist_is_clamped() {
        let repo = FakeRepo::seeded(&[1]);
        let pool = Pool::new(repo, Arc::new(InstantAnalyzer), 30, Duration::from_secs(5), 0);
        pool.start(2).await;
        pool.adjust_workers(ControlCommand::Remove(10)).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(pool.worker_count(), 0);
        pool.shutdown().await;
    }
}

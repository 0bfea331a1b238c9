use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::analyzer::Analyzer;
use crate::domain::{Link, Status};
use crate::repository::UrlRepository;

/// The result of processing a single task, published on the crawl result
/// stream (C7). Emitted at most once per processed task.
#[derive(Debug, Clone)]
pub struct CrawlResult {
    pub url_id: i64,
    pub url: String,
    pub status: Status,
    pub error: Option<String>,
    pub link_count: usize,
    pub links: Vec<Link>,
    pub duration: Duration,
}

/// A task routed to a worker by the pool's dispatcher.
#[derive(Debug, Clone)]
pub struct PriorityTask {
    pub url_id: i64,
    pub priority: u8,
}

/// Executes one job end-to-end: status transitions, analysis invocation,
/// result persistence, and result publication. A worker processes one task
/// at a time; it never interrupts an in-flight job.
pub struct Worker {
    pub id: usize,
    pub repository: Arc<dyn UrlRepository>,
    pub analyzer: Arc<dyn Analyzer>,
    pub crawl_timeout: Duration,
    pub results_tx: broadcast::Sender<CrawlResult>,
}

impl Worker {
    pub async fn process(&self, task: PriorityTask, parent: CancellationToken) {
        let started = Instant::now();
        let id = task.url_id;

        // S1: write `running` before reading the record, so external
        // observers see the job as claimed even if the subsequent read
        // fails.
        if let Err(e) = self.repository.update_status(id, Status::Running).await {
            error!(worker_id = self.id, task_id = id, stage = "update_running", error = %e, "failed to mark task running");
        }

        let record = match self.repository.find_by_id(id).await {
            Ok(record) => record,
            Err(e) => {
                // Not found: the record no longer exists. Job is silently
                // abandoned, no terminal status is written.
                warn!(worker_id = self.id, task_id = id, stage = "find_by_id", error = %e, "task vanished before processing");
                return;
            }
        };

        if record.status == Status::Stopped {
            // S2: cooperative-stop fast path. Abandon without overwriting
            // the terminal status, but still emit a result event.
            self.emit(CrawlResult {
                url_id: id,
                url: record.original_url,
                status: Status::Stopped,
                error: None,
                link_count: 0,
                links: Vec::new(),
                duration: started.elapsed(),
            });
            return;
        }

        let job_token = parent.child_token();
        let timeout = self.crawl_timeout;
        let analyzer = self.analyzer.clone();
        let url = record.original_url.clone();

        let outcome = tokio::select! {
            biased;
            _ = parent.cancelled() => Err(crate::error::AnalyzeError::Cancelled),
            _ = tokio::time::sleep(timeout) => Err(crate::error::AnalyzeError::Timeout),
            result = analyzer.analyze(&url, job_token.clone()) => result,
        };
        job_token.cancel();

        match outcome {
            Ok((result, links)) => {
                let link_count = links.len();
                if let Err(e) = self.repository.save_results(id, result, links.clone()).await {
                    // Persistence failure: best-effort error status, logged,
                    // result event still emitted with the error set.
                    error!(worker_id = self.id, task_id = id, stage = "save_results", error = %e, "failed to persist analysis results");
                    if let Err(e) = self.repository.update_status(id, Status::Error).await {
                        error!(worker_id = self.id, task_id = id, stage = "update_error", error = %e, "failed to mark task error");
                    }
                    self.emit(CrawlResult {
                        url_id: id,
                        url,
                        status: Status::Error,
                        error: Some(e.to_string()),
                        link_count,
                        links,
                        duration: started.elapsed(),
                    });
                    return;
                }

                let final_status = match self.repository.find_by_id(id).await {
                    Ok(record) if record.status == Status::Stopped => Status::Stopped,
                    Ok(_) => {
                        if let Err(e) = self.repository.update_status(id, Status::Done).await {
                            error!(worker_id = self.id, task_id = id, stage = "update_done", error = %e, "failed to mark task done");
                        }
                        Status::Done
                    }
                    Err(e) => {
                        // Preserved per the design notes: do not force a
                        // terminal status here. The record is left `running`.
                        warn!(worker_id = self.id, task_id = id, stage = "find_by_id_final", error = %e, "lost record after successful analysis");
                        self.emit(CrawlResult {
                            url_id: id,
                            url,
                            status: Status::Running,
                            error: None,
                            link_count,
                            links,
                            duration: started.elapsed(),
                        });
                        return;
                    }
                };

                self.emit(CrawlResult {
                    url_id: id,
                    url,
                    status: final_status,
                    error: None,
                    link_count,
                    links,
                    duration: started.elapsed(),
                });
            }
            Err(e) if e.is_cancellation() => {
                if let Err(update_err) = self.repository.update_status(id, Status::Stopped).await
                {
                    error!(worker_id = self.id, task_id = id, stage = "update_stopped", error = %update_err, "failed to mark task stopped");
                }
                self.emit(CrawlResult {
                    url_id: id,
                    url,
                    status: Status::Stopped,
                    error: Some(e.to_string()),
                    link_count: 0,
                    links: Vec::new(),
                    duration: started.elapsed(),
                });
            }
            Err(e) => {
                if let Err(update_err) = self.repository.update_status(id, Status::Error).await {
                    error!(worker_id = self.id, task_id = id, stage = "update_error", error = %update_err, "failed to mark task error");
                }
                self.emit(CrawlResult {
                    url_id: id,
                    url,
                    status: Status::Error,
                    error: Some(e.to_string()),
                    link_count: 0,
                    links: Vec::new(),
                    duration: started.elapsed(),
                });
            }
        }
    }

    /// Non-blocking publish: a slow or absent set of subscribers must never
    /// stall the crawl loop. The durable status in the repository remains
    /// the source of truth regardless of delivery.
    fn emit(&self, result: CrawlResult) {
        let task_id = result.url_id;
        if self.results_tx.send(result).is_err() {
            info!(worker_id = self.id, task_id, "no subscribers for crawl result, dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AnalyzeError, RepositoryError};
    use crate::domain::{AnalysisResult, Link, UrlRecord};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeRepo {
        record: Mutex<UrlRecord>,
        saved: Mutex<Option<(AnalysisResult, Vec<Link>)>>,
        /// When set, the *next* `update_status(Done)` call is swallowed and
        /// the record is force-set to `stopped` instead, simulating an
        /// external stop landing between `save_results` and the final
        /// status write.
        stop_after_save: Mutex<bool>,
    }

    #[async_trait]
    impl UrlRepository for FakeRepo {
        async fn update_status(&self, _id: i64, status: Status) -> Result<(), RepositoryError> {
            if status == Status::Done && *self.stop_after_save.lock().unwrap() {
                return Ok(()); // a concurrent stop already owns this record
            }
            self.record.lock().unwrap().status = status;
            Ok(())
        }
        async fn find_by_id(&self, _id: i64) -> Result<UrlRecord, RepositoryError> {
            Ok(self.record.lock().unwrap().clone())
        }
        async fn save_results(
            &self,
            _id: i64,
            result: AnalysisResult,
            links: Vec<Link>,
        ) -> Result<(), RepositoryError> {
            *self.saved.lock().unwrap() = Some((result, links));
            if *self.stop_after_save.lock().unwrap() {
                self.record.lock().unwrap().status = Status::Stopped;
            }
            Ok(())
        }
    }

    struct FakeAnalyzer {
        outcome: Mutex<Option<Result<(AnalysisResult, Vec<Link>), AnalyzeError>>>,
    }

    #[async_trait]
    impl Analyzer for FakeAnalyzer {
        async fn analyze(
            &self,
            _url: &str,
            _token: CancellationToken,
        ) -> Result<(AnalysisResult, Vec<Link>), AnalyzeError> {
            self.outcome.lock().unwrap().take().unwrap()
        }
    }

    fn worker(repo: Arc<FakeRepo>, analyzer: Arc<FakeAnalyzer>) -> (Worker, broadcast::Receiver<CrawlResult>) {
        let (tx, rx) = broadcast::channel(8);
        (
            Worker {
                id: 1,
                repository: repo,
                analyzer,
                crawl_timeout: Duration::from_secs(30),
                results_tx: tx,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn happy_path_marks_done() {
        let repo = Arc::new(FakeRepo {
            record: Mutex::new(UrlRecord {
                id: 1,
                original_url: "http://h/".into(),
                status: Status::Queued,
            }),
            saved: Mutex::new(None),
            stop_after_save: Mutex::new(false),
        });
        let analyzer = Arc::new(FakeAnalyzer {
            outcome: Mutex::new(Some(Ok((AnalysisResult::default(), vec![])))),
        });
        let (worker, mut rx) = worker(repo.clone(), analyzer);
        worker
            .process(
                PriorityTask { url_id: 1, priority: 5 },
                CancellationToken::new(),
            )
            .await;
        assert_eq!(repo.record.lock().unwrap().status, Status::Done);
        let result = rx.try_recv().unwrap();
        assert_eq!(result.status, Status::Done);
    }

    #[tokio::test]
    async fn cooperative_stop_before_analysis_is_preserved() {
        let repo = Arc::new(FakeRepo {
            record: Mutex::new(UrlRecord {
                id: 1,
                original_url: "http://h/".into(),
                status: Status::Stopped,
            }),
            saved: Mutex::new(None),
            stop_after_save: Mutex::new(false),
        });
        let analyzer = Arc::new(FakeAnalyzer {
            outcome: Mutex::new(Some(Ok((AnalysisResult::default(), vec![])))),
        });
        let (worker, mut rx) = worker(repo.clone(), analyzer);
        worker
            .process(
                PriorityTask { url_id: 1, priority: 5 },
                CancellationToken::new(),
            )
            .await;
        assert_eq!(repo.record.lock().unwrap().status, Status::Stopped);
        assert!(repo.saved.lock().unwrap().is_none());
        let result = rx.try_recv().unwrap();
        assert_eq!(result.status, Status::Stopped);
    }

    #[tokio::test]
    async fn stopped_between_analysis_and_final_write_is_preserved() {
        let repo = Arc::new(FakeRepo {
            record: Mutex::new(UrlRecord {
                id: 1,
                original_url: "http://h/".into(),
                status: Status::Queued,
            }),
            saved: Mutex::new(None),
            stop_after_save: Mutex::new(true),
        });
        let analyzer = Arc::new(FakeAnalyzer {
            outcome: Mutex::new(Some(Ok((AnalysisResult::default(), vec![])))),
        });
        let (worker, mut rx) = worker(repo.clone(), analyzer);
        worker
            .process(
                PriorityTask { url_id: 1, priority: 5 },
                CancellationToken::new(),
            )
            .await;
        assert_eq!(repo.record.lock().unwrap().status, Status::Stopped);
        assert!(repo.saved.lock().unwrap().is_some());
        let result = rx.try_recv().unwrap();
        assert_eq!(result.status, Status::Stopped);
    }

    #[tokio::test]
    async fn analyzer_timeout_maps_to_stopped() {
        let repo = Arc::new(FakeRepo {
            record: Mutex::new(UrlRecord {
                id: 1,
                original_url: "http://h/".into(),
                status: Status::Queued,
            }),
            saved: Mutex::new(None),
            stop_after_save: Mutex::new(false),
        });
        let analyzer = Arc::new(FakeAnalyzer {
            outcome: Mutex::new(Some(Err(AnalyzeError::Timeout))),
        });
        let (worker, mut rx) = worker(repo.clone(), analyzer);
        worker
            .process(
                PriorityTask { url_id: 1, priority: 5 },
                CancellationToken::new(),
            )
            .await;
        assert_eq!(repo.record.lock().unwrap().status, Status::Stopped);
        assert!(repo.saved.lock().unwrap().is_none());
        let result = rx.try_recv().unwrap();
        assert_eq!(result.status, Status::Stopped);
    }

    #[tokio::test]
    async fn analyzer_error_marks_error() {
        let repo = Arc::new(FakeRepo {
            record: Mutex::new(UrlRecord {
                id: 1,
                original_url: "http://h/".into(),
                status: Status::Queued,
            }),
            saved: Mutex::new(None),
            stop_after_save: Mutex::new(false),
        });
        let analyzer = Arc::new(FakeAnalyzer {
            outcome: Mutex::new(Some(Err(AnalyzeError::Parse("bad html".into())))),
        });
        let (worker, mut rx) = worker(repo.clone(), analyzer);
        worker
            .process(
                PriorityTask { url_id: 1, priority: 5 },
                CancellationToken::new(),
            )
            .await;
        assert_eq!(repo.record.lock().unwrap().status, Status::Error);
        let result = rx.try_recv().unwrap();
        assert_eq!(result.status, Status::Error);
    }
}

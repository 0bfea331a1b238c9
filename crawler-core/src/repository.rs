use async_trait::async_trait;

use crate::domain::{AnalysisResult, Link, Status, UrlRecord};
use crate::error::RepositoryError;

/// The interface the crawl execution subsystem depends on for durable job
/// state. Implementations must make `save_results` atomic enough that a
/// concurrent `find_by_id` observes either all or none of a job's outputs.
#[async_trait]
pub trait UrlRepository: Send + Sync {
    async fn update_status(&self, id: i64, status: Status) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: i64) -> Result<UrlRecord, RepositoryError>;

    async fn save_results(
        &self,
        id: i64,
        result: AnalysisResult,
        links: Vec<Link>,
    ) -> Result<(), RepositoryError>;
}

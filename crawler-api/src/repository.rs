use async_trait::async_trait;
use sqlx::PgPool;

use crawler_core::{AnalysisResult, Link, RepositoryError, Status, UrlRecord, UrlRepository};

/// Postgres-backed implementation of the core's repository contract, plus
/// the read-side queries the REST layer needs (users, revoked tokens,
/// paginated listing, detail views) that workers never touch.
#[derive(Clone)]
pub struct PgUrlRepository {
    pool: PgPool,
}

impl PgUrlRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn create_url(&self, user_id: i64, url: &str) -> Result<UrlRecord, RepositoryError> {
        let row = sqlx::query!(
            r#"INSERT INTO urls (original_url, user_id, status)
               VALUES ($1, $2, 'queued')
               RETURNING id, original_url"#,
            url,
            user_id,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::Backend(e.to_string()))?;

        Ok(UrlRecord {
            id: row.id,
            original_url: row.original_url,
            status: Status::Queued,
        })
    }

    pub async fn delete_url(&self, user_id: i64, id: i64) -> Result<bool, RepositoryError> {
        let result = sqlx::query!(
            "DELETE FROM urls WHERE id = $1 AND user_id = $2",
            id,
            user_id
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Backend(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn stop_url(&self, user_id: i64, id: i64) -> Result<bool, RepositoryError> {
        let result = sqlx::query!(
            "UPDATE urls SET status = 'stopped' WHERE id = $1 AND user_id = $2",
            id,
            user_id
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Backend(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn owns(&self, user_id: i64, id: i64) -> Result<bool, RepositoryError> {
        let exists = sqlx::query_scalar!(
            "SELECT EXISTS(SELECT 1 FROM urls WHERE id = $1 AND user_id = $2)",
            id,
            user_id
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::Backend(e.to_string()))?;
        Ok(exists.unwrap_or(false))
    }

    pub async fn list_urls(
        &self,
        user_id: i64,
        page: i64,
        per_page: i64,
    ) -> Result<(Vec<UrlRecord>, i64), RepositoryError> {
        let offset = (page - 1) * per_page;
        let rows = sqlx::query!(
            r#"SELECT id, original_url, status FROM urls
               WHERE user_id = $1
               ORDER BY id
               LIMIT $2 OFFSET $3"#,
            user_id,
            per_page,
            offset,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Backend(e.to_string()))?;

        let total = sqlx::query_scalar!(
            "SELECT COUNT(*) FROM urls WHERE user_id = $1",
            user_id
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::Backend(e.to_string()))?
        .unwrap_or(0);

        let items = rows
            .into_iter()
            .filter_map(|r| {
                r.status.parse().ok().map(|status| UrlRecord {
                    id: r.id,
                    original_url: r.original_url,
                    status,
                })
            })
            .collect();

        Ok((items, total))
    }

    pub async fn url_detail(
        &self,
        user_id: i64,
        id: i64,
    ) -> Result<Option<(UrlRecord, Option<AnalysisResult>, Vec<Link>)>, RepositoryError> {
        let Some(url_row) = sqlx::query!(
            "SELECT id, original_url, status FROM urls WHERE id = $1 AND user_id = $2",
            id,
            user_id
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Backend(e.to_string()))?
        else {
            return Ok(None);
        };

        let status = url_row
            .status
            .parse()
            .map_err(|_| RepositoryError::Backend("unrecognized status literal".into()))?;
        let record = UrlRecord {
            id: url_row.id,
            original_url: url_row.original_url,
            status,
        };

        let result_row = sqlx::query!(
            r#"SELECT id, html_version, title, h1_count, h2_count, h3_count,
                      h4_count, h5_count, h6_count, has_login_form,
                      internal_link_count, external_link_count, broken_link_count
               FROM analysis_results
               WHERE url_id = $1
               ORDER BY id DESC
               LIMIT 1"#,
            id
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Backend(e.to_string()))?;

        let Some(result_row) = result_row else {
            return Ok(Some((record, None, vec![])));
        };

        let links = sqlx::query!(
            "SELECT href, is_external, status_code FROM links WHERE url_id = $1",
            id
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Backend(e.to_string()))?
        .into_iter()
        .map(|r| Link {
            href: r.href,
            is_external: r.is_external,
            status_code: r.status_code as u16,
        })
        .collect();

        let result = AnalysisResult {
            html_version: result_row.html_version,
            title: result_row.title,
            h1_count: result_row.h1_count,
            h2_count: result_row.h2_count,
            h3_count: result_row.h3_count,
            h4_count: result_row.h4_count,
            h5_count: result_row.h5_count,
            h6_count: result_row.h6_count,
            has_login_form: result_row.has_login_form,
            internal_link_count: result_row.internal_link_count,
            external_link_count: result_row.external_link_count,
            broken_link_count: result_row.broken_link_count,
        };

        Ok(Some((record, Some(result), links)))
    }
}

#[async_trait]
impl UrlRepository for PgUrlRepository {
    async fn update_status(&self, id: i64, status: Status) -> Result<(), RepositoryError> {
        sqlx::query!(
            "UPDATE urls SET status = $1 WHERE id = $2",
            status.as_str(),
            id
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn find_by_id(&self, id: i64) -> Result<UrlRecord, RepositoryError> {
        let row = sqlx::query!("SELECT id, original_url, status FROM urls WHERE id = $1", id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Backend(e.to_string()))?
            .ok_or(RepositoryError::NotFound(id))?;

        let status = row
            .status
            .parse()
            .map_err(|_| RepositoryError::Backend("unrecognized status literal".into()))?;

        Ok(UrlRecord {
            id: row.id,
            original_url: row.original_url,
            status,
        })
    }

    async fn save_results(
        &self,
        id: i64,
        result: AnalysisResult,
        links: Vec<Link>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepositoryError::Backend(e.to_string()))?;

        let result_id = sqlx::query_scalar!(
            r#"INSERT INTO analysis_results
                 (url_id, html_version, title, h1_count, h2_count, h3_count,
                  h4_count, h5_count, h6_count, has_login_form,
                  internal_link_count, external_link_count, broken_link_count)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
               RETURNING id"#,
            id,
            result.html_version,
            result.title,
            result.h1_count,
            result.h2_count,
            result.h3_count,
            result.h4_count,
            result.h5_count,
            result.h6_count,
            result.has_login_form,
            result.internal_link_count,
            result.external_link_count,
            result.broken_link_count,
        )
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Backend(e.to_string()))?;

        for link in &links {
            sqlx::query!(
                r#"INSERT INTO links (url_id, result_id, href, is_external, status_code)
                   VALUES ($1, $2, $3, $4, $5)"#,
                id,
                result_id,
                link.href,
                link.is_external,
                link.status_code as i32,
            )
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Backend(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Backend(e.to_string()))?;

        Ok(())
    }
}

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};

use crawler_core::{AnalysisResult, Link, UrlRecord};

use crate::auth::UserId;
use crate::error::ApiError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/urls", get(list).post(create))
        .route("/urls/:id", get(detail).delete(remove))
        .route("/urls/:id/start", patch(start))
        .route("/urls/:id/stop", patch(stop))
        .route("/crawler/workers", patch(super::crawler::adjust_workers))
}

#[derive(Deserialize)]
struct CreateUrlRequest {
    url: String,
}

#[derive(Serialize)]
struct CreateUrlResponse {
    id: i64,
    status: &'static str,
}

async fn create(
    State(state): State<AppState>,
    Extension(UserId(user_id)): Extension<UserId>,
    Json(body): Json<CreateUrlRequest>,
) -> Result<(StatusCode, Json<CreateUrlResponse>), ApiError> {
    url::Url::parse(&body.url).map_err(|_| ApiError::BadRequest("invalid url".into()))?;
    let record = state.repo.create_url(user_id, &body.url).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateUrlResponse {
            id: record.id,
            status: record.status.as_str(),
        }),
    ))
}

#[derive(Deserialize)]
struct PageQuery {
    page: Option<i64>,
    per_page: Option<i64>,
}

#[derive(Serialize)]
struct UrlSummary {
    id: i64,
    original_url: String,
    status: &'static str,
}

impl From<UrlRecord> for UrlSummary {
    fn from(r: UrlRecord) -> Self {
        Self {
            id: r.id,
            original_url: r.original_url,
            status: r.status.as_str(),
        }
    }
}

#[derive(Serialize)]
struct PaginatedUrls {
    items: Vec<UrlSummary>,
    page: i64,
    per_page: i64,
    total: i64,
}

async fn list(
    State(state): State<AppState>,
    Extension(UserId(user_id)): Extension<UserId>,
    Query(query): Query<PageQuery>,
) -> Result<Json<PaginatedUrls>, ApiError> {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(20).clamp(1, 100);
    let (items, total) = state.repo.list_urls(user_id, page, per_page).await?;
    Ok(Json(PaginatedUrls {
        items: items.into_iter().map(UrlSummary::from).collect(),
        page,
        per_page,
        total,
    }))
}

#[derive(Serialize)]
struct LinkDto {
    href: String,
    is_external: bool,
    status_code: u16,
}

impl From<Link> for LinkDto {
    fn from(l: Link) -> Self {
        Self {
            href: l.href,
            is_external: l.is_external,
            status_code: l.status_code,
        }
    }
}

#[derive(Serialize)]
struct UrlDetail {
    id: i64,
    original_url: String,
    status: &'static str,
    result: Option<AnalysisResult>,
    links: Vec<LinkDto>,
}

async fn detail(
    State(state): State<AppState>,
    Extension(UserId(user_id)): Extension<UserId>,
    Path(id): Path<i64>,
) -> Result<Json<UrlDetail>, ApiError> {
    let (record, result, links) = state
        .repo
        .url_detail(user_id, id)
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(UrlDetail {
        id: record.id,
        original_url: record.original_url,
        status: record.status.as_str(),
        result,
        links: links.into_iter().map(LinkDto::from).collect(),
    }))
}

async fn remove(
    State(state): State<AppState>,
    Extension(UserId(user_id)): Extension<UserId>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state.repo.delete_url(user_id, id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound)
    }
}

#[derive(Deserialize)]
struct StartQuery {
    priority: Option<u8>,
}

#[derive(Serialize)]
struct StartResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    priority: Option<u8>,
}

async fn start(
    State(state): State<AppState>,
    Extension(UserId(user_id)): Extension<UserId>,
    Path(id): Path<i64>,
    Query(query): Query<StartQuery>,
) -> Result<(StatusCode, Json<StartResponse>), ApiError> {
    if !state.repo.owns(user_id, id).await? {
        return Err(ApiError::NotFound);
    }

    match query.priority {
        Some(priority) if priority != 5 => {
            state.pool.enqueue_with_priority(id, priority);
            Ok((
                StatusCode::ACCEPTED,
                Json(StartResponse {
                    status: "queued",
                    priority: Some(priority),
                }),
            ))
        }
        _ => {
            state.pool.enqueue(id);
            Ok((
                StatusCode::ACCEPTED,
                Json(StartResponse {
                    status: "queued",
                    priority: None,
                }),
            ))
        }
    }
}

#[derive(Serialize)]
struct StopResponse {
    status: &'static str,
}

async fn stop(
    State(state): State<AppState>,
    Extension(UserId(user_id)): Extension<UserId>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<StopResponse>), ApiError> {
    if state.repo.stop_url(user_id, id).await? {
        Ok((StatusCode::ACCEPTED, Json(StopResponse { status: "stopped" })))
    } else {
        Err(ApiError::NotFound)
    }
}

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crawler_core::ControlCommand;

use crate::error::ApiError;
use crate::AppState;

#[derive(Deserialize)]
pub struct WorkersQuery {
    action: WorkersAction,
    count: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum WorkersAction {
    Add,
    Remove,
}

#[derive(Serialize)]
pub struct WorkersResponse {
    action: &'static str,
    count: usize,
}

pub async fn adjust_workers(
    State(state): State<AppState>,
    Query(query): Query<WorkersQuery>,
) -> Result<Json<WorkersResponse>, ApiError> {
    let (action, command) = match query.action {
        WorkersAction::Add => ("add", ControlCommand::Add(query.count)),
        WorkersAction::Remove => ("remove", ControlCommand::Remove(query.count)),
    };
    state.pool.adjust_workers(command).await;
    Ok(Json(WorkersResponse {
        action,
        count: query.count,
    }))
}

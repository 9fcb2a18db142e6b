//! Thread index status and maintenance.

use rocket::serde::json::Json;
use rocket::{State, get, post};
use rocket_okapi::openapi;

use crate::error::ApiError;
use crate::models::{ApiResponse, IndexStatusResponse, ResetResponse};
use crate::threading::ThreadingService;

/// Index counters for an account, plus whether it currently runs memory-only.
#[openapi(tag = "Index")]
#[get("/accounts/<account>/index")]
pub async fn index_status(
    account: &str,
    service: &State<ThreadingService>,
) -> Result<Json<ApiResponse<IndexStatusResponse>>, ApiError> {
    let state = service.account(account).await?;
    let mut state = state.lock().await;

    // A failing stats query degrades the account; report that rather than fail
    let stats = match state.stats().await {
        Ok(stats) => stats,
        Err(err) => {
            log::warn!("index stats unavailable for {}: {}", state.account(), err);
            None
        }
    };

    Ok(Json(ApiResponse::new(IndexStatusResponse {
        account: state.account().to_string(),
        memory_only: state.is_memory_only(),
        storage_error: state.storage_error().map(str::to_string),
        ledger_error: state.ledger_error().map(str::to_string),
        override_count: state.overrides().len(),
        stats,
    })))
}

/// Drop every thread id and folder watermark of an account.
///
/// The override ledger is kept; the next sweep re-threads everything.
#[openapi(tag = "Index")]
#[post("/accounts/<account>/index/reset")]
pub async fn reset_index(
    account: &str,
    service: &State<ThreadingService>,
) -> Result<Json<ApiResponse<ResetResponse>>, ApiError> {
    let state = service.account(account).await?;
    let mut state = state.lock().await;
    state.reset().await?;

    log::info!("thread index reset for {}", state.account());
    Ok(Json(ApiResponse::new(ResetResponse {
        account: state.account().to_string(),
        message: "thread index cleared".to_string(),
    })))
}

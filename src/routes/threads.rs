use rocket::serde::json::Json;
use rocket::{State, get, post};
use rocket_okapi::openapi;

use crate::error::ApiError;
use crate::models::ApiResponse;
use crate::store::MemoryMailStore;
use crate::threading::ThreadingService;
use crate::threading::service::PersistSummary;
use crate::threading::view::ThreadView;

/// The thread containing a message, as a tree.
#[openapi(tag = "Threads")]
#[get("/accounts/<account>/threads/<message_id>")]
pub async fn get_thread(
    account: &str,
    message_id: &str,
    service: &State<ThreadingService>,
    store: &State<MemoryMailStore>,
) -> Result<Json<ApiResponse<ThreadView>>, ApiError> {
    let state = service.account(account).await?;
    let mut state = state.lock().await;
    let view = state.thread_for_message(store.inner(), message_id).await?;
    Ok(Json(ApiResponse::new(view)))
}

/// Every thread of an account.
///
/// `subject_grouping=true` additionally joins root-level threads that share a
/// normalized subject.
#[openapi(tag = "Threads")]
#[get("/accounts/<account>/threads?<subject_grouping>")]
pub async fn list_threads(
    account: &str,
    subject_grouping: Option<bool>,
    service: &State<ThreadingService>,
    store: &State<MemoryMailStore>,
) -> Result<Json<ApiResponse<Vec<ThreadView>>>, ApiError> {
    let state = service.account(account).await?;
    let mut state = state.lock().await;
    let views = state
        .list_threads(store.inner(), subject_grouping.unwrap_or(false))
        .await?;
    Ok(Json(ApiResponse::new(views)))
}

/// Thread the whole account from scratch and write the result back.
#[openapi(tag = "Threads")]
#[post("/accounts/<account>/rethread")]
pub async fn rethread_account(
    account: &str,
    service: &State<ThreadingService>,
    store: &State<MemoryMailStore>,
) -> Result<Json<ApiResponse<PersistSummary>>, ApiError> {
    let state = service.account(account).await?;
    let mut state = state.lock().await;
    let summary = state.rethread_all(store.inner()).await?;
    Ok(Json(ApiResponse::new(summary)))
}

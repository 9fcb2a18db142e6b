//! User corrections to the threading.
//!
//! A cut keeps a child away from a parent its headers name; a copy pastes a
//! child under a parent its headers never mention. Both are recorded in the
//! account's override ledger and replayed on every later pass.

use rocket::serde::json::Json;
use rocket::{State, post};
use rocket_okapi::openapi;

use crate::error::ApiError;
use crate::models::{ApiResponse, OverrideRequest};
use crate::store::MemoryMailStore;
use crate::threading::ThreadingService;
use crate::threading::view::ThreadView;

/// Cut a message from its parent. Returns the child's new thread.
#[openapi(tag = "Overrides")]
#[post("/accounts/<account>/overrides/cut", data = "<request>")]
pub async fn cut_message(
    account: &str,
    request: Json<OverrideRequest>,
    service: &State<ThreadingService>,
    store: &State<MemoryMailStore>,
) -> Result<Json<ApiResponse<ThreadView>>, ApiError> {
    let state = service.account(account).await?;
    let mut state = state.lock().await;
    let view = state
        .add_cut(store.inner(), &request.child_id, &request.parent_id)
        .await?;
    Ok(Json(ApiResponse::new(view)))
}

/// Paste a message under a new parent.
///
/// Answers 409 when the parent currently sits below the child.
#[openapi(tag = "Overrides")]
#[post("/accounts/<account>/overrides/copy", data = "<request>")]
pub async fn copy_message(
    account: &str,
    request: Json<OverrideRequest>,
    service: &State<ThreadingService>,
    store: &State<MemoryMailStore>,
) -> Result<Json<ApiResponse<ThreadView>>, ApiError> {
    let state = service.account(account).await?;
    let mut state = state.lock().await;
    let view = state
        .add_copy(store.inner(), &request.child_id, &request.parent_id)
        .await?;
    Ok(Json(ApiResponse::new(view)))
}

//! Message intake and folder sweeps.

use rocket::serde::json::Json;
use rocket::{State, post};
use rocket_okapi::openapi;

use crate::error::ApiError;
use crate::models::{ApiResponse, IngestRequest, IngestResponse, RejectedMessage, SyncResponse};
use crate::store::rfc822::record_from_rfc822;
use crate::store::{MemoryMailStore, MessageRecord};
use crate::threading::ThreadingService;
use crate::threading::cache::account_key;

/// Add messages to an account's mail store.
///
/// Records are validated the way the threader will read them; invalid entries
/// are reported back and skipped. Nothing is threaded until the next sweep or
/// lookup.
#[openapi(tag = "Messages")]
#[post("/accounts/<account>/messages", data = "<request>")]
pub async fn ingest_messages(
    account: &str,
    request: Json<IngestRequest>,
    service: &State<ThreadingService>,
    store: &State<MemoryMailStore>,
) -> Result<Json<ApiResponse<IngestResponse>>, ApiError> {
    let account = account_key(account)?;
    let classifier = service.config().sent_classifier();
    let IngestRequest { messages, raw } = request.into_inner();

    let mut accepted = Vec::new();
    let mut rejected = Vec::new();

    let parsed_raw = raw.into_iter().map(|message| {
        record_from_rfc822(message.content.as_bytes(), &message.folder, message.sequence_key)
    });
    let candidates = messages.into_iter().map(Ok).chain(parsed_raw);

    for (index, candidate) in candidates.enumerate() {
        let checked = candidate.and_then(|record: MessageRecord| {
            record.to_message(&classifier)?;
            Ok(record)
        });
        match checked {
            Ok(record) => accepted.push(record),
            Err(err) => rejected.push(RejectedMessage {
                index,
                reason: err.to_string(),
            }),
        }
    }

    let count = accepted.len();
    for record in accepted {
        store.insert(&account, record);
    }
    log::info!(
        "accepted {} messages for {} ({} rejected)",
        count,
        account,
        rejected.len()
    );

    Ok(Json(ApiResponse::new(IngestResponse {
        accepted: count,
        rejected,
        total_messages: store.message_count(&account),
    })))
}

/// Thread every folder that changed since its last sweep.
#[openapi(tag = "Messages")]
#[post("/accounts/<account>/sync")]
pub async fn sync_account(
    account: &str,
    service: &State<ThreadingService>,
    store: &State<MemoryMailStore>,
) -> Result<Json<ApiResponse<SyncResponse>>, ApiError> {
    let state = service.account(account).await?;
    let mut state = state.lock().await;
    let summary = state.sync_folders(store.inner()).await?;

    Ok(Json(ApiResponse::new(SyncResponse {
        account: state.account().to_string(),
        summary,
    })))
}

//! Lightweight service health endpoint used for readiness checks and tests.

use rocket::State;
use rocket::serde::json::Json;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};

use crate::models::ApiResponse;
use crate::threading::ThreadingService;

/// Basic response payload describing API health.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct HealthResponse {
    /// Static status string reporting application readiness.
    pub status: String,
    /// Accounts whose thread index is currently open.
    #[serde(rename = "openIndexes")]
    pub open_indexes: usize,
}

/// Health check endpoint; also reports how many account indexes are open.
#[openapi(tag = "Health")]
#[get("/health")]
pub fn health_check(service: &State<ThreadingService>) -> Json<ApiResponse<HealthResponse>> {
    Json(ApiResponse::new(HealthResponse {
        status: "ok".to_string(),
        open_indexes: service.registry().open_accounts().len(),
    }))
}

use rocket::http::Status;
use rocket::response::{self, Responder};
use rocket::{Request, Response};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::Map;
use rocket_okapi::okapi::openapi3::{RefOr, Response as OpenApiResponse, Responses};
use rocket_okapi::response::OpenApiResponderInner;
use rocket_okapi::OpenApiError;
use serde::Serialize;
use std::io::Cursor;

use crate::store::RecordError;
use crate::threading::{IndexError, OverrideError, ThreadingError};

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    /// The request contradicts the current thread structure
    Conflict(String),
    /// Thread storage is down; the account runs memory-only
    ServiceUnavailable(String),
    InternalError(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let (status, error_type, message) = match self {
            ApiError::NotFound(msg) => {
                log::debug!("not found: {}", msg);
                (Status::NotFound, "NotFound", msg)
            }
            ApiError::BadRequest(msg) => {
                log::debug!("bad request: {}", msg);
                (Status::BadRequest, "BadRequest", msg)
            }
            ApiError::Conflict(msg) => {
                log::debug!("conflict: {}", msg);
                (Status::Conflict, "Conflict", msg)
            }
            ApiError::ServiceUnavailable(msg) => {
                log::warn!("service unavailable: {}", msg);
                (Status::ServiceUnavailable, "ServiceUnavailable", msg)
            }
            ApiError::InternalError(msg) => {
                log::error!("internal error: {}", msg);
                (Status::InternalServerError, "InternalError", msg)
            }
        };

        let error_response = ErrorResponse {
            error: error_type.to_string(),
            message,
        };

        let json = serde_json::to_string(&error_response)
            .unwrap_or_else(|_| r#"{"error":"SerializationError","message":"Failed to serialize error"}"#.to_string());

        Response::build()
            .status(status)
            .header(rocket::http::ContentType::JSON)
            .sized_body(json.len(), Cursor::new(json))
            .ok()
    }
}

impl OpenApiResponderInner for ApiError {
    fn responses(_generator: &mut OpenApiGenerator) -> Result<Responses, OpenApiError> {
        let documented = [
            ("400", "Malformed account name, message id or request body."),
            ("404", "The message is not part of the account."),
            ("409", "The override would make a message its own ancestor."),
            ("500", "Unexpected server error."),
            ("503", "Thread storage is unavailable; the account runs memory-only."),
        ];

        let mut responses = Map::new();
        for (code, description) in documented {
            responses.insert(
                code.to_string(),
                RefOr::Object(OpenApiResponse {
                    description: description.to_string(),
                    ..Default::default()
                }),
            );
        }

        Ok(Responses {
            responses,
            ..Default::default()
        })
    }
}

impl From<ThreadingError> for ApiError {
    fn from(err: ThreadingError) -> Self {
        match err {
            ThreadingError::LoopRequestedByOverride { .. } => ApiError::Conflict(err.to_string()),
            ThreadingError::UnknownMessage(_) => ApiError::NotFound(err.to_string()),
            ThreadingError::InvalidAccount(_) => ApiError::BadRequest(err.to_string()),
            ThreadingError::StorageUnavailable(_) | ThreadingError::Cancelled => {
                ApiError::ServiceUnavailable(err.to_string())
            }
        }
    }
}

impl From<IndexError> for ApiError {
    fn from(err: IndexError) -> Self {
        ThreadingError::from(err).into()
    }
}

impl From<OverrideError> for ApiError {
    fn from(err: OverrideError) -> Self {
        ThreadingError::from(err).into()
    }
}

impl From<RecordError> for ApiError {
    fn from(err: RecordError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

//! HTTP route handlers grouped by resource domain.
//!
//! Every handler is scoped to one account under `/accounts/<account>` and
//! annotated with `#[openapi]` so `rocket_okapi` can derive an OpenAPI
//! document automatically.

pub mod health;
pub mod index;
pub mod messages;
pub mod overrides;
pub mod threads;

use rocket::http::Status;
use rocket::routes;
use threadline::models::ApiResponse;
use threadline::routes::health::{HealthResponse, health_check};
use threadline::test_support::{TestRocketBuilder, TestStore};

#[test]
fn health_endpoint_returns_ok() {
    let store = TestStore::new().expect("temporary thread store");
    let client = TestRocketBuilder::new()
        .manage_threading(store.config())
        .mount_api_routes(routes![health_check])
        .blocking_client();

    let response = client.get("/api/v1/health").dispatch();
    assert_eq!(response.status(), Status::Ok);

    let payload: ApiResponse<HealthResponse> = response.into_json().expect("valid JSON payload");
    assert_eq!(payload.data.status, "ok");
    assert_eq!(payload.data.open_indexes, 0);
}

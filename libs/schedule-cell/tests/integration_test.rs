use std::sync::Arc;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use tower::ServiceExt;
use serde_json::json;
use wiremock::{MockServer, Mock, ResponseTemplate};
use wiremock::matchers::{method, path, query_param};
use uuid::Uuid;

use schedule_cell::models::{CreateSlotRequest, ScheduleError};
use schedule_cell::router::schedule_routes;
use schedule_cell::services::slots::SlotStore;
use shared_config::AppConfig;
use shared_utils::test_utils::{TestConfig, TestUser, JwtTestUtils, MockStoreResponses};

async fn create_test_app(config: AppConfig) -> Router {
    schedule_routes(Arc::new(config))
}

fn mock_config(mock_server: &MockServer) -> AppConfig {
    let mut config = TestConfig::default().to_app_config();
    config.store_url = mock_server.uri();
    config
}

#[tokio::test]
async fn test_create_slot_success() {
    let mock_server = MockServer::start().await;

    let user = TestUser::vet("vet@example.com");
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone()).await;
    let token = JwtTestUtils::create_test_token(&user, &config.store_jwt_secret, Some(24));

    // No existing slots on the day
    Mock::given(method("GET"))
        .and(path("/rest/v1/vet_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let slot_id = Uuid::new_v4().to_string();
    Mock::given(method("POST"))
        .and(path("/rest/v1/vet_slots"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockStoreResponses::slot_response(&slot_id, &user.id, "available")
        ])))
        .mount(&mock_server)
        .await;

    let request_body = CreateSlotRequest {
        slot_date: "2025-06-15".parse().unwrap(),
        start_time: "10:00".to_string(),
        end_time: "10:30".to_string(),
        timezone: "America/New_York".to_string(),
        notes: None,
    };

    let request = Request::builder()
        .method("POST")
        .uri(&format!("/vets/{}", user.id))
        .header("authorization", format!("Bearer {}", token))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&request_body).unwrap()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json_response: serde_json::Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_response["success"], true);
    assert_eq!(json_response["slot"]["status"], "available");
}

#[tokio::test]
async fn test_create_slot_rejects_overlap() {
    let mock_server = MockServer::start().await;

    let user = TestUser::vet("vet@example.com");
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone()).await;
    let token = JwtTestUtils::create_test_token(&user, &config.store_jwt_secret, Some(24));

    // Existing 10:00-10:30 slot on the same day and timezone
    let existing_id = Uuid::new_v4().to_string();
    Mock::given(method("GET"))
        .and(path("/rest/v1/vet_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::slot_response(&existing_id, &user.id, "available")
        ])))
        .mount(&mock_server)
        .await;

    let request_body = CreateSlotRequest {
        slot_date: "2025-06-15".parse().unwrap(),
        start_time: "10:15".to_string(),
        end_time: "10:45".to_string(),
        timezone: "America/New_York".to_string(),
        notes: None,
    };

    let request = Request::builder()
        .method("POST")
        .uri(&format!("/vets/{}", user.id))
        .header("authorization", format!("Bearer {}", token))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&request_body).unwrap()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_create_slot_allows_back_to_back() {
    let mock_server = MockServer::start().await;

    let user = TestUser::vet("vet@example.com");
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone()).await;
    let token = JwtTestUtils::create_test_token(&user, &config.store_jwt_secret, Some(24));

    let existing_id = Uuid::new_v4().to_string();
    Mock::given(method("GET"))
        .and(path("/rest/v1/vet_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::slot_response(&existing_id, &user.id, "available")
        ])))
        .mount(&mock_server)
        .await;

    let created_id = Uuid::new_v4().to_string();
    Mock::given(method("POST"))
        .and(path("/rest/v1/vet_slots"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockStoreResponses::slot_response(&created_id, &user.id, "available")
        ])))
        .mount(&mock_server)
        .await;

    // Existing slot runs 10:00-10:30; sharing the boundary is fine
    let request_body = CreateSlotRequest {
        slot_date: "2025-06-15".parse().unwrap(),
        start_time: "10:30".to_string(),
        end_time: "11:00".to_string(),
        timezone: "America/New_York".to_string(),
        notes: None,
    };

    let request = Request::builder()
        .method("POST")
        .uri(&format!("/vets/{}", user.id))
        .header("authorization", format!("Bearer {}", token))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&request_body).unwrap()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_create_slot_allows_identical_window_for_another_vet() {
    let mock_server = MockServer::start().await;

    let user = TestUser::vet("vet@example.com");
    let other_vet = Uuid::new_v4().to_string();
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone()).await;
    let token = JwtTestUtils::create_test_token(&user, &config.store_jwt_secret, Some(24));

    // The other vet already offers 10:00-10:30 on the day; the overlap
    // probe is scoped to the creating vet's calendar and never sees it
    Mock::given(method("GET"))
        .and(path("/rest/v1/vet_slots"))
        .and(query_param("vet_id", format!("eq.{}", other_vet)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::slot_response(&Uuid::new_v4().to_string(), &other_vet, "available")
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/vet_slots"))
        .and(query_param("vet_id", format!("eq.{}", user.id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let slot_id = Uuid::new_v4().to_string();
    Mock::given(method("POST"))
        .and(path("/rest/v1/vet_slots"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockStoreResponses::slot_response(&slot_id, &user.id, "available")
        ])))
        .mount(&mock_server)
        .await;

    let request_body = CreateSlotRequest {
        slot_date: "2025-06-15".parse().unwrap(),
        start_time: "10:00".to_string(),
        end_time: "10:30".to_string(),
        timezone: "America/New_York".to_string(),
        notes: None,
    };

    let request = Request::builder()
        .method("POST")
        .uri(&format!("/vets/{}", user.id))
        .header("authorization", format!("Bearer {}", token))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&request_body).unwrap()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_create_slot_rejects_bad_time_format() {
    let mock_server = MockServer::start().await;

    let user = TestUser::vet("vet@example.com");
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone()).await;
    let token = JwtTestUtils::create_test_token(&user, &config.store_jwt_secret, Some(24));

    let request_body = CreateSlotRequest {
        slot_date: "2025-06-15".parse().unwrap(),
        start_time: "10am".to_string(),
        end_time: "11:00".to_string(),
        timezone: "UTC".to_string(),
        notes: None,
    };

    let request = Request::builder()
        .method("POST")
        .uri(&format!("/vets/{}", user.id))
        .header("authorization", format!("Bearer {}", token))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&request_body).unwrap()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_create_slot_rejects_unknown_timezone() {
    let mock_server = MockServer::start().await;

    let user = TestUser::vet("vet@example.com");
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone()).await;
    let token = JwtTestUtils::create_test_token(&user, &config.store_jwt_secret, Some(24));

    let request_body = CreateSlotRequest {
        slot_date: "2025-06-15".parse().unwrap(),
        start_time: "10:00".to_string(),
        end_time: "11:00".to_string(),
        timezone: "Narnia/Lantern_Waste".to_string(),
        notes: None,
    };

    let request = Request::builder()
        .method("POST")
        .uri(&format!("/vets/{}", user.id))
        .header("authorization", format!("Bearer {}", token))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&request_body).unwrap()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_create_slot_requires_calendar_owner() {
    let mock_server = MockServer::start().await;

    let user = TestUser::pet_parent("parent@example.com");
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone()).await;
    let token = JwtTestUtils::create_test_token(&user, &config.store_jwt_secret, Some(24));

    let request_body = CreateSlotRequest {
        slot_date: "2025-06-15".parse().unwrap(),
        start_time: "10:00".to_string(),
        end_time: "11:00".to_string(),
        timezone: "UTC".to_string(),
        notes: None,
    };

    let request = Request::builder()
        .method("POST")
        .uri(&format!("/vets/{}", Uuid::new_v4()))
        .header("authorization", format!("Bearer {}", token))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&request_body).unwrap()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_list_available_slots_projects_into_viewer_timezone() {
    let mock_server = MockServer::start().await;

    let user = TestUser::pet_parent("parent@example.com");
    let vet_id = Uuid::new_v4().to_string();
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone()).await;
    let token = JwtTestUtils::create_test_token(&user, &config.store_jwt_secret, Some(24));

    // Late-evening New York slot the day after the spring-forward: the UTC
    // projection crosses midnight into March 11
    let slot_id = Uuid::new_v4().to_string();
    let mut row = MockStoreResponses::slot_response(&slot_id, &vet_id, "available");
    row["slot_date"] = json!("2025-03-10");
    row["start_time"] = json!("23:30:00");
    row["end_time"] = json!("23:55:00");

    Mock::given(method("GET"))
        .and(path("/rest/v1/vet_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row])))
        .mount(&mock_server)
        .await;

    let request = Request::builder()
        .method("GET")
        .uri(&format!(
            "/vets/{}/available?from=2025-03-10&to=2025-03-10&timezone=UTC",
            vet_id
        ))
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json_response: serde_json::Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_response["count"], 1);
    assert_eq!(json_response["slots"][0]["slot_date"], "2025-03-11");
    assert_eq!(json_response["slots"][0]["start_time"], "03:30:00");
    assert_eq!(json_response["slots"][0]["end_time"], "03:55:00");
    assert_eq!(json_response["slots"][0]["timezone"], "UTC");
}

#[tokio::test]
async fn test_list_available_slots_rejects_inverted_range() {
    let mock_server = MockServer::start().await;

    let user = TestUser::pet_parent("parent@example.com");
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone()).await;
    let token = JwtTestUtils::create_test_token(&user, &config.store_jwt_secret, Some(24));

    let request = Request::builder()
        .method("GET")
        .uri(&format!(
            "/vets/{}/available?from=2025-03-20&to=2025-03-10",
            Uuid::new_v4()
        ))
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_disable_booked_slot_is_refused() {
    let mock_server = MockServer::start().await;

    let user = TestUser::vet("vet@example.com");
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone()).await;
    let token = JwtTestUtils::create_test_token(&user, &config.store_jwt_secret, Some(24));

    let slot_id = Uuid::new_v4().to_string();

    // Lookup (ownership check and post-update probe) sees a booked slot
    Mock::given(method("GET"))
        .and(path("/rest/v1/vet_slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::slot_response(&slot_id, &user.id, "booked")
        ])))
        .mount(&mock_server)
        .await;

    // The conditional update on status=available matches nothing
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/vet_slots"))
        .and(query_param("status", "eq.available"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let request = Request::builder()
        .method("POST")
        .uri(&format!("/{}/disable", slot_id))
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_disable_available_slot_succeeds() {
    let mock_server = MockServer::start().await;

    let user = TestUser::vet("vet@example.com");
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone()).await;
    let token = JwtTestUtils::create_test_token(&user, &config.store_jwt_secret, Some(24));

    let slot_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/vet_slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::slot_response(&slot_id, &user.id, "available")
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/vet_slots"))
        .and(query_param("status", "eq.available"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::slot_response(&slot_id, &user.id, "disabled")
        ])))
        .mount(&mock_server)
        .await;

    let request = Request::builder()
        .method("POST")
        .uri(&format!("/{}/disable", slot_id))
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json_response: serde_json::Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_response["slot"]["status"], "disabled");
}

#[tokio::test]
async fn test_enable_disabled_slot_succeeds() {
    let mock_server = MockServer::start().await;

    let user = TestUser::vet("vet@example.com");
    let config = mock_config(&mock_server);
    let app = create_test_app(config.clone()).await;
    let token = JwtTestUtils::create_test_token(&user, &config.store_jwt_secret, Some(24));

    let slot_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/vet_slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::slot_response(&slot_id, &user.id, "disabled")
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/vet_slots"))
        .and(query_param("status", "eq.disabled"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::slot_response(&slot_id, &user.id, "available")
        ])))
        .mount(&mock_server)
        .await;

    let request = Request::builder()
        .method("POST")
        .uri(&format!("/{}/enable", slot_id))
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

// ==============================================================================
// SLOT STORE TRANSITION TESTS (service level)
// ==============================================================================

#[tokio::test]
async fn test_reserve_flips_available_slot_to_booked() {
    let mock_server = MockServer::start().await;
    let config = mock_config(&mock_server);

    let slot_id = Uuid::new_v4();
    let vet_id = Uuid::new_v4().to_string();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/vet_slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .and(query_param("status", "eq.available"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::slot_response(&slot_id.to_string(), &vet_id, "booked")
        ])))
        .mount(&mock_server)
        .await;

    let slot_store = SlotStore::new(&config);
    let slot = slot_store.reserve(slot_id, "test-token").await.unwrap();

    assert_eq!(slot.status.to_string(), "booked");
}

#[tokio::test]
async fn test_reserve_reports_unavailable_when_race_is_lost() {
    let mock_server = MockServer::start().await;
    let config = mock_config(&mock_server);

    let slot_id = Uuid::new_v4();
    let vet_id = Uuid::new_v4().to_string();

    // Conditional update matches nothing; the follow-up read shows why
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/vet_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/vet_slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::slot_response(&slot_id.to_string(), &vet_id, "booked")
        ])))
        .mount(&mock_server)
        .await;

    let slot_store = SlotStore::new(&config);
    let err = slot_store.reserve(slot_id, "test-token").await.unwrap_err();

    assert!(matches!(err, ScheduleError::SlotUnavailable));
}

#[tokio::test]
async fn test_reserve_distinguishes_missing_slot() {
    let mock_server = MockServer::start().await;
    let config = mock_config(&mock_server);

    let slot_id = Uuid::new_v4();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/vet_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/vet_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let slot_store = SlotStore::new(&config);
    let err = slot_store.reserve(slot_id, "test-token").await.unwrap_err();

    assert!(matches!(err, ScheduleError::SlotNotFound));
}

#[tokio::test]
async fn test_release_returns_booked_slot_to_available() {
    let mock_server = MockServer::start().await;
    let config = mock_config(&mock_server);

    let slot_id = Uuid::new_v4();
    let vet_id = Uuid::new_v4().to_string();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/vet_slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .and(query_param("status", "eq.booked"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::slot_response(&slot_id.to_string(), &vet_id, "available")
        ])))
        .mount(&mock_server)
        .await;

    let slot_store = SlotStore::new(&config);
    let slot = slot_store.release(slot_id, "test-token").await.unwrap();

    assert_eq!(slot.status.to_string(), "available");
}

#[tokio::test]
async fn test_release_on_unbooked_slot_reports_not_booked() {
    let mock_server = MockServer::start().await;
    let config = mock_config(&mock_server);

    let slot_id = Uuid::new_v4();
    let vet_id = Uuid::new_v4().to_string();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/vet_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/vet_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::slot_response(&slot_id.to_string(), &vet_id, "available")
        ])))
        .mount(&mock_server)
        .await;

    let slot_store = SlotStore::new(&config);
    let err = slot_store.release(slot_id, "test-token").await.unwrap_err();

    assert!(matches!(err, ScheduleError::SlotNotBooked));
}

// ==============================================================================
// AUTHENTICATION TESTS
// ==============================================================================

#[tokio::test]
async fn test_unauthorized_requests() {
    let config = TestConfig::default().to_app_config();
    let slot_id = Uuid::new_v4();
    let vet_id = Uuid::new_v4();

    let protected_endpoints = vec![
        ("GET", format!("/{}", slot_id)),
        ("POST", format!("/{}/disable", slot_id)),
        ("POST", format!("/{}/enable", slot_id)),
        ("POST", format!("/vets/{}", vet_id)),
        ("GET", format!("/vets/{}?from=2025-01-01&to=2025-01-07", vet_id)),
        ("GET", format!("/vets/{}/available?from=2025-01-01&to=2025-01-07", vet_id)),
    ];

    for (method, uri) in protected_endpoints {
        let app = create_test_app(config.clone()).await;

        let request = Request::builder()
            .method(method)
            .uri(&uri)
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED,
                  "Failed for {} {}", method, uri);
    }
}

#[tokio::test]
async fn test_invalid_token_requests() {
    let config = TestConfig::default().to_app_config();
    let app = create_test_app(config).await;

    let request = Request::builder()
        .method("GET")
        .uri(&format!("/{}", Uuid::new_v4()))
        .header("authorization", format!("Bearer {}", JwtTestUtils::create_malformed_token()))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

/// Integration tests with mocked external APIs
/// Tests the scoring client against a mock server and the HTTP routes end to end over the
/// in-memory store.
mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::*;
use rust_leads_api::api::handlers::{self, STAFF_HEADER};
use rust_leads_api::errors::LeadError;
use rust_leads_api::integrations::prediction::{
    GuardedOracle, HttpPredictionOracle, PredictionOracle,
};

// ============ Scoring client ============

#[tokio::test]
async fn test_http_oracle_posts_lead_and_parses_scores() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/predict"))
        .and(body_partial_json(json!({
            "cif": "CIF300",
            "nomor_rekening": "7CIF300",
            "umur": 30,
            "income": 10_000_000,
            "transaction_activity": "Active"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "griya": 0.82,
            "mitraguna": 0.41
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let oracle = HttpPredictionOracle::new(mock_server.uri(), Duration::from_secs(5)).unwrap();
    let scores = oracle.predict(&new_lead("CIF300")).await.unwrap();

    assert_eq!(scores.len(), 2);
    assert_eq!(scores["griya"], 0.82);
}

#[tokio::test]
async fn test_http_oracle_server_error_is_unavailable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(503).set_body_string("model loading"))
        .mount(&mock_server)
        .await;

    let oracle = HttpPredictionOracle::new(mock_server.uri(), Duration::from_secs(5)).unwrap();
    let err = oracle.predict(&new_lead("CIF301")).await.unwrap_err();

    match err {
        LeadError::PredictionUnavailable(msg) => assert!(msg.contains("503")),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_http_oracle_rejects_malformed_scores() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "griya": -0.5 })))
        .mount(&mock_server)
        .await;

    let oracle = HttpPredictionOracle::new(mock_server.uri(), Duration::from_secs(5)).unwrap();
    assert!(matches!(
        oracle.predict(&new_lead("CIF302")).await,
        Err(LeadError::PredictionUnavailable(_))
    ));
}

#[tokio::test]
async fn test_http_oracle_times_out() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "griya": 0.5 }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&mock_server)
        .await;

    let oracle =
        HttpPredictionOracle::new(mock_server.uri(), Duration::from_millis(200)).unwrap();
    assert!(matches!(
        oracle.predict(&new_lead("CIF303")).await,
        Err(LeadError::PredictionUnavailable(_))
    ));
}

#[tokio::test]
async fn test_guarded_oracle_passes_through_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "oto": 0.3 })))
        .mount(&mock_server)
        .await;

    let oracle = GuardedOracle::new(
        HttpPredictionOracle::new(mock_server.uri(), Duration::from_secs(5)).unwrap(),
    );
    let scores = oracle.predict(&new_lead("CIF304")).await.unwrap();
    assert_eq!(scores["oto"], 0.3);
}

// ============ HTTP routes ============

fn router(svc: &Services, oracle: Arc<dyn PredictionOracle>) -> axum::Router {
    handlers::api_routes().with_state(svc.app_state(oracle))
}

fn request(method: &str, uri: &str, nip: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(nip) = nip {
        builder = builder.header(STAFF_HEADER, nip);
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn test_missing_staff_header_is_unauthorized() {
    let svc = Services::new(at(2025, 5, 2)).await;
    let app = router(&svc, Arc::new(DownOracle));

    let (status, body) = send(app, request("GET", "/api/v1/branches", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].as_str().unwrap().contains("X-Staff-NIP"));
}

#[tokio::test]
async fn test_branch_creation_is_admin_only() {
    let svc = Services::new(at(2025, 5, 2)).await;
    let app = router(&svc, Arc::new(DownOracle));

    let (status, body) = send(
        app.clone(),
        request(
            "POST",
            "/api/v1/branches",
            Some(ADMIN_NIP),
            Some(json!({ "name": "KCP Cimahi" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["name"], "KCP Cimahi");

    let (status, _) = send(
        app,
        request(
            "POST",
            "/api/v1/branches",
            Some(MARKETING_A),
            Some(json!({ "name": "KCP Lembang" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_register_staff_generates_nip() {
    let svc = Services::new(at(2025, 5, 2)).await;
    let app = router(&svc, Arc::new(DownOracle));

    let (status, body) = send(
        app.clone(),
        request(
            "POST",
            "/api/v1/staff",
            Some(ADMIN_NIP),
            Some(json!({ "name": "Fajar Nugroho", "role": "marketing", "branch_id": svc.org.branch.id })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let nip = body["nip"].as_str().unwrap();
    assert!(nip.starts_with('M') && nip.len() == 11);
    assert_eq!(body["role"], "marketing");

    let (status, _) = send(
        app,
        request(
            "POST",
            "/api/v1/staff",
            Some(ADMIN_NIP),
            Some(json!({ "name": "Tanpa Cabang", "role": "bm", "branch_id": null })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_lead_intake_and_status_over_http() {
    let svc = Services::new(at(2025, 5, 2)).await;
    let oracle = Arc::new(StaticOracle::new(&[("griya", 0.9), ("hasanahcard", 0.4)]));
    let app = router(&svc, oracle);

    let (status, body) = send(
        app.clone(),
        request(
            "POST",
            "/api/v1/leads",
            Some(BM_NIP),
            Some(serde_json::to_value(lead_request("CIF310")).unwrap()),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["lead"]["cif"], "CIF310");
    assert_eq!(body["recommendations"][0]["product_code"], "griya");
    assert_eq!(body["recommendations"][1]["max_tenor"], Value::Null);

    let (status, _) = send(
        app.clone(),
        request(
            "POST",
            "/api/v1/leads",
            Some(BM_NIP),
            Some(serde_json::to_value(lead_request("CIF310")).unwrap()),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(
        app.clone(),
        request(
            "POST",
            "/api/v1/leads/CIF310/status",
            Some(MARKETING_A),
            Some(json!({ "status": "closed", "product_id": svc.product("griya"), "amount": 300_000_000 })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "closed");

    let (status, _) = send(
        app.clone(),
        request(
            "POST",
            "/api/v1/leads/CIF310/status",
            Some(MARKETING_A),
            Some(json!({ "status": "contacted" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(
        app.clone(),
        request("GET", "/api/v1/leads/CIF310", Some(MARKETING_A), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["assignment"]["amount"], 300_000_000);

    let (status, _) = send(
        app.clone(),
        request("GET", "/api/v1/leads/CIF310", Some(MARKETING_B), None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        app.clone(),
        request("GET", "/api/v1/leads/CIF310", Some(BM_NIP), None),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        app,
        request(
            "GET",
            "/api/v1/leads/assigned?status=closed&search=cif310",
            Some(MARKETING_A),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["lead"]["cif"], "CIF310");
    assert_eq!(body[0]["assignment"]["status"], "closed");
}

#[tokio::test]
async fn test_unavailable_prediction_is_bad_gateway() {
    let svc = Services::new(at(2025, 5, 2)).await;
    let app = router(&svc, Arc::new(DownOracle));

    let (status, _) = send(
        app,
        request(
            "POST",
            "/api/v1/leads",
            Some(ADMIN_NIP),
            Some(serde_json::to_value(lead_request("CIF311")).unwrap()),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_targets_and_reports_over_http() {
    let svc = Services::new(at(2025, 5, 2)).await;
    let app = router(&svc, Arc::new(DownOracle));
    let griya = svc.product("griya");

    let (status, _) = send(
        app.clone(),
        request(
            "POST",
            "/api/v1/targets/yearly",
            Some(BM_NIP),
            Some(json!({ "year": 2025, "targets": [{ "product_id": griya, "amount": 1_200_000_000 }] })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let marketing_uri = format!("/api/v1/targets/marketing/{}", MARKETING_A);
    let (status, _) = send(
        app.clone(),
        request(
            "POST",
            &marketing_uri,
            Some(BM_NIP),
            Some(json!({ "year": 2025, "month": 5, "targets": [{ "product_id": griya, "amount": 120_000_000 }] })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = send(
        app.clone(),
        request(
            "POST",
            &marketing_uri,
            Some(BM_NIP),
            Some(json!({ "year": 2025, "month": 5, "targets": [{ "product_id": griya, "amount": 40_000_000 }] })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        app.clone(),
        request(
            "GET",
            "/api/v1/targets/branch?month=5&year=2025",
            Some(BM_NIP),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["assigned_amount"], 40_000_000);
    assert_eq!(body[0]["unassigned_amount"], 60_000_000);

    let (status, body) = send(
        app.clone(),
        request(
            "GET",
            &format!("/api/v1/monitoring/staff/{}?month=5&year=2025", MARKETING_A),
            Some(BM_NIP),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["nip"], MARKETING_A);
    assert_eq!(body["monthly_target"], 40_000_000);

    let (status, _) = send(
        app,
        request(
            "GET",
            &format!("/api/v1/reports/branch/{}?month=13&year=2025", svc.org.branch.id),
            Some(BM_NIP),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_monitoring_views_over_http() {
    let svc = Services::new(at(2025, 5, 2)).await;
    let app = router(&svc, Arc::new(DownOracle));
    let griya = svc.product("griya");

    let (status, _) = send(
        app.clone(),
        request(
            "POST",
            "/api/v1/targets/yearly",
            Some(BM_NIP),
            Some(json!({ "year": 2025, "targets": [{ "product_id": griya, "amount": 1_200_000_000 }] })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        app.clone(),
        request("GET", "/api/v1/targets/yearly?year=2025", Some(BM_NIP), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["amount"], 1_200_000_000);

    let (status, _) = send(
        app.clone(),
        request("GET", "/api/v1/targets/yearly?year=2025", Some(MARKETING_A), None),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        app.clone(),
        request(
            "POST",
            &format!("/api/v1/targets/marketing/{}", MARKETING_A),
            Some(BM_NIP),
            Some(json!({ "year": 2025, "month": 5, "targets": [{ "product_id": griya, "amount": 40_000_000 }] })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    svc.close_lead_at("CIF320", MARKETING_A, "griya", 25_000_000, at(2025, 5, 12))
        .await;

    let (status, body) = send(
        app.clone(),
        request(
            "GET",
            "/api/v1/monitoring/assignment?month=5&year=2025&has_target=true",
            Some(BM_NIP),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["nip"], MARKETING_A);
    assert_eq!(body[0]["total_target"], 40_000_000);

    let (status, body) = send(
        app.clone(),
        request(
            "GET",
            &format!(
                "/api/v1/monitoring/product-performance?product_id={}&start_date=2025-04-01&end_date=2025-05-31&group_by=month",
                griya
            ),
            Some(BM_NIP),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["labels"], json!(["2025-04", "2025-05"]));
    assert_eq!(body["series"][0]["data"], json!([0, 25_000_000]));
    assert_eq!(body["series"][1]["nip"], MARKETING_A);
    assert_eq!(body["series"][1]["targets"], json!([0, 40_000_000]));

    let (status, _) = send(
        app,
        request(
            "GET",
            &format!(
                "/api/v1/monitoring/product-performance?product_id={}&start_date=2025-06-01&end_date=2025-05-01&group_by=month",
                griya
            ),
            Some(BM_NIP),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

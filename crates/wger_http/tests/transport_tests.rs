//! `ReqwestTransport` against a local wiremock server.

use std::sync::Arc;
use std::time::Duration;
use url::Url;
use wger_core::{FixedRandom, ManualClock, RetryConfig};
use wger_http::{
    ApiError, RequestSpec, ReqwestTransport, ResilientClient, ResponseBody, RetryPolicy,
};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer, retry: Option<RetryConfig>) -> ResilientClient {
    let mut builder = ResilientClient::builder(
        Url::parse(&server.uri()).unwrap(),
        Arc::new(ReqwestTransport::default()),
    )
    .timeout(Duration::from_millis(500))
    .token("test-token")
    .unwrap();
    if let Some(cfg) = retry {
        builder = builder.retry(RetryPolicy::new(
            &cfg,
            Arc::new(ManualClock::default()),
            Arc::new(FixedRandom(0.5)),
        ));
    }
    builder.build()
}

#[tokio::test]
async fn test_get_with_auth_and_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/workout/"))
        .and(query_param("limit", "20"))
        .and(header("authorization", "Token test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "count": 1,
            "results": [{"id": 7, "name": "Legs"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, None);
    let response = client
        .execute(&RequestSpec::get("/api/v2/workout/").query("limit", 20))
        .await
        .unwrap();

    let value: serde_json::Value = response.json().unwrap();
    assert_eq!(value["results"][0]["name"], "Legs");
}

#[tokio::test]
async fn test_post_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/weightentry/"))
        .and(body_json(serde_json::json!({"date": "2024-05-01", "weight": "80.5"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": 1})))
        .mount(&server)
        .await;

    let client = client_for(&server, None);
    let spec = RequestSpec::new(reqwest::Method::POST, "/api/v2/weightentry/")
        .json(serde_json::json!({"date": "2024-05-01", "weight": "80.5"}));
    let response = client.execute(&spec).await.unwrap();
    assert_eq!(response.status, 201);
}

#[tokio::test]
async fn test_error_body_is_parsed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(serde_json::json!({"name": ["required"]})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Some(RetryConfig::default()));
    let err = client
        .execute(&RequestSpec::get("/api/v2/workout/"))
        .await
        .unwrap_err();

    match err {
        ApiError::Http { status, body, .. } => {
            assert_eq!(status, 400);
            assert_eq!(
                body,
                Some(ResponseBody::Json(serde_json::json!({"name": ["required"]})))
            );
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn test_retries_503_against_real_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let client = client_for(&server, Some(RetryConfig::default()));
    let err = client
        .execute(&RequestSpec::get("/api/v2/meal/"))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(503));
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let client = client_for(&server, None);
    let err = client
        .execute(&RequestSpec::get("/api/v2/workout/"))
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "expected timeout, got {err:?}");
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    // Grab a free port and release it so nothing is listening there.
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let client = ResilientClient::builder(
        Url::parse(&format!("http://{}", addr)).unwrap(),
        Arc::new(ReqwestTransport::default()),
    )
    .build();

    let err = client
        .execute(&RequestSpec::get("/api/v2/workout/"))
        .await
        .unwrap_err();
    assert!(err.is_network_failure(), "expected network error, got {err:?}");
}

use chrono::{TimeDelta, Utc};
use httpmock::prelude::*;
use mailsafepro_client::{Client, Credentials, Error, SuggestedAction, TokenPair};
use serde_json::{Value, json};
use std::time::Duration;

const API_KEY: &str = "test_key_12345678901234567890";

fn result_payload(email: &str, valid: bool) -> Value {
    json!({
        "email": email,
        "valid": valid,
        "detail": if valid { "Valid email" } else { "Invalid domain" },
        "processingtime": 0.123,
        "riskscore": if valid { 0.1 } else { 0.9 },
        "qualityscore": if valid { 0.9 } else { 0.1 },
        "validationtier": "basic",
        "suggestedaction": if valid { "accept" } else { "reject" },
        "status": if valid { "deliverable" } else { "undeliverable" },
        "provideranalysis": {"provider": "gmail", "reputation": 0.95},
        "smtpvalidation": {"checked": false},
    })
}

async fn api_key_client(server: &MockServer) -> Client {
    Client::builder()
        .api_key(API_KEY)
        .base_url(server.base_url())
        .retry_base_delay(Duration::from_millis(1))
        .build()
        .await
        .unwrap()
}

async fn jwt_client(server: &MockServer, access: &str, expires_in: TimeDelta) -> Client {
    Client::builder()
        .tokens(TokenPair::new(access, "refresh-1", Utc::now() + expires_in))
        .base_url(server.base_url())
        .retry_base_delay(Duration::from_millis(1))
        .build()
        .await
        .unwrap()
}

#[tokio::test]
async fn validate_maps_successful_response() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/validate")
                .header("x-api-key", API_KEY)
                .json_body_partial(r#"{"email": "test@example.com"}"#);
            then.status(200)
                .json_body(result_payload("test@example.com", true));
        })
        .await;

    let client = api_key_client(&server).await;
    let result = client.validate("test@example.com").await.unwrap();

    mock.assert_hits_async(1).await;
    assert_eq!(result.email, "test@example.com");
    assert!(result.is_valid);
    assert!(result.deliverable);
    assert_eq!(result.suggested_action, SuggestedAction::Accept);
    assert_eq!(result.quality_score, Some(0.9));
    assert_eq!(result.provider_analysis.unwrap().provider, "gmail");
}

#[tokio::test]
async fn malformed_email_is_rejected_without_request() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/validate");
            then.status(200).json_body(result_payload("x@y.z", true));
        })
        .await;

    let client = api_key_client(&server).await;
    for email in ["invalid-email", "invalid@", "@example.com", ""] {
        let err = client.validate(email).await.unwrap_err();
        assert!(
            matches!(&err, Error::Validation { email: got, .. } if got == email),
            "{email:?}: {err:?}"
        );
    }

    mock.assert_hits_async(0).await;
}

#[tokio::test]
async fn rate_limit_surfaces_retry_after_without_retrying() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/validate");
            then.status(429).header("Retry-After", "60");
        })
        .await;

    let client = api_key_client(&server).await;
    let err = client.validate("test@example.com").await.unwrap_err();

    assert!(matches!(err, Error::RateLimit { retry_after: 60 }));
    assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));
    mock.assert_hits_async(1).await;
}

#[tokio::test]
async fn rate_limit_reads_body_hint_or_defaults() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/validate")
                .json_body_partial(r#"{"email": "hinted@example.com"}"#);
            then.status(429).json_body(json!({"detail": "slow down", "retry_after": 5}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/validate")
                .json_body_partial(r#"{"email": "bare@example.com"}"#);
            then.status(429);
        })
        .await;

    let client = api_key_client(&server).await;
    let hinted = client.validate("hinted@example.com").await.unwrap_err();
    let bare = client.validate("bare@example.com").await.unwrap_err();

    assert!(matches!(hinted, Error::RateLimit { retry_after: 5 }));
    assert!(matches!(bare, Error::RateLimit { retry_after: 60 }));
}

#[tokio::test]
async fn api_key_unauthorized_never_refreshes() {
    let server = MockServer::start_async().await;
    let validate = server
        .mock_async(|when, then| {
            when.method(POST).path("/validate");
            then.status(401).json_body(json!({"detail": "Invalid API Key"}));
        })
        .await;
    let refresh = server
        .mock_async(|when, then| {
            when.method(POST).path("/auth/refresh");
            then.status(200).json_body(json!({
                "access_token": "fresh",
                "refresh_token": "refresh-2",
                "expires_in": 900
            }));
        })
        .await;

    let client = api_key_client(&server).await;
    let err = client.validate("test@example.com").await.unwrap_err();

    match err {
        Error::Authentication { message, status } => {
            assert_eq!(message, "Invalid API Key");
            assert_eq!(status, Some(401));
        }
        other => panic!("expected authentication error, got {other:?}"),
    }
    validate.assert_hits_async(1).await;
    refresh.assert_hits_async(0).await;
}

#[tokio::test]
async fn expired_token_is_refreshed_once_and_retried() {
    let server = MockServer::start_async().await;
    let stale = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/validate")
                .header("authorization", "Bearer stale");
            then.status(401).json_body(json!({"detail": "Token expired"}));
        })
        .await;
    let refresh = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/auth/refresh")
                .json_body_partial(r#"{"refresh_token": "refresh-1"}"#);
            then.status(200).json_body(json!({
                "access_token": "fresh",
                "refresh_token": "refresh-2",
                "expires_in": 900
            }));
        })
        .await;
    let fresh = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/validate")
                .header("authorization", "Bearer fresh");
            then.status(200)
                .json_body(result_payload("test@example.com", true));
        })
        .await;

    let client = jwt_client(&server, "stale", TimeDelta::hours(1)).await;
    let result = client.validate("test@example.com").await.unwrap();

    assert!(result.is_valid);
    stale.assert_hits_async(1).await;
    refresh.assert_hits_async(1).await;
    fresh.assert_hits_async(1).await;
    match client.credentials().await {
        Some(Credentials::Jwt(tokens)) => {
            assert_eq!(tokens.access_token, "fresh");
            assert_eq!(tokens.refresh_token, "refresh-2");
        }
        other => panic!("expected JWT credentials, got {other:?}"),
    }
}

#[tokio::test]
async fn second_unauthorized_after_refresh_is_final() {
    let server = MockServer::start_async().await;
    let validate = server
        .mock_async(|when, then| {
            when.method(POST).path("/validate");
            then.status(401).json_body(json!({"detail": "Token revoked"}));
        })
        .await;
    let refresh = server
        .mock_async(|when, then| {
            when.method(POST).path("/auth/refresh");
            then.status(200).json_body(json!({
                "access_token": "fresh",
                "refresh_token": "refresh-2",
                "expires_in": 900
            }));
        })
        .await;

    let client = jwt_client(&server, "stale", TimeDelta::hours(1)).await;
    let err = client.validate("test@example.com").await.unwrap_err();

    assert!(matches!(err, Error::Authentication { status: Some(401), .. }));
    validate.assert_hits_async(2).await;
    refresh.assert_hits_async(1).await;
}

#[tokio::test]
async fn concurrent_calls_share_one_refresh() {
    let server = MockServer::start_async().await;
    let refresh = server
        .mock_async(|when, then| {
            when.method(POST).path("/auth/refresh");
            then.status(200)
                .delay(Duration::from_millis(100))
                .json_body(json!({
                    "access_token": "fresh",
                    "refresh_token": "refresh-2",
                    "expires_in": 900
                }));
        })
        .await;
    let validate = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/validate")
                .header("authorization", "Bearer fresh");
            then.status(200)
                .json_body(result_payload("test@example.com", true));
        })
        .await;

    // Inside the default 30 s skew window, so every caller wants a refresh.
    let client = jwt_client(&server, "expiring", TimeDelta::seconds(10)).await;
    let calls = (0..10).map(|_| client.validate("test@example.com"));
    let results = futures::future::join_all(calls).await;

    assert!(results.iter().all(Result::is_ok));
    refresh.assert_hits_async(1).await;
    validate.assert_hits_async(10).await;
}

#[tokio::test]
async fn rejected_refresh_clears_session() {
    let server = MockServer::start_async().await;
    let refresh = server
        .mock_async(|when, then| {
            when.method(POST).path("/auth/refresh");
            then.status(401).json_body(json!({"detail": "Refresh token expired"}));
        })
        .await;
    let validate = server
        .mock_async(|when, then| {
            when.method(POST).path("/validate");
            then.status(200)
                .json_body(result_payload("test@example.com", true));
        })
        .await;

    let client = jwt_client(&server, "expiring", TimeDelta::seconds(-5)).await;
    let err = client.validate("test@example.com").await.unwrap_err();
    assert!(matches!(err, Error::Authentication { .. }));
    assert!(!client.is_authenticated().await);

    // No second refresh attempt once the session is gone.
    let err = client.validate("test@example.com").await.unwrap_err();
    assert!(matches!(err, Error::Authentication { status: None, .. }));
    refresh.assert_hits_async(1).await;
    validate.assert_hits_async(0).await;
}

#[tokio::test]
async fn quota_and_bad_request_are_classified() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/validate")
                .json_body_partial(r#"{"email": "paid@example.com"}"#);
            then.status(402).json_body(json!({"detail": "Payment required"}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/validate")
                .json_body_partial(r#"{"email": "daily@example.com"}"#);
            then.status(403).json_body(json!({"detail": "Daily quota exceeded"}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/validate")
                .json_body_partial(r#"{"email": "denied@example.com"}"#);
            then.status(403).json_body(json!({"detail": "Forbidden"}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/validate")
                .json_body_partial(r#"{"email": "odd@example.com"}"#);
            then.status(400).json_body(json!({"detail": "Email too long"}));
        })
        .await;

    let client = api_key_client(&server).await;
    assert!(matches!(
        client.validate("paid@example.com").await,
        Err(Error::QuotaExceeded { status: 402, .. })
    ));
    assert!(matches!(
        client.validate("daily@example.com").await,
        Err(Error::QuotaExceeded { status: 403, .. })
    ));
    assert!(matches!(
        client.validate("denied@example.com").await,
        Err(Error::Authentication { status: Some(403), .. })
    ));
    match client.validate("odd@example.com").await {
        Err(Error::BadRequest { status, detail }) => {
            assert_eq!(status, 400);
            assert_eq!(detail, "Email too long");
        }
        other => panic!("expected bad request, got {other:?}"),
    }
}

#[tokio::test]
async fn server_errors_are_retried_with_a_bound() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/validate");
            then.status(503).body("maintenance");
        })
        .await;

    let client = Client::builder()
        .api_key(API_KEY)
        .base_url(server.base_url())
        .max_retries(2)
        .retry_base_delay(Duration::from_millis(1))
        .build()
        .await
        .unwrap();
    let err = client.validate("test@example.com").await.unwrap_err();

    match err {
        Error::Server { status, detail } => {
            assert_eq!(status, 503);
            assert_eq!(detail, "maintenance");
        }
        other => panic!("expected server error, got {other:?}"),
    }
    mock.assert_hits_async(3).await;
}

#[tokio::test]
async fn missing_required_field_is_a_parse_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/validate");
            then.status(200).json_body(json!({"valid": true}));
        })
        .await;

    let client = api_key_client(&server).await;
    let err = client.validate("test@example.com").await.unwrap_err();
    assert!(matches!(err, Error::ResponseParse(_)));
}

#[tokio::test]
async fn batch_in_single_request_recomputes_counts() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/validate")
                .json_body_partial(r#"{"emails": ["valid@example.com", "invalid@example.com"]}"#);
            then.status(200).json_body(json!({
                "count": 2,
                "validcount": 1,
                "invalidcount": 1,
                "processingtime": 0.5,
                "averagetime": 0.25,
                "results": [
                    result_payload("valid@example.com", true),
                    result_payload("invalid@example.com", false),
                ]
            }));
        })
        .await;

    let client = api_key_client(&server).await;
    let batch = client
        .validate_batch(&["valid@example.com", "invalid@example.com"])
        .await
        .unwrap();

    mock.assert_hits_async(1).await;
    assert_eq!(batch.total_count(), 2);
    assert_eq!(batch.valid_count(), 1);
    assert_eq!(batch.invalid_count(), 1);
    assert_eq!(batch.deliverable_count(), 1);
    assert!(batch.valid_count() + batch.invalid_count() <= batch.total_count());
    assert_eq!(batch.processing_time(), 0.5);
    assert_eq!(batch.average_time(), 0.25);
    assert_eq!(batch.results()[0].email, "valid@example.com");
}

#[tokio::test]
async fn batch_preserves_input_order_across_chunks() {
    let server = MockServer::start_async().await;
    let emails = ["first@example.com", "second@example.com", "third@example.com"];
    let delays = [300, 100, 0];
    let mut mocks = Vec::new();
    for (email, delay) in emails.iter().zip(delays) {
        let body = format!(r#"{{"emails": ["{email}"]}}"#);
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/validate").json_body_partial(body);
                then.status(200)
                    .delay(Duration::from_millis(delay))
                    .json_body(json!({
                        "processingtime": 0.1,
                        "averagetime": 0.1,
                        "results": [result_payload(email, *email != "second@example.com")]
                    }));
            })
            .await;
        mocks.push(mock);
    }

    let client = Client::builder()
        .api_key(API_KEY)
        .base_url(server.base_url())
        .batch_size(1)
        .batch_concurrency(3)
        .build()
        .await
        .unwrap();
    let batch = client.validate_batch(&emails).await.unwrap();

    for mock in &mocks {
        mock.assert_hits_async(1).await;
    }
    let order: Vec<_> = batch.results().iter().map(|r| r.email.as_str()).collect();
    assert_eq!(order, emails);
    assert_eq!(batch.total_count(), 3);
    assert_eq!(batch.valid_count(), 2);
    assert_eq!(batch.invalid_count(), 1);
    assert!((batch.processing_time() - 0.3).abs() < 1e-9);
}

#[tokio::test]
async fn batch_with_malformed_entry_sends_nothing() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/validate");
            then.status(200).json_body(json!({"results": []}));
        })
        .await;

    let client = api_key_client(&server).await;
    let err = client
        .validate_batch(&["ok@example.com", "broken"])
        .await
        .unwrap_err();
    assert!(matches!(&err, Error::Validation { email, .. } if email == "broken"));

    let empty: [&str; 0] = [];
    assert!(matches!(
        client.validate_batch(&empty).await,
        Err(Error::Validation { .. })
    ));
    mock.assert_hits_async(0).await;
}

#[tokio::test]
async fn login_then_logout_clears_session() {
    let server = MockServer::start_async().await;
    let login = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/auth/login")
                .json_body_partial(r#"{"username": "user@example.com", "password": "password"}"#);
            then.status(200).json_body(json!({
                "access_token": "access_token_xxx",
                "refresh_token": "refresh_token_xxx",
                "expires_in": 900
            }));
        })
        .await;
    let logout = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/auth/logout")
                .header("authorization", "Bearer access_token_xxx");
            then.status(204);
        })
        .await;
    let validate = server
        .mock_async(|when, then| {
            when.method(POST).path("/validate");
            then.status(200)
                .json_body(result_payload("test@example.com", true));
        })
        .await;

    let client = Client::builder()
        .credentials("user@example.com", "password")
        .base_url(server.base_url())
        .build()
        .await
        .unwrap();

    login.assert_hits_async(1).await;
    match client.credentials().await {
        Some(Credentials::Jwt(tokens)) => {
            assert_eq!(tokens.access_token, "access_token_xxx");
            assert_eq!(tokens.refresh_token, "refresh_token_xxx");
        }
        other => panic!("expected JWT credentials, got {other:?}"),
    }
    let expires_at = client.session_expires_at().await.unwrap();
    assert!(expires_at > Utc::now() + TimeDelta::seconds(800));

    client.logout().await;
    logout.assert_hits_async(1).await;
    assert!(client.credentials().await.is_none());

    let err = client.validate("test@example.com").await.unwrap_err();
    assert!(matches!(err, Error::Authentication { .. }));
    validate.assert_hits_async(0).await;
}

#[tokio::test]
async fn logout_swallows_server_failure() {
    let server = MockServer::start_async().await;
    let logout = server
        .mock_async(|when, then| {
            when.method(POST).path("/auth/logout");
            then.status(500);
        })
        .await;

    let client = jwt_client(&server, "access", TimeDelta::hours(1)).await;
    client.logout().await;

    logout.assert_hits_async(1).await;
    assert!(!client.is_authenticated().await);

    // A second logout has nothing to invalidate.
    client.logout().await;
    logout.assert_hits_async(1).await;
}

#[tokio::test]
async fn login_rejection_is_an_authentication_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/auth/login");
            then.status(401).json_body(json!({"detail": "Incorrect username or password"}));
        })
        .await;

    let err = Client::builder()
        .credentials("user@example.com", "wrong")
        .base_url(server.base_url())
        .build()
        .await
        .unwrap_err();

    match err {
        Error::Authentication { message, status } => {
            assert_eq!(message, "login rejected: Incorrect username or password");
            assert_eq!(status, Some(401));
        }
        other => panic!("expected authentication error, got {other:?}"),
    }
}

#[tokio::test]
async fn explicit_refresh_rotates_tokens() {
    let server = MockServer::start_async().await;
    let refresh = server
        .mock_async(|when, then| {
            when.method(POST).path("/auth/refresh");
            then.status(200).json_body(json!({
                "access_token": "fresh",
                "expires_in": 900
            }));
        })
        .await;

    let client = jwt_client(&server, "access", TimeDelta::hours(1)).await;
    client.refresh().await.unwrap();

    refresh.assert_hits_async(1).await;
    match client.credentials().await {
        Some(Credentials::Jwt(tokens)) => {
            assert_eq!(tokens.access_token, "fresh");
            assert_eq!(tokens.refresh_token, "refresh-1");
        }
        other => panic!("expected JWT credentials, got {other:?}"),
    }

    let api = api_key_client(&server).await;
    assert!(matches!(api.refresh().await, Err(Error::Authentication { .. })));
}

#[tokio::test]
async fn call_timeout_cancels_slow_requests() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/validate");
            then.status(200)
                .delay(Duration::from_millis(500))
                .json_body(result_payload("test@example.com", true));
        })
        .await;

    let limit = Duration::from_millis(50);
    let client = Client::builder()
        .api_key(API_KEY)
        .base_url(server.base_url())
        .call_timeout(limit)
        .build()
        .await
        .unwrap();

    let err = client.validate("test@example.com").await.unwrap_err();
    assert!(matches!(err, Error::Timeout(d) if d == limit));
}

#[tokio::test]
async fn api_key_logout_is_a_no_op() {
    let server = MockServer::start_async().await;
    let logout = server
        .mock_async(|when, then| {
            when.method(POST).path("/auth/logout");
            then.status(204);
        })
        .await;

    let client = api_key_client(&server).await;
    client.logout().await;

    logout.assert_hits_async(0).await;
    assert!(matches!(
        client.credentials().await,
        Some(Credentials::ApiKey(key)) if key == API_KEY
    ));
}

#[tokio::test]
async fn batch_with_missing_results_is_a_parse_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/validate");
            then.status(200).json_body(json!({
                "processingtime": 0.1,
                "averagetime": 0.1,
                "results": [result_payload("a@example.com", true)]
            }));
        })
        .await;

    let client = api_key_client(&server).await;
    let err = client
        .validate_batch(&["a@example.com", "b@example.com", "c@example.com"])
        .await
        .unwrap_err();

    match err {
        Error::ResponseParse(message) => {
            assert!(message.contains("chunk 0"), "{message}");
            assert!(message.contains("sent 3"), "{message}");
            assert!(message.contains("received 1"), "{message}");
        }
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[tokio::test]
async fn smtp_check_flag_is_sent() {
    let server = MockServer::start_async().await;
    let single = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/validate")
                .json_body_partial(r#"{"email": "test@example.com", "check_smtp": true}"#);
            then.status(200)
                .json_body(result_payload("test@example.com", true));
        })
        .await;
    let batch = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/validate")
                .json_body_partial(r#"{"emails": ["test@example.com"], "check_smtp": true}"#);
            then.status(200).json_body(json!({
                "results": [result_payload("test@example.com", true)]
            }));
        })
        .await;

    let client = Client::builder()
        .api_key(API_KEY)
        .base_url(server.base_url())
        .check_smtp(true)
        .build()
        .await
        .unwrap();
    client.validate("test@example.com").await.unwrap();
    client.validate_batch(&["test@example.com"]).await.unwrap();

    single.assert_hits_async(1).await;
    batch.assert_hits_async(1).await;
}

#[tokio::test]
async fn timed_out_refresh_keeps_previous_tokens() {
    let server = MockServer::start_async().await;
    let refresh = server
        .mock_async(|when, then| {
            when.method(POST).path("/auth/refresh");
            then.status(200)
                .delay(Duration::from_millis(500))
                .json_body(json!({
                    "access_token": "fresh",
                    "refresh_token": "refresh-2",
                    "expires_in": 900
                }));
        })
        .await;
    let validate = server
        .mock_async(|when, then| {
            when.method(POST).path("/validate");
            then.status(200)
                .json_body(result_payload("test@example.com", true));
        })
        .await;

    // Inside the default 30 s skew, so the call refreshes before validating.
    let original = TokenPair::new("expiring", "refresh-1", Utc::now() + TimeDelta::seconds(10));
    let limit = Duration::from_millis(50);
    let client = Client::builder()
        .tokens(original.clone())
        .base_url(server.base_url())
        .call_timeout(limit)
        .build()
        .await
        .unwrap();

    let err = client.validate("test@example.com").await.unwrap_err();

    assert!(matches!(err, Error::Timeout(d) if d == limit));
    refresh.assert_hits_async(1).await;
    validate.assert_hits_async(0).await;
    assert_eq!(client.credentials().await, Some(Credentials::Jwt(original)));
}

#[tokio::test]
async fn unreachable_server_gives_up_after_retries() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = Client::builder()
        .api_key(API_KEY)
        .base_url(format!("http://127.0.0.1:{port}"))
        .max_retries(2)
        .retry_base_delay(Duration::from_millis(1))
        .call_timeout(Duration::from_secs(5))
        .build()
        .await
        .unwrap();

    let started = std::time::Instant::now();
    let err = client.validate("test@example.com").await.unwrap_err();

    assert!(matches!(err, Error::Request(_)), "{err:?}");
    assert!(err.is_retryable());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn server_error_recovers_on_retry() {
    let server = MockServer::start_async().await;
    let mut unavailable = server
        .mock_async(|when, then| {
            when.method(POST).path("/validate");
            then.status(503).body("maintenance");
        })
        .await;

    let client = Client::builder()
        .api_key(API_KEY)
        .base_url(server.base_url())
        .max_retries(2)
        .retry_base_delay(Duration::from_millis(300))
        .build()
        .await
        .unwrap();

    let recover = async {
        while unavailable.hits_async().await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        unavailable.delete_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/validate");
                then.status(200)
                    .json_body(result_payload("test@example.com", true));
            })
            .await
    };
    let (result, available) = tokio::join!(client.validate("test@example.com"), recover);

    let result = result.unwrap();
    assert!(result.is_valid);
    available.assert_hits_async(1).await;
}

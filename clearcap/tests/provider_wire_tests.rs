mod common;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use clearcap::config::ProvidersConfig;
use clearcap::providers::{
    build_providers, order_providers, CaptchaProvider, CaptchaTask, PollStatus, ProviderError,
    Solution, Submission, TaskApiClient, TaskApiFlavor, TaskCategory, TaskHandle,
    TwoCaptchaClient,
};
use clearcap::{Method, Pipeline, ProviderCredentials, ResolveRequest};

use common::{captcha_png, fast_config, ScriptedRecognizer};

fn providers_config(base_url: &str) -> ProvidersConfig {
    ProvidersConfig {
        twocaptcha_base_url: Some(base_url.to_string()),
        anticaptcha_base_url: Some(base_url.to_string()),
        capsolver_base_url: Some(base_url.to_string()),
        capmonster_base_url: Some(base_url.to_string()),
        request_timeout_secs: 5,
        poll_interval_ms: 0,
        max_polls: 5,
        initial_poll_delay_ms: 0,
    }
}

fn task_client(flavor: TaskApiFlavor, server: &MockServer) -> TaskApiClient {
    TaskApiClient::new(flavor, &providers_config(&server.uri())).unwrap()
}

fn json_response(body: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(body)
}

fn handle(id: &str) -> TaskHandle {
    TaskHandle {
        task_id: id.to_string(),
    }
}

// 2captcha: in.php / res.php

#[tokio::test]
async fn test_two_captcha_submit_image() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/in.php"))
        .and(body_string_contains("key=secret"))
        .and(body_string_contains("method=base64"))
        .and(body_string_contains("json=1"))
        .and(body_string_contains("min_len=5"))
        .respond_with(json_response(json!({"status": 1, "request": "73842712"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = TwoCaptchaClient::new(&providers_config(&server.uri())).unwrap();
    let submission = client
        .submit(&CaptchaTask::image(b"png-bytes", Some(5)), "secret")
        .await
        .unwrap();

    assert_eq!(submission, Submission::Queued(handle("73842712")));
}

#[tokio::test]
async fn test_two_captcha_wrong_key_is_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/in.php"))
        .respond_with(json_response(json!({
            "status": 0,
            "request": "ERROR_WRONG_USER_KEY",
            "error_text": "You've provided key parameter value in incorrect format"
        })))
        .mount(&server)
        .await;

    let client = TwoCaptchaClient::new(&providers_config(&server.uri())).unwrap();
    let err = client
        .submit(&CaptchaTask::image(b"png", None), "bad")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ProviderError::Rejected(ref detail) if detail.starts_with("ERROR_WRONG_USER_KEY")
    ));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_two_captcha_no_slot_is_transient() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/in.php"))
        .respond_with(json_response(json!({"status": 0, "request": "ERROR_NO_SLOT_AVAILABLE"})))
        .mount(&server)
        .await;

    let client = TwoCaptchaClient::new(&providers_config(&server.uri())).unwrap();
    let err = client
        .submit(&CaptchaTask::image(b"png", None), "k")
        .await
        .unwrap_err();

    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_two_captcha_poll_states() {
    let server = MockServer::start().await;
    let polls = Arc::new(AtomicUsize::new(0));
    let polls_for_mock = Arc::clone(&polls);

    Mock::given(method("GET"))
        .and(path("/res.php"))
        .and(query_param("action", "get"))
        .and(query_param("id", "73842712"))
        .and(query_param("json", "1"))
        .respond_with(move |_request: &Request| {
            if polls_for_mock.fetch_add(1, Ordering::SeqCst) == 0 {
                json_response(json!({"status": 0, "request": "CAPCHA_NOT_READY"}))
            } else {
                json_response(json!({"status": 1, "request": "W68HP"}))
            }
        })
        .mount(&server)
        .await;

    let client = TwoCaptchaClient::new(&providers_config(&server.uri())).unwrap();

    assert_eq!(client.poll(&handle("73842712"), "k").await, PollStatus::Pending);
    assert_eq!(
        client.poll(&handle("73842712"), "k").await,
        PollStatus::Ready(Solution {
            answer: "W68HP".to_string()
        })
    );
    assert_eq!(polls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_two_captcha_unsolvable_is_terminal() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/res.php"))
        .respond_with(json_response(json!({"status": 0, "request": "ERROR_CAPTCHA_UNSOLVABLE"})))
        .mount(&server)
        .await;

    let client = TwoCaptchaClient::new(&providers_config(&server.uri())).unwrap();

    assert_eq!(
        client.poll(&handle("1"), "k").await,
        PollStatus::Failed("ERROR_CAPTCHA_UNSOLVABLE".to_string())
    );
}

#[tokio::test]
async fn test_two_captcha_recaptcha_fields() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/in.php"))
        .and(body_string_contains("method=userrecaptcha"))
        .and(body_string_contains("googlekey=6LfD3PIb"))
        .and(body_string_contains("version=v3"))
        .and(body_string_contains("action=booking"))
        .and(body_string_contains("min_score=0.3"))
        .respond_with(json_response(json!({"status": 1, "request": "99"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = TwoCaptchaClient::new(&providers_config(&server.uri())).unwrap();
    let task = CaptchaTask::RecaptchaV3 {
        site_key: "6LfD3PIb".to_string(),
        page_url: "https://n1.yclients.com/company/1".to_string(),
        action: Some("booking".to_string()),
        min_score: 0.3,
    };

    assert_eq!(client.submit(&task, "k").await.unwrap(), Submission::Queued(handle("99")));
}

// createTask / getTaskResult

#[tokio::test]
async fn test_task_api_submit_and_poll() {
    let server = MockServer::start().await;
    let polls = Arc::new(AtomicUsize::new(0));
    let polls_for_mock = Arc::clone(&polls);

    Mock::given(method("POST"))
        .and(path("/createTask"))
        .and(body_partial_json(json!({
            "clientKey": "anti-key",
            "task": {"type": "ImageToTextTask", "minLength": 4, "maxLength": 4}
        })))
        .respond_with(json_response(json!({"errorId": 0, "taskId": 7654321})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/getTaskResult"))
        .and(body_partial_json(json!({"clientKey": "anti-key", "taskId": 7654321})))
        .respond_with(move |_request: &Request| {
            if polls_for_mock.fetch_add(1, Ordering::SeqCst) == 0 {
                json_response(json!({"errorId": 0, "status": "processing"}))
            } else {
                json_response(json!({
                    "errorId": 0,
                    "status": "ready",
                    "solution": {"text": "k7qx"}
                }))
            }
        })
        .mount(&server)
        .await;

    let client = task_client(TaskApiFlavor::AntiCaptcha, &server);
    let task = CaptchaTask::image(b"png", Some(4));

    let submission = client.submit(&task, "anti-key").await.unwrap();
    assert_eq!(submission, Submission::Queued(handle("7654321")));

    assert_eq!(client.poll(&handle("7654321"), "anti-key").await, PollStatus::Pending);
    assert_eq!(
        client.poll(&handle("7654321"), "anti-key").await,
        PollStatus::Ready(Solution {
            answer: "k7qx".to_string()
        })
    );
}

#[tokio::test]
async fn test_task_api_solved_on_create() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/createTask"))
        .respond_with(json_response(json!({
            "errorId": 0,
            "status": "ready",
            "taskId": "b8a8d1c0-4c8a",
            "solution": {"text": "44795sds"}
        })))
        .mount(&server)
        .await;

    let client = task_client(TaskApiFlavor::CapSolver, &server);
    let submission = client
        .submit(&CaptchaTask::image(b"png", None), "cap-key")
        .await
        .unwrap();

    assert_eq!(
        submission,
        Submission::Solved(Solution {
            answer: "44795sds".to_string()
        })
    );
}

#[tokio::test]
async fn test_task_api_string_task_id_is_sent_back_as_string() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/getTaskResult"))
        .and(body_partial_json(json!({"taskId": "b8a8d1c0-4c8a"})))
        .respond_with(json_response(json!({
            "errorId": 0,
            "status": "ready",
            "solution": {"gRecaptchaResponse": "03AGdBq25SxXT"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = task_client(TaskApiFlavor::CapSolver, &server);

    assert_eq!(
        client.poll(&handle("b8a8d1c0-4c8a"), "k").await,
        PollStatus::Ready(Solution {
            answer: "03AGdBq25SxXT".to_string()
        })
    );
}

#[tokio::test]
async fn test_task_api_error_codes() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/createTask"))
        .and(body_partial_json(json!({"clientKey": "broke"})))
        .respond_with(json_response(json!({
            "errorId": 1,
            "errorCode": "ERROR_ZERO_BALANCE",
            "errorDescription": "Account has zero or negative balance"
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/createTask"))
        .and(body_partial_json(json!({"clientKey": "busy"})))
        .respond_with(json_response(json!({
            "errorId": 1,
            "errorCode": "ERROR_NO_SLOT_AVAILABLE"
        })))
        .mount(&server)
        .await;

    let client = task_client(TaskApiFlavor::CapMonster, &server);
    let task = CaptchaTask::image(b"png", None);

    let broke = client.submit(&task, "broke").await.unwrap_err();
    assert!(!broke.is_retryable());
    assert!(broke.to_string().contains("ERROR_ZERO_BALANCE"));

    let busy = client.submit(&task, "busy").await.unwrap_err();
    assert!(busy.is_retryable());
}

#[tokio::test]
async fn test_task_api_server_error_is_transient() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/createTask"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let client = task_client(TaskApiFlavor::AntiCaptcha, &server);
    let err = client
        .submit(&CaptchaTask::image(b"png", None), "k")
        .await
        .unwrap_err();

    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_task_api_unsupported_category_never_hits_the_network() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = task_client(TaskApiFlavor::CapSolver, &server);
    let task = CaptchaTask::HCaptcha {
        site_key: "site".to_string(),
        page_url: "https://example.com".to_string(),
    };

    assert_eq!(
        client.submit(&task, "k").await.unwrap_err(),
        ProviderError::Unsupported(TaskCategory::HCaptcha)
    );
}

#[tokio::test]
async fn test_task_api_unsolvable_poll_is_failed() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/getTaskResult"))
        .respond_with(json_response(json!({
            "errorId": 12,
            "errorCode": "ERROR_CAPTCHA_UNSOLVABLE"
        })))
        .mount(&server)
        .await;

    let client = task_client(TaskApiFlavor::CapMonster, &server);

    assert_eq!(
        client.poll(&handle("5"), "k").await,
        PollStatus::Failed("ERROR_CAPTCHA_UNSOLVABLE".to_string())
    );
}

// End to end over HTTP

#[tokio::test]
async fn test_pipeline_against_mock_services() {
    let server = MockServer::start().await;

    // CapSolver is first in priority but its key is rejected.
    Mock::given(method("POST"))
        .and(path("/createTask"))
        .and(body_partial_json(json!({"clientKey": "capsolver-key"})))
        .respond_with(json_response(json!({
            "errorId": 1,
            "errorCode": "ERROR_KEY_DOES_NOT_EXIST"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/in.php"))
        .respond_with(json_response(json!({"status": 1, "request": "555"})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/res.php"))
        .and(query_param("id", "555"))
        .respond_with(json_response(json!({"status": 1, "request": "W68HP"})))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = fast_config();
    config.providers = providers_config(&server.uri());
    let recognizer = ScriptedRecognizer::always("W6BHP", 41.0);
    let pipeline = Pipeline::from_config(config, recognizer).unwrap();

    let credentials = ProviderCredentials::new()
        .with("capsolver", "capsolver-key")
        .with("2captcha", "two-key");
    let result = pipeline
        .resolve(ResolveRequest::new(captcha_png()).with_credentials(credentials))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.method, Method::External("2captcha".to_string()));
    assert_eq!(result.text, "W68HP");
    let providers: Vec<&str> = result
        .diagnostics
        .cascade
        .iter()
        .map(|a| a.provider.as_str())
        .collect();
    assert_eq!(providers, vec!["capsolver", "2captcha"]);
}

#[test]
fn test_build_and_order_providers() {
    let providers = build_providers(&ProvidersConfig::default()).unwrap();
    let ids: Vec<&str> = providers.iter().map(|p| p.id()).collect();
    assert_eq!(ids, vec!["2captcha", "anticaptcha", "capsolver", "capmonster"]);

    let ordered = order_providers(providers, &["capsolver".to_string(), "2captcha".to_string()]);
    let ids: Vec<&str> = ordered.iter().map(|p| p.id()).collect();
    assert_eq!(ids, vec!["capsolver", "2captcha"]);
}

#[test]
fn test_invalid_base_url_is_a_config_error() {
    let config = ProvidersConfig {
        capsolver_base_url: Some("::not a url::".to_string()),
        ..ProvidersConfig::default()
    };
    assert!(TaskApiClient::new(TaskApiFlavor::CapSolver, &config).is_err());
}

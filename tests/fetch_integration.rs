//! Integration tests for the page fetcher against a mock server.

use std::time::Duration;

use gamegrab_core::{FetchError, Fetcher};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;

fn fast_fetcher() -> Fetcher {
    Fetcher::with_settings(Duration::from_secs(5), Duration::from_millis(10))
        .expect("fetcher should build")
}

#[tokio::test]
async fn test_fetch_returns_body_on_success() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let body = fast_fetcher()
        .fetch(&format!("{}/page", server.uri()), 2)
        .await
        .unwrap();
    assert_eq!(body, "<html>ok</html>");
}

#[tokio::test]
async fn test_fetch_sends_browser_headers() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/page"))
        .and(wiremock::matchers::header_exists("user-agent"))
        .and(wiremock::matchers::header_exists("accept-language"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    fast_fetcher()
        .fetch(&format!("{}/page", server.uri()), 0)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_fetch_persistent_500_exhausts_retries() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    // retries = 2 means exactly three requests.
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let err = fast_fetcher()
        .fetch(&format!("{}/broken", server.uri()), 2)
        .await
        .unwrap_err();
    assert!(
        matches!(err, FetchError::Status { status: 500, .. }),
        "unexpected error: {err:?}"
    );
    assert_eq!(err.status_code(), Some(500));
}

#[tokio::test]
async fn test_fetch_recovers_after_transient_failure() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
        .expect(1)
        .mount(&server)
        .await;

    let body = fast_fetcher()
        .fetch(&format!("{}/flaky", server.uri()), 1)
        .await
        .unwrap();
    assert_eq!(body, "recovered");
}

#[tokio::test]
async fn test_fetch_zero_retries_makes_one_attempt() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let err = fast_fetcher()
        .fetch(&format!("{}/missing", server.uri()), 0)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some(404));
}

#[tokio::test]
async fn test_fetch_follows_redirect_chain_without_spending_retries() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    for hop in 1..=5 {
        let next = if hop == 5 {
            "/final".to_string()
        } else {
            format!("/hop{}", hop + 1)
        };
        Mock::given(method("GET"))
            .and(path(format!("/hop{hop}")))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", next.as_str()))
            .expect(1)
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/final"))
        .respond_with(ResponseTemplate::new(200).set_body_string("landed"))
        .expect(1)
        .mount(&server)
        .await;

    let body = fast_fetcher()
        .fetch(&format!("{}/hop1", server.uri()), 1)
        .await
        .unwrap();
    assert_eq!(body, "landed");
}

#[tokio::test]
async fn test_fetch_redirect_loop_fails_without_retrying() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/loop"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/loop"))
        .mount(&server)
        .await;

    let err = fast_fetcher()
        .fetch(&format!("{}/loop", server.uri()), 3)
        .await
        .unwrap_err();
    assert!(
        matches!(err, FetchError::TooManyRedirects { count, .. } if count > 10),
        "unexpected error: {err:?}"
    );
}

#[tokio::test]
async fn test_fetch_rejects_invalid_url() {
    let err = fast_fetcher().fetch("not a url", 2).await.unwrap_err();
    assert!(matches!(err, FetchError::InvalidUrl { .. }));
}

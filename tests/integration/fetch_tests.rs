//! Fetcher behavior against real sockets and mock servers

use harvest_ripple::config::FetchConfig;
use harvest_ripple::{FetchStatus, Fetcher};
use std::net::TcpListener;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_config(max_retries: u32) -> FetchConfig {
    FetchConfig {
        max_retries,
        retry_backoff_ms: 5,
        timeout_ms: 2_000,
        ..FetchConfig::default()
    }
}

/// A local address nothing listens on
fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}/", port)
}

#[tokio::test]
async fn test_connection_refused_exhausts_retries() {
    let fetcher = Fetcher::new(&fast_config(2)).unwrap();

    let result = fetcher.fetch(&closed_port_url()).await;

    assert_eq!(result.status, FetchStatus::NetworkError);
    assert_eq!(result.attempt_count, 3);
    assert!(result.content.is_none());
    assert!(result.error.is_some());
}

#[tokio::test]
async fn test_http_error_retried_when_enabled() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
        .mount(&server)
        .await;

    let config = FetchConfig {
        retry_http_errors: true,
        ..fast_config(2)
    };
    let fetcher = Fetcher::new(&config).unwrap();

    let result = fetcher.fetch(&format!("{}/flaky", server.uri())).await;

    assert_eq!(result.status, FetchStatus::Ok);
    assert_eq!(result.attempt_count, 2);
    assert_eq!(result.content.as_deref(), Some(b"recovered".as_slice()));
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("late")
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let config = FetchConfig {
        timeout_ms: 50,
        ..fast_config(0)
    };
    let fetcher = Fetcher::new(&config).unwrap();

    let result = fetcher.fetch(&format!("{}/slow", server.uri())).await;

    assert_eq!(result.status, FetchStatus::Timeout);
    assert_eq!(result.attempt_count, 1);
}

#[tokio::test]
async fn test_configured_headers_sent() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .and(wiremock::matchers::header("x-harvest-token", "abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = fast_config(0);
    config
        .headers
        .insert("X-Harvest-Token".to_string(), "abc123".to_string());
    let fetcher = Fetcher::new(&config).unwrap();

    let result = fetcher.fetch(&format!("{}/", server.uri())).await;

    assert!(result.is_ok());
    assert_eq!(result.http_status, Some(200));
}

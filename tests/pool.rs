//! Pool integration tests using wiremock
//!
//! These tests drive the library surface (pool lifecycle, request pump,
//! rate limiting, statistics aggregation) against a mock HTTP server.

use h2surge::config::TestConfig;
use h2surge::engine::{Pool, RequestFactory, RequestTemplate, compact_line, file_writer};
use h2surge::types::{Protocol, RpsMode};
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::tempdir;
use wiremock::matchers::{body_string, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn setup_mock_server() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":"ok"}"#))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"status":"ok"}"#)
                .set_delay(Duration::from_millis(100)),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/error"))
        .respond_with(ResponseTemplate::new(500).set_body_string(r#"{"error":"internal"}"#))
        .mount(&server)
        .await;

    server
}

fn config(url: String) -> TestConfig {
    TestConfig {
        url,
        // wiremock speaks HTTP/1.1
        protocol: Protocol::Http1,
        ..TestConfig::default()
    }
}

#[tokio::test]
async fn fixed_count_run_completes_every_request() {
    let server = setup_mock_server().await;

    let pool = Pool::new(TestConfig {
        requests: 20,
        clients: 10,
        streams: 1,
        ..config(format!("{}/health", server.uri()))
    })
    .unwrap();

    pool.connect().await.unwrap();
    pool.run().await.unwrap();
    pool.wait().await;

    let total = pool.total_stats();
    assert_eq!(total.total, 200);
    assert_eq!(total.successful, 200);
    assert_eq!(total.failed, 0);
    assert_eq!(pool.sent_requests(), 200);
    assert!(total.duration > Duration::ZERO);
    assert!(total.requests_per_sec() > 0.0);
    assert!(total.min_latency > Duration::ZERO);
    assert!(total.max_latency >= total.min_latency);

    pool.close().await;
}

#[tokio::test]
async fn per_connection_stats_and_averages() {
    let server = setup_mock_server().await;

    let pool = Pool::new(TestConfig {
        requests: 10,
        clients: 3,
        streams: 2,
        ..config(format!("{}/health", server.uri()))
    })
    .unwrap();

    pool.start().await.unwrap();
    pool.wait().await;

    for index in 0..3 {
        let stats = pool.client_stats(index).unwrap();
        assert_eq!(stats.total, 10);
        assert_eq!(stats.successful + stats.failed, stats.total);
    }
    assert!(pool.client_stats(3).is_none());

    assert_eq!(pool.total_stats().total, 30);
    assert_eq!(pool.avg_client_stats().total, 10);

    let summary = pool.stats_summary();
    assert!(summary.contains("Total Requests: 30"));
    assert!(summary.contains("Total Requests: 10"));

    pool.close().await;
}

#[tokio::test]
async fn mixed_statuses_keep_the_count_invariant() {
    let server = setup_mock_server().await;

    let pool = Pool::new(TestConfig {
        requests: 30,
        clients: 2,
        streams: 4,
        ..config(server.uri())
    })
    .unwrap();
    pool.connect().await.unwrap();

    // Alternate between a succeeding and a failing endpoint.
    let healthy = format!("{}/health", server.uri());
    let failing = format!("{}/error", server.uri());
    let counter = Arc::new(std::sync::atomic::AtomicU64::new(0));
    let factory: Arc<dyn RequestFactory> = Arc::new(move |client: &Client| {
        let n = counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if n % 2 == 0 {
            client.get(healthy.clone())
        } else {
            client.get(failing.clone())
        }
    });

    // A 500 is a failed outcome, not a transport error: the run is Ok.
    pool.run_with_factory(factory).await.unwrap();
    pool.wait().await;

    let total = pool.total_stats();
    assert_eq!(total.total, 60);
    assert_eq!(total.successful + total.failed, total.total);
    assert_eq!(total.successful, 30);
    assert_eq!(total.failed, 30);

    pool.close().await;
}

#[tokio::test]
async fn duration_bounded_run_stops_dispatching() {
    let server = setup_mock_server().await;

    let pool = Pool::new(TestConfig {
        requests: 0, // unbounded; the duration is the only stop signal
        clients: 5,
        streams: 2,
        ..config(format!("{}/health", server.uri()))
    })
    .unwrap();

    pool.connect().await.unwrap();
    pool.run_for(Duration::from_millis(500)).await.unwrap();

    let sent_after_stop = pool.sent_requests();
    assert!(sent_after_stop > 0);

    // Everything dispatched has drained into the statistics, and nothing
    // new is dispatched after stop.
    let total = pool.total_stats();
    assert_eq!(total.total, sent_after_stop);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(pool.sent_requests(), sent_after_stop);

    pool.close().await;
}

#[tokio::test]
async fn duration_bounded_run_ignores_the_count_ceiling() {
    let server = setup_mock_server().await;

    // A configured per-connection ceiling must not truncate a
    // duration-bounded window.
    let pool = Pool::new(TestConfig {
        requests: 1,
        clients: 1,
        streams: 2,
        ..config(format!("{}/health", server.uri()))
    })
    .unwrap();

    pool.connect().await.unwrap();
    pool.run_for(Duration::from_millis(400)).await.unwrap();

    let total = pool.total_stats();
    assert!(total.total > 1, "window truncated after {} requests", total.total);

    pool.close().await;
}

#[tokio::test]
async fn stop_lets_in_flight_requests_finish() {
    let server = setup_mock_server().await;

    let pool = Pool::new(TestConfig {
        requests: 0,
        clients: 2,
        streams: 3,
        ..config(format!("{}/slow", server.uri()))
    })
    .unwrap();
    pool.connect().await.unwrap();

    let runner = pool.clone();
    let run_task = tokio::spawn(async move { runner.run().await });

    tokio::time::sleep(Duration::from_millis(150)).await;
    pool.stop();
    pool.wait().await;
    run_task.await.unwrap().unwrap();

    // Every dispatched request completed and was recorded; none were
    // abandoned mid-flight.
    let total = pool.total_stats();
    assert_eq!(total.total, pool.sent_requests());
    assert_eq!(total.failed, 0);

    pool.close().await;
}

#[tokio::test]
async fn concurrency_cap_bounds_in_flight_requests() {
    let server = setup_mock_server().await;

    // Serial: 4 requests through 1 slot against a 100ms endpoint.
    let pool = Pool::new(TestConfig {
        requests: 4,
        clients: 1,
        streams: 1,
        ..config(format!("{}/slow", server.uri()))
    })
    .unwrap();
    let start = Instant::now();
    pool.start().await.unwrap();
    pool.wait().await;
    assert!(start.elapsed() >= Duration::from_millis(350));
    pool.close().await;

    // Parallel: the same 4 requests through 4 slots overlap.
    let pool = Pool::new(TestConfig {
        requests: 4,
        clients: 1,
        streams: 4,
        ..config(format!("{}/slow", server.uri()))
    })
    .unwrap();
    let start = Instant::now();
    pool.start().await.unwrap();
    pool.wait().await;
    assert!(start.elapsed() < Duration::from_millis(350));
    pool.close().await;
}

#[tokio::test]
async fn burst_rate_limit_caps_throughput() {
    let server = setup_mock_server().await;

    let pool = Pool::new(TestConfig {
        requests: 0,
        clients: 1,
        streams: 10,
        rps: 5,
        rps_mode: RpsMode::Burst,
        ..config(format!("{}/health", server.uri()))
    })
    .unwrap();

    pool.connect().await.unwrap();
    // The reservoir refills at second boundaries: at most two bursts of
    // five tokens fit in 2.5 seconds.
    pool.run_for(Duration::from_millis(2500)).await.unwrap();

    let total = pool.total_stats();
    assert!(total.total <= 10, "expected <= 10 requests, got {}", total.total);
    assert!(total.total >= 1, "rate limiter never released a token");
    assert_eq!(total.successful + total.failed, total.total);

    pool.close().await;
}

#[tokio::test]
async fn transport_failures_surface_only_the_first_error() {
    // Nothing listens on this port; every attempt fails at the transport
    // level.
    let pool = Pool::new(TestConfig {
        requests: 5,
        clients: 1,
        streams: 1,
        ..config("http://127.0.0.1:1/".to_string())
    })
    .unwrap();

    pool.connect().await.unwrap();
    let err = pool.run().await.unwrap_err();
    assert_eq!(err.errors.len(), 1);
    assert_eq!(err.errors[0].0, 0);
    assert!(err.to_string().starts_with("connection 0: request failed"));

    pool.wait().await;
    let total = pool.total_stats();
    assert_eq!(total.total, 5);
    assert_eq!(total.failed, 5);
    assert_eq!(total.successful, 0);

    pool.close().await;
}

#[tokio::test]
async fn request_template_reissues_the_same_post() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users"))
        .and(body_string(r#"{"name":"test"}"#))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    let pool = Pool::new(TestConfig {
        requests: 8,
        clients: 2,
        streams: 2,
        ..config(format!("{}/users", server.uri()))
    })
    .unwrap();
    pool.connect().await.unwrap();

    let request = Client::new()
        .post(format!("{}/users", server.uri()))
        .header("Content-Type", "application/json")
        .body(r#"{"name":"test"}"#)
        .build()
        .unwrap();
    let template = RequestTemplate::new(request).unwrap();

    pool.run_template(template).await.unwrap();
    pool.wait().await;

    let total = pool.total_stats();
    assert_eq!(total.total, 16);
    assert_eq!(total.successful, 16);

    pool.close().await;
}

#[tokio::test]
async fn log_sink_writes_one_line_per_outcome() {
    let server = setup_mock_server().await;
    let dir = tempdir().unwrap();
    let log_path = dir.path().join("requests.log");

    let pool = Pool::new(TestConfig {
        requests: 3,
        clients: 1,
        streams: 1,
        ..config(format!("{}/health", server.uri()))
    })
    .unwrap();

    pool.set_log_writer(file_writer(&log_path).await.unwrap());
    pool.set_line_formatter(Arc::new(compact_line));

    pool.start().await.unwrap();
    pool.wait().await;
    pool.close().await;

    let content = std::fs::read_to_string(&log_path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 3);
    for line in lines {
        let fields: Vec<u64> = line
            .split_whitespace()
            .map(|f| f.parse().unwrap())
            .collect();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[1], 200);
    }
}

#[tokio::test]
async fn structured_log_lines_are_json_objects() {
    let server = setup_mock_server().await;
    let dir = tempdir().unwrap();
    let log_path = dir.path().join("requests.json");

    let pool = Pool::new(TestConfig {
        requests: 2,
        clients: 1,
        streams: 1,
        ..config(format!("{}/error", server.uri()))
    })
    .unwrap();

    // The default formatter is the structured one.
    pool.set_log_writer(file_writer(&log_path).await.unwrap());

    pool.start().await.unwrap();
    pool.wait().await;
    pool.close().await;

    let content = std::fs::read_to_string(&log_path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 2);
    for line in lines {
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["status"], 500);
        assert!(value["timestamp"].as_str().is_some());
        assert!(value["latency"].as_str().unwrap().ends_with("ms"));
    }
}

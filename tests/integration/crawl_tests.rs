//! Integration tests for the crawler
//!
//! These tests use wiremock to stand in for the search backend and run the
//! paged fetch, the controller and the full task cycle end to end.

use fare_sweep::config::Config;
use fare_sweep::crawler::{
    output_name, ApiClient, FlightCrawler, HtmlFlightParser, PageFetcher, StopReason, SEARCH_KEY,
};
use fare_sweep::storage::SqliteSink;
use fare_sweep::{ErrorKind, FlightQuery, TaskManager, TaskState};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const OUTBOUND_PATH: &str = "/flight/ajax/search/flights/";
const INBOUND_PATH: &str = "/flight/ajax/search/flights/return/";
const FILTERED_PATH: &str = "/flight/ajax/search/flights/return/filtered";

/// Creates a configuration pointing at the mock server with no delays
fn create_test_config(base_url: &str) -> Config {
    let mut config = Config::default();
    config.api.base_url = base_url.to_string();
    config.api.request_attempts = 1;
    config.api.request_timeout_seconds = 5;
    config.retry.interval_seconds = 0.0;
    config.crawler.crawl_delay_seconds = 0.0;
    config.crawler.cabin_classes = vec!["2".to_string()];
    config.scheduler.max_concurrent_tasks = 2;
    config.scheduler.task_timeout_minutes = 1;
    config.scheduler.permit_poll_millis = 10;
    config
}

fn create_test_query() -> FlightQuery {
    FlightQuery::new("TPE", "SIN", "2025-07-21", "2025-07-27")
}

/// One outbound result container
fn outbound_card(selection_id: &str, flight: &str) -> String {
    format!(
        r#"<div class="card shadow-sm">
             <div class="neutral-color">2025-07-21 出發</div>
             <a onclick="searchReturnFlights('{}')">選擇</a>
             <div class="flight-detail-info"><div class="w-100">{} / 經濟艙(Y)</div></div>
           </div>"#,
        selection_id, flight
    )
}

/// The chosen outbound flight echoed back, followed by one inbound flight
fn inbound_fragment(flight: &str, price: &str, tax: &str) -> String {
    format!(
        r#"<div class="card shadow-sm">
             <div class="flight-detail-info"><div class="w-100">BR225 / 經濟艙(Y)</div></div>
           </div>
           <div class="card shadow-sm">
             <div class="neutral-color">2025-07-27 出發</div>
             <div class="flight-detail-info"><div class="w-100">{} / 經濟艙(Y)</div></div>
             <table class="tkt-price-table">
               <tr><th>票種</th><th>票價</th><th>稅金</th></tr>
               <tr><td>成人</td><td>{}</td><td>{}</td></tr>
               <tr><td>合計</td><td></td><td></td></tr>
             </table>
           </div>"#,
        flight, price, tax
    )
}

fn envelope(html: &str, page_count: u32) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "flights_html": html,
        "page_count": page_count,
        "searchkey": "KEY123",
    }))
}

#[tokio::test]
async fn test_full_task_cycle_persists_offer() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(OUTBOUND_PATH))
        .and(query_param("cabin_class", "2"))
        .respond_with(envelope(&outbound_card("42", "BR225"), 1))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(INBOUND_PATH))
        .and(query_param("session_id", "42"))
        .and(query_param("search_key", "KEY123"))
        .respond_with(envelope(&inbound_fragment("BR226", "10,000", "500"), 1))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri());
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let sink = Arc::new(Mutex::new(
        SqliteSink::new(&temp_dir.path().join("fares.db")).expect("Failed to open database"),
    ));

    let crawler = FlightCrawler::new(&config).with_sink(sink.clone());
    let manager = TaskManager::new(&config.scheduler, &config.retry, Arc::new(crawler));

    let query = create_test_query();
    let report = manager
        .submit_batch(vec![query.clone()])
        .await
        .expect("Batch failed");

    assert!(!report.timed_out);
    assert_eq!(report.succeeded_tasks, 1);
    let task = &report.tasks[0];
    assert_eq!(task.state, TaskState::Completed);
    assert_eq!(task.offer_count, 1);
    assert_eq!(task.retry_count, 0);

    let output = manager.output(&task.task_id).expect("Completed task has output");
    assert_eq!(output.enrichment.get(SEARCH_KEY).map(String::as_str), Some("KEY123"));
    assert_eq!(output.rows.len(), 1);
    assert_eq!(output.rows[0].price, 10000);
    assert_eq!(output.rows[0].tax, 500);
    assert_eq!(output.rows[0].return_date.as_deref(), Some("2025-07-27"));
    assert_eq!(output.rows[0].outbound[0].flight_number.as_deref(), Some("BR225"));
    assert_eq!(output.rows[0].inbound[0].flight_number.as_deref(), Some("BR226"));
    assert!(output.rows[0].outbound[1].flight_number.is_none());
    assert!(output.json.contains("KEY123"));

    let stored = sink
        .lock()
        .unwrap()
        .load_offers(&output_name(&query, &task.task_id))
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].price, 10000.0);
    assert_eq!(stored[0].selection_id.as_deref(), Some("42"));
    assert_eq!(stored[0].cabin_class, "2");
}

#[tokio::test]
async fn test_outbound_pagination_reads_every_page() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(OUTBOUND_PATH))
        .and(query_param("target_page", "1"))
        .respond_with(envelope(&outbound_card("1", "BR225"), 3))
        .expect(1)
        .mount(&mock_server)
        .await;

    for (page, flight) in [("2", "CI101"), ("3", "SQ879")] {
        Mock::given(method("GET"))
            .and(path(OUTBOUND_PATH))
            .and(query_param("target_page", page))
            .and(query_param("search_key", "KEY123"))
            .respond_with(envelope(&outbound_card(page, flight), 3))
            .expect(1)
            .mount(&mock_server)
            .await;
    }

    let config = create_test_config(&mock_server.uri());
    let client = ApiClient::new(&config.api, &config.retry).unwrap();
    let fetcher = PageFetcher::new(&client, Duration::ZERO);
    let mut parser = HtmlFlightParser::new().unwrap();

    let run = fetcher
        .fetch_outbound(&mut parser, &create_test_query(), "2")
        .await;

    assert_eq!(run.stop, StopReason::Exhausted);
    assert_eq!(run.pages_fetched, 3);
    assert_eq!(run.session_key.as_deref(), Some("KEY123"));
    let flights: Vec<&str> = run
        .records
        .iter()
        .map(|r| r.segments[0].flight_number.as_str())
        .collect();
    assert_eq!(flights, vec!["BR225", "CI101", "SQ879"]);
}

#[tokio::test]
async fn test_empty_fragment_ends_pagination() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(OUTBOUND_PATH))
        .respond_with(envelope("", 3))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri());
    let client = ApiClient::new(&config.api, &config.retry).unwrap();
    let fetcher = PageFetcher::new(&client, Duration::ZERO);
    let mut parser = HtmlFlightParser::new().unwrap();

    let run = fetcher
        .fetch_outbound(&mut parser, &create_test_query(), "2")
        .await;

    assert_eq!(run.stop, StopReason::EmptyFragment);
    assert_eq!(run.pages_fetched, 1);
    assert!(run.records.is_empty());
}

#[tokio::test]
async fn test_inbound_later_pages_use_filtered_endpoint() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(INBOUND_PATH))
        .and(query_param("session_id", "42"))
        .and(query_param("target_page", "1"))
        .respond_with(envelope(&inbound_fragment("BR226", "10,000", "500"), 2))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(FILTERED_PATH))
        .and(query_param("session_id", "42"))
        .and(query_param("target_page", "2"))
        .and(query_param(
            "ret_dep_time_range",
            "2025-07-27T00:55:00.000Z,2025-07-27T21:40:00.000Z",
        ))
        .respond_with(envelope(&inbound_fragment("CI754", "9,800", "450"), 2))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri());
    let client = ApiClient::new(&config.api, &config.retry).unwrap();
    let fetcher = PageFetcher::new(&client, Duration::ZERO);
    let mut parser = HtmlFlightParser::new().unwrap();

    let run = fetcher
        .fetch_inbound(&mut parser, &create_test_query(), "KEY123", "42")
        .await;

    assert_eq!(run.stop, StopReason::Exhausted);
    assert_eq!(run.records.len(), 2);
    assert_eq!(run.records[0].price, 10000.0);
    assert_eq!(run.records[1].segments[0].flight_number, "CI754");
    assert_eq!(run.records[1].tax, 450.0);
}

#[tokio::test]
async fn test_server_error_keeps_earlier_pages() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(OUTBOUND_PATH))
        .and(query_param("target_page", "1"))
        .respond_with(envelope(&outbound_card("1", "BR225"), 2))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(OUTBOUND_PATH))
        .and(query_param("target_page", "2"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri());
    let client = ApiClient::new(&config.api, &config.retry).unwrap();
    let fetcher = PageFetcher::new(&client, Duration::ZERO);
    let mut parser = HtmlFlightParser::new().unwrap();

    let run = fetcher
        .fetch_outbound(&mut parser, &create_test_query(), "2")
        .await;

    assert!(matches!(run.stop, StopReason::Protocol(_)));
    assert!(run.transport_error().is_none());
    assert_eq!(run.pages_fetched, 2);
    assert_eq!(run.records.len(), 1);
}

#[tokio::test]
async fn test_failing_cabin_class_does_not_stop_the_next() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(OUTBOUND_PATH))
        .and(query_param("cabin_class", "2"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(OUTBOUND_PATH))
        .and(query_param("cabin_class", "4"))
        .respond_with(envelope(&outbound_card("77", "BR225"), 1))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(INBOUND_PATH))
        .and(query_param("session_id", "77"))
        .respond_with(envelope(&inbound_fragment("BR226", "32,000", "1,200"), 1))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut config = create_test_config(&mock_server.uri());
    config.crawler.cabin_classes = vec!["2".to_string(), "4".to_string()];
    let crawler = FlightCrawler::new(&config);

    let outcome = crawler.crawl(&create_test_query()).await.unwrap();

    assert_eq!(outcome.offers.len(), 1);
    assert_eq!(outcome.offers[0].cabin_class, "4");
    assert_eq!(outcome.offers[0].price, 32000.0);
    assert_eq!(outcome.offers[0].tax, 1200.0);
}

#[tokio::test]
async fn test_outbound_without_selection_id_is_skipped() {
    let mock_server = MockServer::start().await;

    let uncorrelated = r#"<div class="card shadow-sm">
             <div class="neutral-color">2025-07-21 出發</div>
             <div class="flight-detail-info"><div class="w-100">CI101 / 經濟艙(Y)</div></div>
           </div>"#;
    let page = format!("{}{}", uncorrelated, outbound_card("42", "BR225"));

    Mock::given(method("GET"))
        .and(path(OUTBOUND_PATH))
        .respond_with(envelope(&page, 1))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(INBOUND_PATH))
        .and(query_param("session_id", "42"))
        .respond_with(envelope(&inbound_fragment("BR226", "10,000", "500"), 1))
        .expect(1)
        .mount(&mock_server)
        .await;

    // Any other inbound request would be for the uncorrelated flight
    Mock::given(method("GET"))
        .and(path(INBOUND_PATH))
        .respond_with(envelope("", 1))
        .expect(0)
        .mount(&mock_server)
        .await;

    let crawler = FlightCrawler::new(&create_test_config(&mock_server.uri()));
    let outcome = crawler.crawl(&create_test_query()).await.unwrap();

    assert_eq!(outcome.offers.len(), 1);
    assert_eq!(outcome.offers[0].selection_id.as_deref(), Some("42"));
    assert_eq!(outcome.offers[0].outbound_segments[0].flight_number, "BR225");
}

#[tokio::test]
async fn test_unreachable_backend_exhausts_retries() {
    let config = create_test_config("http://127.0.0.1:9");
    let manager = TaskManager::new(
        &config.scheduler,
        &config.retry,
        Arc::new(FlightCrawler::new(&config)),
    );

    let report = manager
        .submit_batch(vec![create_test_query()])
        .await
        .expect("Batch failed");

    assert!(!report.timed_out);
    assert_eq!(report.failed_tasks, 1);
    let task = &report.tasks[0];
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(task.retry_count, config.retry.max_attempts);
    assert_eq!(task.retry_history.len() as u32, config.retry.max_attempts - 1);
    assert_eq!(task.last_error.as_ref().unwrap().kind, ErrorKind::Connection);
}

//! Paged search against the outbound and inbound endpoints
//!
//! Both phases share one loop: request page `n`, unwrap the JSON envelope,
//! hand the HTML fragment to the markup parser, accumulate records and stop
//! once `page_count` pages were read. Anything unexpected ends the run early
//! and keeps what was collected so far.

use crate::crawler::client::{ApiClient, QueryError};
use crate::crawler::parser::FlightMarkupParser;
use crate::model::{InboundCandidate, OutboundCandidate};
use crate::query::FlightQuery;
use serde::Deserialize;
use std::time::Duration;

const OUTBOUND_PATH: &str = "/flight/ajax/search/flights/";
const INBOUND_SELECT_PATH: &str = "/flight/ajax/search/flights/return/";
const INBOUND_FILTERED_PATH: &str = "/flight/ajax/search/flights/return/filtered";

/// JSON body returned by every search endpoint
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    flights_html: Option<String>,

    #[serde(default = "default_page_count")]
    page_count: u32,

    #[serde(default)]
    searchkey: Option<String>,
}

fn default_page_count() -> u32 {
    1
}

/// Why a paged run ended
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// Every advertised page was read
    Exhausted,

    /// A page carried no markup; treated as the end of the results
    EmptyFragment,

    /// The response could not be understood (bad status, bad JSON, bad markup)
    Protocol(String),

    /// Timeout or connection failure after the client's own retries
    Transport(QueryError),
}

/// Records accumulated by one paged run
#[derive(Debug)]
pub struct PageRun<T> {
    pub records: Vec<T>,
    pub pages_fetched: u32,
    /// Session key issued by the outbound search, if any page carried one
    pub session_key: Option<String>,
    pub stop: StopReason,
}

impl<T> PageRun<T> {
    fn new() -> Self {
        Self {
            records: Vec::new(),
            pages_fetched: 0,
            session_key: None,
            stop: StopReason::Exhausted,
        }
    }

    /// The transport failure that ended this run, if any
    pub fn transport_error(&self) -> Option<&QueryError> {
        match &self.stop {
            StopReason::Transport(e) => Some(e),
            _ => None,
        }
    }
}

/// Which endpoint a run pages through
#[derive(Debug, Clone, Copy)]
pub enum SearchScope<'a> {
    Outbound {
        query: &'a FlightQuery,
        cabin_class: &'a str,
    },
    Inbound {
        query: &'a FlightQuery,
        search_key: &'a str,
        selection_id: &'a str,
    },
}

impl SearchScope<'_> {
    fn label(&self) -> &'static str {
        match self {
            Self::Outbound { .. } => "outbound",
            Self::Inbound { .. } => "inbound",
        }
    }

    /// Endpoint path and query parameters for `page`
    ///
    /// The first inbound page goes to the select endpoint keyed by the
    /// outbound selection id; later pages use the filtered endpoint, which
    /// pages server side.
    fn request(&self, page: u32, session_key: Option<&str>) -> (&'static str, Vec<(&'static str, String)>) {
        match *self {
            Self::Outbound { query, cabin_class } => (
                OUTBOUND_PATH,
                vec![
                    ("origin_location_code", query.dep_city.clone()),
                    ("destination_location_code", query.arr_city.clone()),
                    ("trip", "2".to_string()),
                    ("dep_location_codes", query.dep_city.clone()),
                    ("arr_location_codes", query.arr_city.clone()),
                    ("dep_location_types", "1".to_string()),
                    ("arr_location_types", "1".to_string()),
                    ("dep_dates", query.dep_date.clone()),
                    ("return_date", query.return_date.clone()),
                    ("adult", "1".to_string()),
                    ("child", "0".to_string()),
                    ("cabin_class", cabin_class.to_string()),
                    ("is_direct_flight_only", "False".to_string()),
                    ("exclude_budget_airline", "False".to_string()),
                    (
                        "search_key",
                        if page > 1 {
                            session_key.unwrap_or_default().to_string()
                        } else {
                            String::new()
                        },
                    ),
                    ("target_page", page.to_string()),
                    ("order_by", "0_1".to_string()),
                    ("source", String::new()),
                ],
            ),
            Self::Inbound {
                query,
                search_key,
                selection_id,
            } if page <= 1 => (
                INBOUND_SELECT_PATH,
                vec![
                    ("origin_location_code", query.dep_city.clone()),
                    ("destination_location_code", query.arr_city.clone()),
                    ("search_key", search_key.to_string()),
                    ("session_id", selection_id.to_string()),
                    ("target_page", page.to_string()),
                ],
            ),
            Self::Inbound {
                query,
                search_key,
                selection_id,
            } => (
                INBOUND_FILTERED_PATH,
                vec![
                    ("search_key", search_key.to_string()),
                    ("session_id", selection_id.to_string()),
                    ("target_page", page.to_string()),
                    ("order_by", "0_1".to_string()),
                    (
                        "ret_dep_time_range",
                        format!(
                            "{ret}T00:55:00.000Z,{ret}T21:40:00.000Z",
                            ret = query.return_date
                        ),
                    ),
                ],
            ),
        }
    }
}

/// Drives paged searches with a courtesy delay between pages
pub struct PageFetcher<'a> {
    client: &'a ApiClient,
    delay: Duration,
}

impl<'a> PageFetcher<'a> {
    pub fn new(client: &'a ApiClient, delay: Duration) -> Self {
        Self { client, delay }
    }

    /// Pages through the outbound search for one cabin class
    pub async fn fetch_outbound<P: FlightMarkupParser>(
        &self,
        parser: &mut P,
        query: &FlightQuery,
        cabin_class: &str,
    ) -> PageRun<OutboundCandidate> {
        let scope = SearchScope::Outbound { query, cabin_class };
        self.fetch(scope, parser, P::extract_outbound).await
    }

    /// Pages through the inbound flights matching one outbound selection
    pub async fn fetch_inbound<P: FlightMarkupParser>(
        &self,
        parser: &mut P,
        query: &FlightQuery,
        search_key: &str,
        selection_id: &str,
    ) -> PageRun<InboundCandidate> {
        let scope = SearchScope::Inbound {
            query,
            search_key,
            selection_id,
        };
        self.fetch(scope, parser, P::extract_inbound).await
    }

    async fn fetch<P, T>(
        &self,
        scope: SearchScope<'_>,
        parser: &mut P,
        extract: fn(&P) -> Vec<T>,
    ) -> PageRun<T>
    where
        P: FlightMarkupParser,
    {
        let mut run = PageRun::new();
        let mut page: u32 = 1;

        loop {
            let (path, params) = scope.request(page, run.session_key.as_deref());
            let url = self.client.endpoint(path);
            tracing::debug!(page, "Requesting {} page {}: {:?}", scope.label(), page, params);

            let body = match self.client.get(&url, &params).await {
                Ok(body) => body,
                Err(e) => {
                    run.pages_fetched += 1;
                    if e.is_transport() {
                        tracing::warn!(page, "{} search stopped: {}", scope.label(), e);
                        run.stop = StopReason::Transport(e);
                    } else {
                        tracing::warn!(page, "{} search aborted: {}", scope.label(), e);
                        run.stop = StopReason::Protocol(e.to_string());
                    }
                    break;
                }
            };
            run.pages_fetched += 1;

            let envelope: Envelope = match serde_json::from_str(&body) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::error!(page, "Malformed {} response: {}", scope.label(), e);
                    run.stop = StopReason::Protocol(format!("malformed envelope: {}", e));
                    break;
                }
            };

            if let Some(key) = envelope.searchkey.filter(|k| !k.is_empty()) {
                if run.session_key.as_deref() != Some(key.as_str()) {
                    tracing::debug!("Search session key: {}", key);
                }
                run.session_key = Some(key);
            }

            let fragment = envelope.flights_html.unwrap_or_default();
            if fragment.is_empty() {
                tracing::warn!(page, "{} page {} has no flights_html", scope.label(), page);
                run.stop = StopReason::EmptyFragment;
                break;
            }

            if !parser.parse(&fragment) {
                run.stop = StopReason::Protocol(format!("page {} could not be parsed", page));
                break;
            }
            let records = extract(parser);
            tracing::debug!(
                page,
                "{} page {}/{}: {} flights",
                scope.label(),
                page,
                envelope.page_count,
                records.len()
            );
            run.records.extend(records);

            if page >= envelope.page_count {
                run.stop = StopReason::Exhausted;
                break;
            }
            page += 1;
            tokio::time::sleep(self.delay).await;
        }

        tracing::info!(
            "{} search read {} pages, {} flights",
            scope.label(),
            run.pages_fetched,
            run.records.len()
        );
        run
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_query() -> FlightQuery {
        FlightQuery::new("TPE", "SIN", "2025-07-21", "2025-07-27")
    }

    fn param<'p>(params: &'p [(&str, String)], name: &str) -> Option<&'p str> {
        params
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_envelope_defaults() {
        let envelope: Envelope = serde_json::from_str("{}").unwrap();
        assert_eq!(envelope.page_count, 1);
        assert!(envelope.flights_html.is_none());
        assert!(envelope.searchkey.is_none());
    }

    #[test]
    fn test_outbound_request() {
        let query = create_test_query();
        let scope = SearchScope::Outbound {
            query: &query,
            cabin_class: "4",
        };

        let (path, params) = scope.request(1, Some("KEY"));
        assert_eq!(path, OUTBOUND_PATH);
        assert_eq!(param(&params, "dep_dates"), Some("2025-07-21"));
        assert_eq!(param(&params, "return_date"), Some("2025-07-27"));
        assert_eq!(param(&params, "cabin_class"), Some("4"));
        assert_eq!(param(&params, "trip"), Some("2"));
        assert_eq!(param(&params, "search_key"), Some(""));

        let (_, params) = scope.request(2, Some("KEY"));
        assert_eq!(param(&params, "search_key"), Some("KEY"));
        assert_eq!(param(&params, "target_page"), Some("2"));
    }

    #[test]
    fn test_inbound_request_switches_endpoint() {
        let query = create_test_query();
        let scope = SearchScope::Inbound {
            query: &query,
            search_key: "KEY",
            selection_id: "42",
        };

        let (path, params) = scope.request(1, None);
        assert_eq!(path, INBOUND_SELECT_PATH);
        assert_eq!(param(&params, "session_id"), Some("42"));
        assert_eq!(param(&params, "origin_location_code"), Some("TPE"));

        let (path, params) = scope.request(2, None);
        assert_eq!(path, INBOUND_FILTERED_PATH);
        assert_eq!(param(&params, "search_key"), Some("KEY"));
        assert_eq!(
            param(&params, "ret_dep_time_range"),
            Some("2025-07-27T00:55:00.000Z,2025-07-27T21:40:00.000Z")
        );
        assert_eq!(param(&params, "origin_location_code"), None);
    }

    #[test]
    fn test_transport_error_accessor() {
        let mut run: PageRun<OutboundCandidate> = PageRun::new();
        assert!(run.transport_error().is_none());
        run.stop = StopReason::Transport(QueryError::Timeout("slow".into()));
        assert!(run.transport_error().is_some());
    }
}

//! Crawler module for the two-phase fare search
//!
//! This module contains the search logic, including:
//! - HTTP requests with in-client retries
//! - Paging through the outbound and inbound endpoints
//! - HTML parsing of flight result fragments
//! - Combining outbound and inbound flights into offers
//! - Running one query end to end as a scheduler task

mod client;
mod combine;
mod controller;
mod pagination;
mod parser;

pub use client::{build_http_client, ApiClient, QueryError};
pub use combine::combine_itineraries;
pub use controller::{output_name, CrawlOutcome, FlightCrawler, SEARCH_KEY};
pub use pagination::{PageFetcher, PageRun, SearchScope, StopReason};
pub use parser::{FlightMarkupParser, HtmlFlightParser};

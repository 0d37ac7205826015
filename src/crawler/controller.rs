//! Task controller - runs one flight query end to end
//!
//! For every configured cabin class the controller pages through the
//! outbound search, then for each outbound flight pages through its inbound
//! candidates and merges both phases into complete offers. Offers are
//! validated, projected and handed to the persistence sink.

use crate::config::{ApiConfig, Config, CrawlerConfig, RetryConfig};
use crate::crawler::client::{ApiClient, QueryError};
use crate::crawler::combine::combine_itineraries;
use crate::crawler::pagination::PageFetcher;
use crate::crawler::parser::HtmlFlightParser;
use crate::model::{retain_valid_offers, FlightOffer};
use crate::output::{offers_to_json, offers_to_rows};
use crate::query::{FlightQuery, TaskId};
use crate::scheduler::{ExecutionError, TaskExecutor};
use crate::state::TaskOutput;
use crate::storage::OfferSink;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Enrichment key holding the outbound search session key
pub const SEARCH_KEY: &str = "search_key";

/// Offers gathered for one query, before validation
#[derive(Debug, Default)]
pub struct CrawlOutcome {
    pub offers: Vec<FlightOffer>,
    pub enrichment: BTreeMap<String, String>,
}

/// Executes flight queries against the search backend
pub struct FlightCrawler {
    api: ApiConfig,
    retry: RetryConfig,
    crawler: CrawlerConfig,
    sink: Option<Arc<Mutex<dyn OfferSink>>>,
}

impl FlightCrawler {
    /// Creates a crawler from the loaded configuration
    pub fn new(config: &Config) -> Self {
        Self {
            api: config.api.clone(),
            retry: config.retry.clone(),
            crawler: config.crawler.clone(),
            sink: None,
        }
    }

    /// Sends every task's offers to `sink`
    pub fn with_sink(mut self, sink: Arc<Mutex<dyn OfferSink>>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Collects the offers for one query across all cabin classes
    ///
    /// The HTTP client lives for this call only. A cabin class that fails
    /// is logged and the next class is tried. When every class stopped on a
    /// transport failure and nothing was collected, that failure is returned
    /// so the scheduler can retry the task.
    pub async fn crawl(&self, query: &FlightQuery) -> Result<CrawlOutcome, ExecutionError> {
        let client = ApiClient::new(&self.api, &self.retry)
            .map_err(|e| ExecutionError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        let mut parser = HtmlFlightParser::new()?;
        let delay = self.crawler.crawl_delay();
        let fetcher = PageFetcher::new(&client, delay);

        let mut outcome = CrawlOutcome::default();
        let mut last_transport: Option<QueryError> = None;
        let mut transport_failed_classes = 0usize;

        for (i, cabin_class) in self.crawler.cabin_classes.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(delay).await;
            }
            tracing::info!(cabin_class = %cabin_class, "Searching {} cabin class {}", query, cabin_class);

            let outbound = fetcher.fetch_outbound(&mut parser, query, cabin_class).await;
            let mut class_transport = outbound.transport_error().cloned();

            if outbound.records.is_empty() {
                tracing::info!(cabin_class = %cabin_class, "No outbound flights for cabin class {}", cabin_class);
                if let Some(e) = class_transport {
                    transport_failed_classes += 1;
                    last_transport = Some(e);
                }
                continue;
            }

            let search_key = outbound.session_key.clone().unwrap_or_default();
            if search_key.is_empty() {
                tracing::warn!(cabin_class = %cabin_class, "Outbound search returned no session key");
            } else {
                outcome
                    .enrichment
                    .insert(SEARCH_KEY.to_string(), search_key.clone());
            }

            let mut class_offers = 0usize;
            for (idx, candidate) in outbound.records.iter().enumerate() {
                let Some(selection_id) = candidate.selection_id.as_deref() else {
                    tracing::warn!(
                        cabin_class = %cabin_class,
                        "Outbound flight #{} has no selection id, skipping",
                        idx + 1
                    );
                    continue;
                };

                tokio::time::sleep(delay).await;
                let inbound = fetcher
                    .fetch_inbound(&mut parser, query, &search_key, selection_id)
                    .await;
                if let Some(e) = inbound.transport_error() {
                    class_transport = Some(e.clone());
                }

                let offers =
                    combine_itineraries(candidate, &inbound.records, query, &search_key, cabin_class);
                tracing::debug!(
                    cabin_class = %cabin_class,
                    "Outbound flight #{} ({}) yielded {} offers",
                    idx + 1,
                    selection_id,
                    offers.len()
                );
                class_offers += offers.len();
                outcome.offers.extend(offers);
            }

            if class_offers == 0 {
                if let Some(e) = class_transport {
                    transport_failed_classes += 1;
                    last_transport = Some(e);
                }
            }
            tracing::info!(
                cabin_class = %cabin_class,
                "Cabin class {} produced {} offers",
                cabin_class,
                class_offers
            );
        }

        if outcome.offers.is_empty() && transport_failed_classes == self.crawler.cabin_classes.len() {
            if let Some(e) = last_transport {
                return Err(ExecutionError::Transport(e));
            }
        }

        Ok(outcome)
    }

    fn persist(&self, offers: &[FlightOffer], name: &str) {
        let Some(sink) = &self.sink else {
            return;
        };
        let mut sink = sink.lock().unwrap_or_else(PoisonError::into_inner);
        match sink.save_offers(offers, name) {
            Ok(saved) => tracing::info!("Saved {} offers for {}", saved, name),
            Err(e) => tracing::error!("Failed to save offers for {}: {}", name, e),
        }
    }
}

/// Name the offers of one task are persisted under
///
/// Tasks with the same route and dates still get distinct names.
pub fn output_name(query: &FlightQuery, id: &TaskId) -> String {
    format!("{}_{}", query.label(), id)
}

#[async_trait]
impl TaskExecutor for FlightCrawler {
    async fn execute(&self, id: &TaskId, query: &FlightQuery) -> Result<TaskOutput, ExecutionError> {
        tracing::info!(task_id = %id, "Collecting offers for {}", query);

        let outcome = self.crawl(query).await?;
        let found = outcome.offers.len();
        let offers = retain_valid_offers(outcome.offers);
        if offers.len() < found {
            tracing::warn!(task_id = %id, "Dropped {} invalid offers", found - offers.len());
        }

        let json = offers_to_json(&offers)
            .map_err(|e| ExecutionError::Internal(format!("Failed to render offers: {}", e)))?;
        let rows = offers_to_rows(&offers, Utc::now());

        if offers.is_empty() {
            tracing::warn!(task_id = %id, "No offers found for {}", query);
        } else {
            self.persist(&offers, &output_name(query, id));
        }

        tracing::info!(task_id = %id, "Collected {} offers", offers.len());
        Ok(TaskOutput {
            offers,
            json,
            rows,
            enrichment: outcome.enrichment,
        })
    }
}

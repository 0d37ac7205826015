//! HTML parser for flight result fragments
//!
//! The search backend returns its results as an HTML fragment embedded in a
//! JSON envelope. This module turns such a fragment into typed candidates:
//! - outbound candidates (segments, departure date, selection id)
//! - inbound candidates (segments, return date, price and tax)
//!
//! Problems with a single record are logged and that record or segment is
//! skipped; the rest of the fragment is still extracted.

use crate::model::{FlightSegment, InboundCandidate, OutboundCandidate, ParseError};
use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// Turns result fragments into flight candidates
///
/// `parse` loads a fragment and reports whether it is usable; the extract
/// methods work on the most recently parsed fragment and return nothing
/// before a successful `parse`.
pub trait FlightMarkupParser: Send {
    fn parse(&mut self, fragment: &str) -> bool;
    fn extract_outbound(&self) -> Vec<OutboundCandidate>;
    fn extract_inbound(&self) -> Vec<InboundCandidate>;
}

/// Dates found in one flight container
#[derive(Debug, Default, PartialEq)]
struct ContainerDates {
    departure: Option<NaiveDate>,
    return_: Option<NaiveDate>,
}

/// `scraper`-based parser for the booking site's result markup
pub struct HtmlFlightParser {
    container: Selector,
    select_button: Selector,
    date: Selector,
    detail: Selector,
    segment: Selector,
    price_table: Selector,
    row: Selector,
    cell: Selector,
    selection_id_re: Regex,
    date_re: Regex,
    flight_hint_re: Regex,
    flight_re: Regex,
    flight_format_re: Regex,
    whitespace_re: Regex,
    bracket_re: Regex,
    cabin_re: Regex,
    /// Source of the last parsed fragment; `scraper::Html` itself is not
    /// `Send`, so the document is rebuilt on extraction
    fragment: Option<String>,
}

fn selector(css: &str) -> Result<Selector, ParseError> {
    Selector::parse(css).map_err(|e| ParseError::Markup(format!("bad selector '{}': {:?}", css, e)))
}

fn regex(pattern: &str) -> Result<Regex, ParseError> {
    Regex::new(pattern).map_err(|e| ParseError::Markup(format!("bad pattern '{}': {}", pattern, e)))
}

impl HtmlFlightParser {
    pub fn new() -> Result<Self, ParseError> {
        Ok(Self {
            container: selector(r#"div[class*="shadow"]"#)?,
            select_button: selector("a[onclick]")?,
            date: selector("div.neutral-color")?,
            detail: selector("div.flight-detail-info")?,
            segment: selector(r#"div[class*="w-100"]"#)?,
            price_table: selector("table.tkt-price-table")?,
            row: selector("tr")?,
            cell: selector("td")?,
            selection_id_re: regex(r#"searchReturnFlights\(['"](\d+)['"]\)"#)?,
            date_re: regex(r"(\d{4}-\d{2}-\d{2})")?,
            flight_hint_re: regex(r"[0-9A-Z]{1,3}-?\d{1,4}")?,
            flight_re: regex(r"([0-9A-Z]{1,3}-?\d{1,4})")?,
            flight_format_re: regex(r"^([A-Z0-9]{1,2}?)(\d{1,4})$")?,
            whitespace_re: regex(r"\s+")?,
            bracket_re: regex(r"[()（）]")?,
            cabin_re: regex(r"(.*艙[A-Z0-9]*)")?,
            fragment: None,
        })
    }

    fn document(&self) -> Option<Html> {
        self.fragment.as_deref().map(Html::parse_fragment)
    }

    /// Finds the id passed to `searchReturnFlights(...)`, first in button
    /// `onclick` attributes, then anywhere in the container text
    fn extract_selection_id(&self, item: ElementRef<'_>) -> Option<String> {
        for button in item.select(&self.select_button) {
            let onclick = button.value().attr("onclick").unwrap_or_default();
            if let Some(caps) = self.selection_id_re.captures(onclick) {
                return Some(caps[1].to_string());
            }
        }

        let text: String = item.text().collect();
        self.selection_id_re
            .captures(&text)
            .map(|caps| caps[1].to_string())
    }

    fn extract_dates(&self, item: ElementRef<'_>) -> ContainerDates {
        let mut dates = ContainerDates::default();
        for element in item.select(&self.date) {
            let text = stripped_text(element);
            let Some(caps) = self.date_re.captures(&text) else {
                continue;
            };
            let parsed = match NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d") {
                Ok(date) => date,
                Err(_) => {
                    tracing::warn!("{}", ParseError::Date(caps[1].to_string()));
                    continue;
                }
            };
            if text.contains("出發") {
                dates.departure = Some(parsed);
            } else if text.contains("回程") {
                dates.return_ = Some(parsed);
            }
        }
        dates
    }

    fn extract_segments(&self, item: ElementRef<'_>) -> Vec<FlightSegment> {
        let Some(detail) = item.select(&self.detail).next() else {
            tracing::warn!("Flight container has no flight-detail-info block");
            return Vec::new();
        };

        let mut segments = Vec::new();
        for (idx, element) in detail.select(&self.segment).enumerate() {
            match self.parse_segment(&stripped_text(element)) {
                Ok(Some(segment)) => segments.push(segment),
                Ok(None) => {}
                Err(e) => tracing::warn!("Skipping segment w-100[{}]: {}", idx, e),
            }
        }
        segments
    }

    /// Parses one `FLIGHT / CABIN` line
    ///
    /// Returns `Ok(None)` for text that is not a segment line at all.
    fn parse_segment(&self, text: &str) -> Result<Option<FlightSegment>, ParseError> {
        if !text.contains('/') {
            return Ok(None);
        }
        let normalized = self.whitespace_re.replace_all(text, " ").trim().to_string();
        if !(self.flight_hint_re.is_match(&normalized) && normalized.contains('艙')) {
            return Ok(None);
        }

        let mut parts = normalized.splitn(3, '/');
        let flight_raw = parts.next().unwrap_or_default().trim();
        let cabin_raw = parts
            .next()
            .map(str::trim)
            .ok_or_else(|| ParseError::CabinClass(normalized.clone()))?;

        let flight_number = self
            .flight_re
            .captures(flight_raw)
            .map(|caps| caps[1].to_string())
            .ok_or_else(|| ParseError::FlightNumber(flight_raw.to_string()))?;
        let flight_number = self.format_flight_number(&flight_number)?;

        let cabin = self.bracket_re.replace_all(cabin_raw, "").to_string();
        if !cabin.contains('艙') {
            return Err(ParseError::CabinClass(cabin_raw.to_string()));
        }
        let cabin_class = self
            .cabin_re
            .captures(&cabin)
            .map(|caps| caps[1].trim().to_string())
            .unwrap_or(cabin);

        if flight_number.is_empty() || cabin_class.is_empty() {
            return Err(ParseError::InvalidOffer(format!(
                "empty segment field in '{}'",
                normalized
            )));
        }

        Ok(Some(FlightSegment::new(flight_number, cabin_class)))
    }

    /// Removes hyphens and left-pads the numeric part to three digits
    fn format_flight_number(&self, raw: &str) -> Result<String, ParseError> {
        let compact = raw.replace('-', "").to_uppercase();
        let caps = self
            .flight_format_re
            .captures(&compact)
            .ok_or_else(|| ParseError::FlightNumber(compact.clone()))?;
        Ok(format!("{}{:0>3}", &caps[1], &caps[2]))
    }

    /// Price and tax from the first fare table; 0/0 when the table is short
    fn extract_fare(&self, item: ElementRef<'_>) -> Result<(f64, f64), ParseError> {
        let Some(table) = item.select(&self.price_table).next() else {
            tracing::warn!("Flight container has no fare table");
            return Ok((0.0, 0.0));
        };

        let rows: Vec<ElementRef<'_>> = table.select(&self.row).collect();
        if rows.len() < 3 {
            tracing::warn!("Fare table has only {} rows", rows.len());
            return Ok((0.0, 0.0));
        }

        let cells: Vec<String> = rows[1].select(&self.cell).map(stripped_text).collect();
        let price = cells.get(1).map(String::as_str).unwrap_or_default();
        let tax = cells.get(2).map(String::as_str).unwrap_or_default();
        Ok((parse_amount(price)?, parse_amount(tax)?))
    }
}

impl FlightMarkupParser for HtmlFlightParser {
    fn parse(&mut self, fragment: &str) -> bool {
        if fragment.trim().is_empty() {
            tracing::warn!("{}", ParseError::Markup("fragment is empty".to_string()));
            self.fragment = None;
            return false;
        }
        self.fragment = Some(fragment.to_string());
        true
    }

    fn extract_outbound(&self) -> Vec<OutboundCandidate> {
        let Some(document) = self.document() else {
            return Vec::new();
        };
        let containers: Vec<ElementRef<'_>> = document.select(&self.container).collect();
        tracing::debug!("Found {} outbound flight containers", containers.len());

        let mut flights = Vec::new();
        for (idx, item) in containers.into_iter().enumerate() {
            let selection_id = self.extract_selection_id(item);
            if selection_id.is_none() {
                tracing::warn!("Outbound flight #{} has no selection id", idx);
            }

            let segments = self.extract_segments(item);
            if segments.is_empty() {
                tracing::warn!("Outbound flight #{} has no segments, skipping", idx);
                continue;
            }

            flights.push(OutboundCandidate {
                departure_date: self.extract_dates(item).departure,
                return_date: None,
                segments,
                selection_id,
            });
        }

        tracing::debug!("Extracted {} outbound flights", flights.len());
        flights
    }

    fn extract_inbound(&self) -> Vec<InboundCandidate> {
        let Some(document) = self.document() else {
            return Vec::new();
        };
        let containers: Vec<ElementRef<'_>> = document.select(&self.container).collect();
        tracing::debug!(
            "Found {} flight containers (the first echoes the chosen outbound flight)",
            containers.len()
        );

        let mut flights = Vec::new();
        for (idx, item) in containers.into_iter().enumerate().skip(1) {
            let (price, tax) = match self.extract_fare(item) {
                Ok(fare) => fare,
                Err(e) => {
                    tracing::warn!("Inbound flight #{}: {}, skipping", idx, e);
                    continue;
                }
            };

            let segments = self.extract_segments(item);
            if segments.is_empty() {
                tracing::warn!("Inbound flight #{} has no segments, skipping", idx);
                continue;
            }

            flights.push(InboundCandidate {
                departure_date: None,
                // The inbound leg's own departure is the trip's return date.
                return_date: self.extract_dates(item).departure,
                segments,
                price,
                tax,
            });
        }

        tracing::debug!("Extracted {} inbound flights", flights.len());
        flights
    }
}

/// Element text with every text node trimmed and concatenated
fn stripped_text(element: ElementRef<'_>) -> String {
    element.text().map(str::trim).collect()
}

fn parse_amount(text: &str) -> Result<f64, ParseError> {
    let cleaned = text.replace(',', "");
    cleaned
        .trim()
        .parse::<f64>()
        .map_err(|_| ParseError::Fare(text.to_string()))
}

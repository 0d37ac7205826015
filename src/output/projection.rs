//! JSON and table projections of offers

use crate::model::{FlightOffer, FlightSegment};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Segment columns per direction in a table row
pub const SEGMENT_COLUMNS: usize = 3;

/// One flight/cabin column pair; both `None` when the leg does not exist
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SegmentColumn {
    pub flight_number: Option<String>,
    pub cabin_class: Option<String>,
}

/// Flattened offer, one row per itinerary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OfferRow {
    pub departure_date: Option<String>,
    pub return_date: Option<String>,
    pub price: i64,
    pub tax: i64,
    pub crawl_time: String,
    pub outbound: [SegmentColumn; SEGMENT_COLUMNS],
    pub inbound: [SegmentColumn; SEGMENT_COLUMNS],
}

/// Renders offers as a pretty-printed JSON array
pub fn offers_to_json(offers: &[FlightOffer]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(offers)
}

/// Flattens offers into table rows stamped with `crawl_time`
///
/// Legs beyond the third in either direction are not represented.
pub fn offers_to_rows(offers: &[FlightOffer], crawl_time: DateTime<Utc>) -> Vec<OfferRow> {
    let crawl_time = crawl_time.format("%Y-%m-%d %H:%M:%S").to_string();
    offers
        .iter()
        .map(|offer| OfferRow {
            departure_date: offer.departure_date.map(|d| d.format("%Y-%m-%d").to_string()),
            return_date: offer.return_date.map(|d| d.format("%Y-%m-%d").to_string()),
            price: offer.price.round() as i64,
            tax: offer.tax.round() as i64,
            crawl_time: crawl_time.clone(),
            outbound: segment_columns(&offer.outbound_segments),
            inbound: segment_columns(&offer.inbound_segments),
        })
        .collect()
}

fn segment_columns(segments: &[FlightSegment]) -> [SegmentColumn; SEGMENT_COLUMNS] {
    let mut columns: [SegmentColumn; SEGMENT_COLUMNS] = Default::default();
    for (column, segment) in columns.iter_mut().zip(segments) {
        column.flight_number = Some(segment.flight_number.clone());
        column.cabin_class = Some(segment.cabin_class.clone());
    }
    columns
}

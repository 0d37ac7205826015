//! Merges an outbound flight with its inbound candidates

use crate::model::{FlightOffer, InboundCandidate, OutboundCandidate};
use crate::query::FlightQuery;
use chrono::NaiveDate;

/// Builds complete offers for one outbound flight
///
/// Every inbound candidate with segments yields one offer carrying the
/// outbound segments and dates, the inbound segments, and the inbound
/// price and tax. The return date comes from the query; an unparseable
/// date leaves it unset. Candidates without segments are skipped.
///
/// # Example
///
/// ```
/// use fare_sweep::crawler::combine_itineraries;
/// use fare_sweep::model::{FlightSegment, InboundCandidate, OutboundCandidate};
/// use fare_sweep::FlightQuery;
///
/// let query = FlightQuery::new("TPE", "SIN", "2025-07-21", "2025-07-27");
/// let outbound = OutboundCandidate {
///     segments: vec![FlightSegment::new("BR225", "經濟艙Y")],
///     selection_id: Some("42".to_string()),
///     ..Default::default()
/// };
/// let inbound = vec![InboundCandidate {
///     segments: vec![FlightSegment::new("BR226", "經濟艙Y")],
///     price: 10000.0,
///     tax: 500.0,
///     ..Default::default()
/// }];
///
/// let offers = combine_itineraries(&outbound, &inbound, &query, "KEY", "2");
/// assert_eq!(offers.len(), 1);
/// assert_eq!(offers[0].price, 10000.0);
/// ```
pub fn combine_itineraries(
    outbound: &OutboundCandidate,
    inbound: &[InboundCandidate],
    query: &FlightQuery,
    search_key: &str,
    cabin_class: &str,
) -> Vec<FlightOffer> {
    let return_date = match NaiveDate::parse_from_str(&query.return_date, "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(e) => {
            tracing::warn!("Return date '{}' is not a date: {}", query.return_date, e);
            None
        }
    };

    let mut offers = Vec::with_capacity(inbound.len());
    for (idx, candidate) in inbound.iter().enumerate() {
        if candidate.segments.is_empty() {
            tracing::debug!("Inbound candidate #{} has no segments, skipping", idx);
            continue;
        }

        offers.push(FlightOffer {
            departure_date: outbound.departure_date,
            return_date,
            price: candidate.price,
            tax: candidate.tax,
            outbound_segments: outbound.segments.clone(),
            inbound_segments: candidate.segments.clone(),
            search_key: search_key.to_string(),
            selection_id: outbound.selection_id.clone(),
            cabin_class: cabin_class.to_string(),
        });
    }
    offers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FlightSegment;

    fn create_test_outbound() -> OutboundCandidate {
        OutboundCandidate {
            departure_date: NaiveDate::from_ymd_opt(2025, 7, 21),
            return_date: None,
            segments: vec![FlightSegment::new("BR225", "經濟艙Y")],
            selection_id: Some("S1".to_string()),
        }
    }

    fn create_test_inbound(segments: Vec<FlightSegment>, price: f64) -> InboundCandidate {
        InboundCandidate {
            departure_date: None,
            return_date: NaiveDate::from_ymd_opt(2025, 7, 27),
            segments,
            price,
            tax: 500.0,
        }
    }

    #[test]
    fn test_skips_inbound_without_segments() {
        let query = FlightQuery::new("TPE", "SIN", "2025-07-21", "2025-07-27");
        let inbound = vec![
            create_test_inbound(vec![FlightSegment::new("BR226", "經濟艙Y")], 10000.0),
            create_test_inbound(Vec::new(), 9000.0),
        ];

        let offers = combine_itineraries(&create_test_outbound(), &inbound, &query, "KEY", "2");

        assert_eq!(offers.len(), 1);
        let offer = &offers[0];
        assert_eq!(offer.price, 10000.0);
        assert_eq!(offer.tax, 500.0);
        assert_eq!(offer.departure_date, NaiveDate::from_ymd_opt(2025, 7, 21));
        assert_eq!(offer.return_date, NaiveDate::from_ymd_opt(2025, 7, 27));
        assert_eq!(offer.outbound_segments[0].flight_number, "BR225");
        assert_eq!(offer.inbound_segments[0].flight_number, "BR226");
        assert_eq!(offer.selection_id.as_deref(), Some("S1"));
        assert_eq!(offer.search_key, "KEY");
        assert_eq!(offer.cabin_class, "2");
    }

    #[test]
    fn test_bad_return_date_yields_none() {
        let query = FlightQuery::new("TPE", "SIN", "2025-07-21", "27/07/2025");
        let inbound = vec![create_test_inbound(
            vec![FlightSegment::new("BR226", "經濟艙Y")],
            10000.0,
        )];

        let offers = combine_itineraries(&create_test_outbound(), &inbound, &query, "KEY", "2");

        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].return_date, None);
    }

    #[test]
    fn test_no_inbound_no_offers() {
        let query = FlightQuery::new("TPE", "SIN", "2025-07-21", "2025-07-27");
        assert!(combine_itineraries(&create_test_outbound(), &[], &query, "KEY", "2").is_empty());
    }
}

use crate::ErrorKind;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Problems with markup or with a single extracted record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Markup could not be parsed: {0}")]
    Markup(String),

    #[error("Invalid flight number: {0}")]
    FlightNumber(String),

    #[error("Invalid cabin class: {0}")]
    CabinClass(String),

    #[error("Invalid date: {0}")]
    Date(String),

    #[error("Invalid fare: {0}")]
    Fare(String),

    #[error("Invalid offer: {0}")]
    InvalidOffer(String),
}

impl ParseError {
    /// A fragment that cannot be parsed at all is a protocol anomaly; the
    /// rest concern one record only
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Markup(_) => ErrorKind::Protocol,
            _ => ErrorKind::Data,
        }
    }
}

/// One leg of a journey
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightSegment {
    /// Normalized flight number, e.g. `BR225` or `CI007`
    pub flight_number: String,

    /// Cabin class label as shown by the site, e.g. `經濟艙Y`
    pub cabin_class: String,
}

impl FlightSegment {
    pub fn new(flight_number: impl Into<String>, cabin_class: impl Into<String>) -> Self {
        Self {
            flight_number: flight_number.into(),
            cabin_class: cabin_class.into(),
        }
    }
}

/// A flight from the outbound phase, before combination
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutboundCandidate {
    pub departure_date: Option<NaiveDate>,
    pub return_date: Option<NaiveDate>,
    pub segments: Vec<FlightSegment>,
    /// Correlates this flight with its inbound query scope
    pub selection_id: Option<String>,
}

/// A flight from the inbound phase; the only carrier of the total fare
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundCandidate {
    pub departure_date: Option<NaiveDate>,
    pub return_date: Option<NaiveDate>,
    pub segments: Vec<FlightSegment>,
    pub price: f64,
    pub tax: f64,
}

/// A complete round-trip itinerary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightOffer {
    #[serde(with = "opt_date")]
    pub departure_date: Option<NaiveDate>,

    #[serde(with = "opt_date")]
    pub return_date: Option<NaiveDate>,

    pub price: f64,
    pub tax: f64,
    pub outbound_segments: Vec<FlightSegment>,
    pub inbound_segments: Vec<FlightSegment>,

    /// Session key issued by the outbound search
    pub search_key: String,

    pub selection_id: Option<String>,

    /// Cabin class query that produced this offer
    #[serde(default)]
    pub cabin_class: String,
}

impl FlightOffer {
    /// Checks the invariants of a complete offer
    ///
    /// * at least one segment in each direction
    /// * a positive price
    /// * departure not after return when both dates are known
    /// * every segment carries a flight number
    pub fn validate(&self) -> Result<(), ParseError> {
        if self.outbound_segments.is_empty() || self.inbound_segments.is_empty() {
            return Err(ParseError::InvalidOffer(
                "offer needs outbound and inbound segments".to_string(),
            ));
        }

        if self.price.is_nan() || self.price <= 0.0 {
            return Err(ParseError::Fare(format!("price must be positive, got {}", self.price)));
        }

        if let (Some(dep), Some(ret)) = (self.departure_date, self.return_date) {
            if dep > ret {
                return Err(ParseError::Date(format!(
                    "departure {} is after return {}",
                    dep, ret
                )));
            }
        }

        if self
            .outbound_segments
            .iter()
            .chain(self.inbound_segments.iter())
            .any(|s| s.flight_number.trim().is_empty())
        {
            return Err(ParseError::FlightNumber(
                "segment is missing a flight number".to_string(),
            ));
        }

        Ok(())
    }

    /// Price plus tax
    pub fn total(&self) -> f64 {
        self.price + self.tax
    }
}

/// Drops offers that fail validation, logging each one
pub fn retain_valid_offers(offers: Vec<FlightOffer>) -> Vec<FlightOffer> {
    let before = offers.len();
    let valid: Vec<FlightOffer> = offers
        .into_iter()
        .filter(|offer| match offer.validate() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Dropping invalid offer: {}", e);
                false
            }
        })
        .collect();

    if valid.len() < before {
        tracing::info!("Kept {} of {} offers after validation", valid.len(), before);
    }
    valid
}

mod opt_date {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d";

    pub fn serialize<S: Serializer>(date: &Option<NaiveDate>, s: S) -> Result<S::Ok, S::Error> {
        match date {
            Some(d) => s.serialize_str(&d.format(FORMAT).to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveDate>, D::Error> {
        let value: Option<String> = Option::deserialize(d)?;
        value
            .map(|v| NaiveDate::parse_from_str(&v, FORMAT).map_err(serde::de::Error::custom))
            .transpose()
    }
}

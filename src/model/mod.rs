//! Flight records produced by the search phases
//!
//! Outbound and inbound candidates are what a single page of results yields.
//! A `FlightOffer` is a complete round trip built by pairing an outbound
//! candidate with one of its inbound candidates.

mod flight;

pub use flight::{
    retain_valid_offers, FlightOffer, FlightSegment, InboundCandidate, OutboundCandidate,
    ParseError,
};

//! Output module for offer projections and batch reports
//!
//! This module handles:
//! - Rendering offers as JSON and as flat table rows
//! - Printing batch summaries
//! - Writing batch reports to disk

mod projection;
mod summary;

pub use projection::{offers_to_json, offers_to_rows, OfferRow, SegmentColumn, SEGMENT_COLUMNS};
pub use summary::{print_batch_summary, state_breakdown, write_report};

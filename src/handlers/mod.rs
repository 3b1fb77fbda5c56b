pub mod estimate_handler;

pub use estimate_handler::{format_estimate_summary, EstimateHandler, SavedEstimate};

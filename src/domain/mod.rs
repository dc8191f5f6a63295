//! Domain vocabulary: resource tags, endpoints and exportable records.

pub mod endpoint;
pub mod records;
pub mod types;

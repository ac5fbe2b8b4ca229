//! HTTP middleware components
//!
//! Request correlation ids and request accounting.

pub mod request_id;
pub mod request_metrics;

pub use request_id::{REQUEST_ID_HEADER, RequestId, RequestIdLayer, RequestIdService};
pub use request_metrics::track_requests;

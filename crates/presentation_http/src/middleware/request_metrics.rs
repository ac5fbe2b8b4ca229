//! Request accounting middleware

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::state::AppState;

/// Count every request and its outcome class in the metrics collector
///
/// A request whose future is dropped (timeout, client gone) is still taken
/// off the active gauge.
pub async fn track_requests(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let in_flight = state.metrics.request_start();
    let response = next.run(request).await;
    in_flight.finish(response.status().as_u16());
    response
}

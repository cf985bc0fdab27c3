use api_state::ApiState;
use axum::{
    extract::FromRef,
    routing::{get, post},
    Router,
};
use routes::{liveness::live, query::post_query, readiness::ready};

pub mod api_state;
pub mod error;
mod routes;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    Router::new()
        .route("/query", post(post_query))
        .route("/ready", get(ready))
        .route("/live", get(live))
}

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{auth, handlers, metrics, AppState};

pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/solve", post(handlers::solve))
        .route("/history", get(handlers::get_history))
        .route("/history/{problem_id}", delete(handlers::delete_problem))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    // Leave the framework limit above the validated ceiling so oversize
    // uploads surface as a 400 from validation, not a 413 from hyper.
    let body_limit = state.config.limits.max_upload_bytes + 1024 * 1024;
    let cors = cors_layer(&state.config.server.allowed_origins);

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/metrics", get(metrics::metrics_handler))
        .nest("/api/v1", protected)
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

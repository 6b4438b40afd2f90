use axum::{
    extract::Request,
    http::{header, HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::AppState;

/// CSP middleware adds Content-Security-Policy header to all responses
async fn csp_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(
            "default-src 'self'; \
             script-src 'self' 'unsafe-inline'; \
             style-src 'self' 'unsafe-inline'; \
             img-src 'self' data: https:; \
             connect-src 'self'",
        ),
    );
    response
}

pub fn create_router(app_state: std::sync::Arc<services::AppState>) -> Router {
    // The frontend is served from a different origin in every deployment.
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-session-id"),
        ])
        .allow_origin(tower_http::cors::Any); // TODO: restrict to specific origins in production

    // Health and metrics stay outside the limiter: probes must keep
    // answering while Redis is down.
    let api = Router::new()
        // Sandbox execution sits behind the per-session limiter.
        .nest(
            "/execute",
            execute_routes().layer(middleware::from_fn_with_state(
                app_state.clone(),
                middlewares::rate_limit::execute_rate_limit_middleware,
            )),
        )
        .nest("/problems", problems_routes(app_state.clone()))
        .nest("/progress", progress_routes())
        .nest("/recommendations", recommendations_routes())
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            middlewares::rate_limit::rate_limit_middleware,
        ));

    Router::new()
        // Public endpoints (no auth required)
        .route("/health", get(handlers::health_check))
        // Metrics endpoint with Basic Auth protection
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        .merge(api)
        .with_state(app_state)
        .layer(cors)
        .layer(middleware::from_fn(csp_middleware))
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn execute_routes() -> Router<std::sync::Arc<services::AppState>> {
    Router::new().route("/sql", post(handlers::execute::execute_sql))
}

fn problems_routes(
    app_state: std::sync::Arc<services::AppState>,
) -> Router<std::sync::Arc<services::AppState>> {
    Router::new()
        .route("/", get(handlers::problems::list_problems))
        .route("/{id}", get(handlers::problems::get_problem))
        // Rebuilds are as expensive as executions; same limiter.
        .route(
            "/{id}/setup",
            post(handlers::execute::setup_problem).layer(middleware::from_fn_with_state(
                app_state,
                middlewares::rate_limit::execute_rate_limit_middleware,
            )),
        )
}

fn progress_routes() -> Router<std::sync::Arc<services::AppState>> {
    Router::new()
        .route("/session", post(handlers::progress::session))
        .route("/heartbeat", post(handlers::progress::heartbeat))
        .route("/overview", get(handlers::progress::overview))
        .route("/detailed", get(handlers::progress::detailed))
        .route("/stats", get(handlers::progress::stats))
        .route("/leaderboard", get(handlers::progress::leaderboard))
        .route("/attempt", post(handlers::progress::record_attempt))
}

fn recommendations_routes() -> Router<std::sync::Arc<services::AppState>> {
    Router::new()
        .route("/problems", get(handlers::recommendations::problems))
        .route("/mastery", get(handlers::recommendations::mastery_breakdown))
        .route(
            "/daily-challenge",
            get(handlers::recommendations::daily_challenge),
        )
        .route(
            "/achievements",
            get(handlers::recommendations::achievements),
        )
        .route("/hints/{id}", get(handlers::recommendations::list_hints))
        .route(
            "/hint-usage",
            post(handlers::recommendations::reveal_hint),
        )
}

pub mod handlers;
pub mod middleware;
pub mod state;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    cors::CorsLayer,
    trace::TraceLayer,
};
use std::sync::Arc;

use crate::{
    config::Settings,
    service::ServiceContext,
};
use state::AppState;

pub fn create_app(service_context: Arc<ServiceContext>, settings: Arc<Settings>) -> Router {
    let app_state = AppState::new(service_context, settings);

    Router::new()
        .route("/health", get(handlers::root::health_check))

        // Gateway redirects the payer's browser here
        .route("/payments/callback", get(handlers::payments::callback))

        .nest("/api", api_routes(app_state.clone()))

        .with_state(app_state)

        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Gateway webhooks and frontend config are public
        .route("/webhooks/:provider", post(handlers::payments::webhook))
        .route("/payments/config", get(handlers::payments::provider_config))
        .nest("/bookings", Router::new()
            .route("/:id/payments", post(handlers::payments::initialize))
            .route_layer(axum::middleware::from_fn_with_state(
                state,
                crate::api::middleware::auth::require_auth,
            ))
        )
}

use axum::{
    middleware,
    routing::{delete, get},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::analytics::Aggregator;
use crate::auth::{auth_middleware, AuthService};
use crate::storage::Storage;

use super::analytics::get_analytics;
use super::handlers::{create_url, delete_url, health_check, list_urls, AppState};

pub fn create_api_router(
    storage: Arc<dyn Storage>,
    auth_service: Arc<AuthService>,
    aggregator: Aggregator,
) -> Router {
    let state = Arc::new(AppState {
        storage,
        aggregator,
    });

    let protected_routes = Router::new()
        .route("/api/urls", get(list_urls).post(create_url))
        .route("/api/urls/{code}", delete(delete_url))
        .route("/api/urls/{code}/analytics", get(get_analytics))
        .route_layer(middleware::from_fn(move |headers, req, next| {
            let auth = Arc::clone(&auth_service);
            auth_middleware(auth, headers, req, next)
        }))
        .with_state(state);

    Router::new()
        .route("/health", get(health_check))
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
}

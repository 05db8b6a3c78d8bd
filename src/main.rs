//! Ordering Portal Backend
//!
//! Multi-tenant B2B ordering REST backend with SQLite persistence and
//! Tantivy product search.

mod api;
mod auth;
mod budget;
mod config;
mod db;
mod errors;
mod models;
mod search;
mod tenant;
mod transfer;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::{Config, LogFormat};
use db::Repository;
use search::SearchIndex;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub search: Arc<SearchIndex>,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    init_tracing(&config);

    tracing::info!("Starting Ordering Portal Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Index path: {:?}", config.index_path);
    tracing::info!("Bind address: {}", config.bind_addr);

    if config.api_psk.is_none() {
        tracing::warn!("No API PSK configured (ORDERING_API_PSK). Authentication is disabled!");
    }
    if let Some(prefix) = &config.default_company {
        tracing::info!("Default company: {}", prefix);
    }

    let pool = db::init_database(&config.db_path).await?;
    let repo = Arc::new(Repository::new(pool));

    let search = Arc::new(SearchIndex::open(&config.index_path)?);

    tracing::info!("Building search index...");
    let products = repo.all_products_for_index().await?;
    search.rebuild(&products).await?;

    let state = AppState {
        repo,
        search,
        config: Arc::new(config.clone()),
    };

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let psk = state.config.api_psk.clone();

    let api_routes = Router::new()
        // Companies (platform scope)
        .route("/companies", get(api::list_companies))
        .route("/companies", post(api::create_company))
        .route("/companies/{id}", get(api::get_company))
        .route("/companies/{id}", put(api::update_company))
        .route("/company", get(api::get_branding))
        // Stores
        .route("/stores", get(api::list_stores))
        .route("/stores", post(api::create_store))
        .route("/stores/{id}", get(api::get_store))
        .route("/stores/{id}", put(api::update_store))
        .route("/stores/{id}/budget", get(api::get_store_budget))
        // Users
        .route("/users", get(api::list_users))
        .route("/users", post(api::create_user))
        .route("/users/me", get(api::get_me))
        .route("/users/{id}", get(api::get_user))
        .route("/users/{id}", put(api::update_user))
        .route("/users/{id}/activation", post(api::set_user_activation))
        // Products
        .route("/products", get(api::list_products))
        .route("/products", post(api::create_product))
        .route("/products/search", get(api::search_products))
        .route("/products/{id}", get(api::get_product))
        .route("/products/{id}", put(api::update_product))
        // Carts
        .route("/carts/{store_id}", get(api::get_cart))
        .route("/carts/{store_id}", delete(api::clear_cart))
        .route(
            "/carts/{store_id}/items/{product_id}",
            put(api::set_cart_item),
        )
        .route(
            "/carts/{store_id}/items/{product_id}/adjust",
            post(api::adjust_cart_item),
        )
        // Orders
        .route("/orders", get(api::list_orders))
        .route("/orders", post(api::place_order))
        .route("/orders/{id}", get(api::get_order))
        .route("/orders/{id}/approve", post(api::approve_order))
        .route("/orders/{id}/reject", post(api::reject_order))
        .route("/orders/{id}/status", put(api::update_order_status))
        // Reports
        .route("/reports/budgets", get(api::budget_report))
        .route("/reports/orders", get(api::order_report))
        // CSV transfer
        .route("/export/orders.csv", get(api::export_orders))
        .route("/export/users.csv", get(api::export_users))
        .route("/export/products.csv", get(api::export_products))
        .route("/import/products", post(api::import_products))
        .route("/import/users", post(api::import_users))
        // Revision
        .route("/revision", get(api::get_revision))
        // Apply PSK auth middleware
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests;

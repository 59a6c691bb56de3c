//! Webhook ingress + content-store REST surface (spec §6). A thin axum
//! layer over `isocrates_store::ContentStore` and `isocrates_jobs::JobQueue`
//! — every invariant (ID generation, optimistic locking, orphan-cleanup
//! safety) already lives in those crates; this one only translates HTTP.

pub mod routes;

use std::sync::Arc;

use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use isocrates_common::Config;
use isocrates_jobs::JobQueue;
use isocrates_store::ContentStore;

pub struct AppState {
    pub store: ContentStore,
    pub queue: JobQueue,
    pub config: Config,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/docs", post(routes::docs::create_document).get(routes::docs::list_documents))
        .route("/api/docs/batch", post(routes::docs::batch_operation))
        .route("/api/docs/generate-id", post(routes::docs::generate_id))
        .route(
            "/api/docs/{id}",
            get(routes::docs::get_document).put(routes::docs::update_document).delete(routes::docs::delete_document),
        )
        .route("/api/docs/{id}/versions", get(routes::docs::list_versions))
        .route("/api/docs/{id}/dependencies", get(routes::docs::get_dependencies))
        .route("/api/webhooks/github", post(routes::webhooks::github_webhook))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
                .allow_headers([header::CONTENT_TYPE, header::HeaderName::from_static("x-hub-signature-256")]),
        )
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!("http_request", method = %request.method(), path = %request.uri().path())
            }),
        )
}

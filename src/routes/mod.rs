use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post},
    Router,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod auth;
pub mod categories;
pub mod competencies;
pub mod documents;
pub mod health;
pub mod reminders;
pub mod reviews;
pub mod revisions;

const MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 100;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|value| {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    return None;
                }
                match trimmed.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(err) => {
                        warn!(origin = %trimmed, error = %err, "ignoring invalid CORS origin");
                        None
                    }
                }
            })
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(headers))
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let auth_routes = Router::new().route("/me", get(auth::me));

    let categories_routes = Router::new()
        .route(
            "/",
            get(categories::list_categories).post(categories::create_category),
        )
        .route("/reorder", post(categories::reorder_categories))
        .route(
            "/:id",
            patch(categories::update_category).delete(categories::delete_category),
        );

    let documents_routes = Router::new()
        .route(
            "/",
            get(documents::list_documents).post(documents::create_document),
        )
        .route(
            "/:id",
            get(documents::get_document).patch(documents::update_document),
        )
        .route("/:id/withdraw", post(documents::withdraw_document))
        .route(
            "/:id/revisions",
            get(revisions::list_revisions).post(revisions::create_revision),
        )
        .route("/:id/schedules", get(reviews::list_schedules))
        .route("/:id/review/complete", post(reviews::complete_review));

    let revisions_routes = Router::new()
        .route("/:id/submit", post(revisions::submit_revision))
        .route("/:id/approve", post(revisions::approve_revision))
        .route("/:id/reject", post(revisions::reject_revision))
        .route("/:id/file", get(revisions::revision_file));

    let reviews_routes = Router::new().route("/due", get(reviews::documents_due));

    let competencies_routes = Router::new()
        .route(
            "/",
            get(competencies::list_competencies).put(competencies::upsert_competency),
        )
        .route("/:id/history", get(competencies::competency_history))
        .route("/:id/verify", post(competencies::verify_competency))
        .route("/:id/request-changes", post(competencies::request_changes))
        .route("/:id/document", get(competencies::competency_document));

    let reminders_routes = Router::new()
        .route(
            "/settings",
            get(reminders::get_settings).put(reminders::update_settings),
        )
        .route("/trigger", post(reminders::trigger_reminders))
        .route("/users/:user_id", post(reminders::send_to_user));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/categories", categories_routes)
        .nest("/api/documents", documents_routes)
        .nest("/api/revisions", revisions_routes)
        .nest("/api/reviews", reviews_routes)
        .nest("/api/competencies", competencies_routes)
        .nest("/api/reminders", reminders_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

pub(crate) fn to_iso(dt: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc).to_rfc3339()
}

#[derive(Serialize)]
pub struct FileUrlResponse {
    pub url: String,
    pub expires_in: u64,
}

impl FileUrlResponse {
    pub(crate) fn signed(url: String) -> Self {
        Self {
            url,
            expires_in: crate::storage::SIGNED_URL_TTL.as_secs(),
        }
    }
}

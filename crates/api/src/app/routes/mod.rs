use axum::{routing::get, Router};

pub mod admin;
pub mod auth;
pub mod billing;
pub mod integrations;
pub mod partnerships;
pub mod properties;
pub mod refresh_jobs;
pub mod schedules;
pub mod system;

/// Router for all authenticated (tenant-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/properties", properties::router())
        .nest("/integrations", integrations::router())
        .nest("/schedules", schedules::router())
        .nest("/refresh-jobs", refresh_jobs::router())
        .nest("/admin", admin::router())
        .nest("/billing", billing::router())
        .nest("/partnerships", partnerships::router())
}

//! HTTP interface of tally.
//!
//! Routes keep the paths and parameter names the existing clients and upload
//! tooling use:
//! - `GET /getData.php`: data newer than the client's version vector.
//! - `POST /synchronize`: refresh the cache now, at most once per cooldown.
//! - `POST /upload.php`: store a new file in the latest database.
//! - `POST /createNewVersion`: start a new database.

mod admin;
mod data;
pub mod error;
mod state;

pub use crate::admin::{UploadForm, next_database_name, upload_category, wrap_payload};
pub use crate::data::{VersionQuery, render};
pub use crate::state::{AppState, Cooldown};
use axum::Router;
use axum::routing::{get, post};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/getData.php", get(data::get_data))
        .route("/synchronize", post(admin::synchronize))
        .route("/upload.php", post(admin::upload))
        .route("/createNewVersion", post(admin::create_new_version))
        .with_state(state)
}

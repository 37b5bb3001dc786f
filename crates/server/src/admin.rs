//! Write and maintenance endpoints, used by the upload tooling.

use crate::AppState;
use crate::error::{ApiError, ErrorKind, Result};
use axum::Form;
use axum::extract::State;
use axum::http::StatusCode;
use exn::ResultExt;
use serde::Deserialize;
use tally_storage::{Category, Shape};

#[derive(Debug, Default, Deserialize)]
pub struct UploadForm {
    password: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    data: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PasswordForm {
    password: Option<String>,
}

fn authorize(state: &AppState, password: Option<&str>) -> Result<()> {
    match password {
        None | Some("") => exn::bail!(ErrorKind::MissingPassword),
        Some(password) if password != &*state.password => exn::bail!(ErrorKind::WrongPassword),
        Some(_) => Ok(()),
    }
}

/// Category for an upload `type`. The upload tooling uses singular names for
/// some of them.
pub fn upload_category(kind: &str) -> Result<Category> {
    Ok(match kind {
        "database" => Category::Databases,
        "message" => Category::Messages,
        "results" => Category::Results,
        "sponsors" => Category::Sponsors,
        _ => exn::bail!(ErrorKind::UnknownType(kind.to_string())),
    })
}

/// Uploads arrive without their outer braces or brackets.
pub fn wrap_payload(category: Category, data: &str) -> String {
    match category.shape() {
        Shape::Object => format!("{{{data}}}"),
        Shape::Array => format!("[{data}]"),
    }
}

/// Name of the database folder following `current` in `year`: the year
/// followed by a two digit sequence number, restarting at `00` every year.
pub fn next_database_name(current: Option<&str>, year: i32) -> Result<String> {
    let prefix = year.to_string();
    let sequence = match current.and_then(|current| current.strip_prefix(prefix.as_str())) {
        None => 0,
        Some(suffix) => match suffix.parse::<u32>() {
            Ok(sequence) if sequence < 99 => sequence + 1,
            _ => exn::bail!(ErrorKind::VersionExhausted(format!("{prefix}{suffix}"))),
        },
    };
    Ok(format!("{prefix}{sequence:02}"))
}

pub(crate) async fn upload(
    State(state): State<AppState>,
    Form(form): Form<UploadForm>,
) -> std::result::Result<StatusCode, ApiError> {
    authorize(&state, form.password.as_deref())?;
    let kind = form.kind.unwrap_or_default();
    let category = upload_category(&kind)?;
    tracing::info!(%category, bytes = form.data.as_ref().map_or(0, String::len), "POST upload.php");

    // A new database created during an upload would receive the file instead;
    // both are only ever triggered by the same operator.
    let folder = state.storage.latest_folder_name().await.or_raise(|| ErrorKind::Storage)?;
    let folder = folder.ok_or_else(|| exn::Exn::from(ErrorKind::NoDatabase))?;
    let latest = state.storage.latest_file_number(&folder, category).await.or_raise(|| ErrorKind::Storage)?;
    let number = latest.unwrap_or(0) + 1;
    let contents = wrap_payload(category, form.data.as_deref().unwrap_or_default());
    state.storage.create_file(&folder, category, number, &contents).await.or_raise(|| ErrorKind::Storage)?;
    tracing::info!(database = %folder, %category, version = number, "Stored upload");

    state.cache.synchronize().await;
    Ok(StatusCode::OK)
}

pub(crate) async fn create_new_version(
    State(state): State<AppState>,
    Form(form): Form<PasswordForm>,
) -> std::result::Result<StatusCode, ApiError> {
    authorize(&state, form.password.as_deref())?;
    tracing::info!("POST createNewVersion");

    let current = state.storage.latest_folder_name().await.or_raise(|| ErrorKind::Storage)?;
    let year = time::OffsetDateTime::now_utc().year();
    let folder = next_database_name(current.as_deref(), year)?;
    state.storage.create_folder(&folder).await.or_raise(|| ErrorKind::Storage)?;
    futures::future::try_join_all(Category::ALL.map(|category| state.storage.create_sub_folder(&folder, category)))
        .await
        .or_raise(|| ErrorKind::Storage)?;
    tracing::info!(database = %folder, "Created database");

    state.cache.synchronize().await;
    Ok(StatusCode::OK)
}

pub(crate) async fn synchronize(State(state): State<AppState>) -> std::result::Result<StatusCode, ApiError> {
    tracing::info!("POST synchronize");
    if !state.cooldown.try_acquire() {
        return Err(ErrorKind::CoolingDown.into());
    }
    state.cache.try_synchronize().await.or_raise(|| ErrorKind::Storage)?;
    Ok(StatusCode::OK)
}

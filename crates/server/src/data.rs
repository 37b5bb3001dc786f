//! `GET /getData.php`: everything newer than the client's versions.

use crate::AppState;
use crate::error::{ApiError, ErrorKind, Result};
use axum::Json;
use axum::extract::{Query, State};
use exn::ResultExt;
use serde::Deserialize;
use serde_json::{Map, Value};
use tally_cache::{DataDiff, VersionVector};

/// The client's version vector, as sent. Every field is required.
#[derive(Debug, Default, Deserialize)]
pub struct VersionQuery {
    databaseversion: Option<String>,
    dataversion: Option<String>,
    messageversion: Option<String>,
    resultversion: Option<String>,
    sponsorsversion: Option<String>,
}

impl VersionQuery {
    pub fn parse(self) -> Result<VersionVector> {
        fn counter(value: Option<String>, name: &'static str) -> Result<u32> {
            let value = value.ok_or_else(|| exn::Exn::from(ErrorKind::InvalidVersion(name)))?;
            value.trim().parse::<u32>().or_raise(|| ErrorKind::InvalidVersion(name))
        }
        let database = self
            .databaseversion
            .ok_or_else(|| exn::Exn::from(ErrorKind::InvalidVersion("databaseversion")))?;
        Ok(VersionVector {
            database,
            data: counter(self.dataversion, "dataversion")?,
            messages: counter(self.messageversion, "messageversion")?,
            results: counter(self.resultversion, "resultversion")?,
            sponsors: counter(self.sponsorsversion, "sponsorsversion")?,
        })
    }
}

/// Public response shape: the versions (with their historical key names),
/// the keys of the data and sponsors documents merged in at the top level,
/// then the flattened lists.
pub fn render(diff: &DataDiff, previous_database: &str) -> Value {
    let versions = diff.versions();
    let new_database = match versions.database == previous_database {
        true => "false",
        false => "true",
    };
    let mut body = Map::new();
    body.insert("databaseVersion".to_string(), Value::from(versions.database.as_str()));
    body.insert("dataVersion".to_string(), Value::from(versions.data));
    body.insert("messageVersion".to_string(), Value::from(versions.messages));
    body.insert("resultVersion".to_string(), Value::from(versions.results));
    body.insert("sponsorsVersion".to_string(), Value::from(versions.sponsors));
    body.insert("newDatabaseVersion".to_string(), Value::from(new_database));
    for document in [diff.data(), diff.sponsors()].into_iter().flatten() {
        body.extend(document.iter().map(|(key, value)| (key.clone(), value.clone())));
    }
    body.insert("messages".to_string(), Value::Array(diff.flat_messages().cloned().collect()));
    body.insert("results".to_string(), Value::Array(diff.flat_results().cloned().collect()));
    Value::Object(body)
}

pub(crate) async fn get_data(
    State(state): State<AppState>,
    Query(query): Query<VersionQuery>,
) -> std::result::Result<Json<Value>, ApiError> {
    let previous = query.parse()?;
    tracing::info!(
        database = %previous.database,
        data = previous.data,
        messages = previous.messages,
        results = previous.results,
        sponsors = previous.sponsors,
        "GET getData.php"
    );
    let diff = state.cache.get_newer_data(&previous).or_raise(|| ErrorKind::NotInitialized)?;
    Ok(Json(render(&diff, &previous.database)))
}

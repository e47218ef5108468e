//! Source rows and index documents

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

/// Role of a person in a film work, as stored in `person_film_work.role`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersonRole {
    Director,
    Actor,
    Writer,
    /// Any role the index has no field for
    #[serde(other)]
    Other,
}

/// One element of the aggregated `persons` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonRecord {
    pub person_role: PersonRole,
    pub person_id: Uuid,
    pub person_name: String,
}

/// One row of the change-detection query.
///
/// Genres and persons arrive already aggregated per film work; a film work
/// with no genres yields `[NULL]`, one with no persons yields `[]`.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ChangedRow {
    pub id: Uuid,
    pub rating: Option<f64>,
    pub genre: Vec<Option<String>>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub modified: DateTime<Utc>,
    pub persons: Json<Vec<PersonRecord>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRef {
    pub id: Uuid,
    pub name: String,
}

/// Denormalized film work as stored in the index.
///
/// `id` is the bulk `_id` and is not written into the document body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexDocument {
    #[serde(skip_serializing)]
    pub id: Uuid,
    pub imdb_rating: Option<f64>,
    pub genre: Vec<String>,
    pub title: String,
    pub description: Option<String>,
    pub director: Vec<String>,
    pub actors_names: Vec<String>,
    pub writers_names: Vec<String>,
    pub actors: Vec<PersonRef>,
    pub writers: Vec<PersonRef>,
}

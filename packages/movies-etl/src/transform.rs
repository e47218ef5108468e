//! Row-to-document transform
//!
//! Pure and deterministic: one `IndexDocument` per distinct film work id, in
//! order of first appearance. Rows sharing an id are merged (genres as an
//! ordered set, persons appended in arrival order). Person lists are not
//! deduplicated here; the source aggregation already does that.

use std::collections::HashMap;

use tracing::trace;
use uuid::Uuid;

use crate::error::TransformError;
use crate::models::{ChangedRow, IndexDocument, PersonRef, PersonRole};

pub fn transform(rows: &[ChangedRow]) -> Result<Vec<IndexDocument>, TransformError> {
    let mut docs: Vec<IndexDocument> = Vec::new();
    let mut groups: Vec<&ChangedRow> = Vec::new();
    let mut position: HashMap<Uuid, usize> = HashMap::new();

    for row in rows {
        let idx = match position.get(&row.id) {
            Some(&idx) => {
                check_consistent(groups[idx], row)?;
                idx
            }
            None => {
                let title = row.title.clone().ok_or(TransformError::MissingField {
                    id: row.id,
                    field: "title",
                })?;
                docs.push(IndexDocument {
                    id: row.id,
                    imdb_rating: row.rating,
                    genre: Vec::new(),
                    title,
                    description: row.description.clone(),
                    director: Vec::new(),
                    actors_names: Vec::new(),
                    writers_names: Vec::new(),
                    actors: Vec::new(),
                    writers: Vec::new(),
                });
                groups.push(row);
                position.insert(row.id, docs.len() - 1);
                docs.len() - 1
            }
        };
        merge_row(&mut docs[idx], row);
    }

    Ok(docs)
}

fn merge_row(doc: &mut IndexDocument, row: &ChangedRow) {
    for genre in row.genre.iter().flatten() {
        if !doc.genre.contains(genre) {
            doc.genre.push(genre.clone());
        }
    }

    for person in row.persons.iter() {
        let person_ref = PersonRef {
            id: person.person_id,
            name: person.person_name.clone(),
        };
        match person.person_role {
            PersonRole::Director => doc.director.push(person_ref.name),
            PersonRole::Actor => {
                doc.actors_names.push(person_ref.name.clone());
                doc.actors.push(person_ref);
            }
            PersonRole::Writer => {
                doc.writers_names.push(person_ref.name.clone());
                doc.writers.push(person_ref);
            }
            PersonRole::Other => {
                trace!(film_work = %row.id, person = %person.person_id, "skipping unmapped role")
            }
        }
    }
}

/// Rows of one film work must agree on everything but genres and persons.
fn check_consistent(first: &ChangedRow, row: &ChangedRow) -> Result<(), TransformError> {
    let field = if first.modified != row.modified {
        "modified"
    } else if first.title != row.title {
        "title"
    } else if first.description != row.description {
        "description"
    } else if !same_rating(first.rating, row.rating) {
        "rating"
    } else {
        return Ok(());
    };

    Err(TransformError::InconsistentGroup { id: row.id, field })
}

fn same_rating(a: Option<f64>, b: Option<f64>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.to_bits() == b.to_bits(),
        (None, None) => true,
        _ => false,
    }
}

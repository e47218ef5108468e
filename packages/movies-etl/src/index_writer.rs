//! Search index writer (Elasticsearch HTTP API)
//!
//! - `ensure_index`: `HEAD /{index}`, and on 404 `PUT /{index}` with the
//!   schema file. Never recreates an existing index.
//! - `bulk_upsert`: one `POST /_bulk` per batch, an `index` action per
//!   document keyed by film work id, so replaying a batch overwrites the same
//!   documents instead of adding new ones.
//!
//! Transport failures and 429/5xx answers surface as transient errors for the
//! retry wrapper. Per-item rejections inside a 200 bulk answer are reported as
//! [`BulkOutcome::Rejected`].

use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::ElasticSettings;
use crate::error::{EtlError, Result};
use crate::models::IndexDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    AlreadyExists,
    Created,
}

/// Result of a bulk write that reached the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkOutcome {
    /// Empty batch, no request sent
    NothingToDo,
    /// Every document was indexed
    Written { indexed: usize },
    /// The index refused some documents
    Rejected { failed: usize, reason: String },
}

impl BulkOutcome {
    pub fn is_confirmed(&self) -> bool {
        !matches!(self, BulkOutcome::Rejected { .. })
    }
}

/// Target of index writes.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    async fn ensure_index(&self) -> Result<IndexStatus>;

    async fn bulk_upsert(&self, docs: &[IndexDocument]) -> Result<BulkOutcome>;
}

pub struct ElasticIndexWriter {
    client: Client,
    address: String,
    index: String,
    schema_path: PathBuf,
}

impl ElasticIndexWriter {
    pub fn new(settings: &ElasticSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()?;

        Ok(Self {
            client,
            address: settings.address.trim_end_matches('/').to_string(),
            index: settings.index.clone(),
            schema_path: settings.schema_path.clone(),
        })
    }

    fn index_url(&self) -> String {
        format!("{}/{}", self.address, self.index)
    }

    async fn load_schema(&self) -> Result<Value> {
        let path = self.schema_path.display().to_string();
        let raw = tokio::fs::read_to_string(&self.schema_path)
            .await
            .map_err(|e| EtlError::Schema {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        serde_json::from_str(&raw).map_err(|e| EtlError::Schema {
            path,
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl DocumentSink for ElasticIndexWriter {
    async fn ensure_index(&self) -> Result<IndexStatus> {
        let response = self.client.head(self.index_url()).send().await?;
        match response.status() {
            status if status.is_success() => {
                debug!(index = %self.index, "index exists");
                return Ok(IndexStatus::AlreadyExists);
            }
            StatusCode::NOT_FOUND => {}
            status => return Err(EtlError::index_response(status, String::new())),
        }

        let schema = self.load_schema().await?;
        let response = self.client.put(self.index_url()).json(&schema).send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.is_success() {
            info!(index = %self.index, schema = %self.schema_path.display(), "index created");
            Ok(IndexStatus::Created)
        } else if status == StatusCode::BAD_REQUEST
            && body.contains("resource_already_exists_exception")
        {
            // created concurrently between HEAD and PUT
            Ok(IndexStatus::AlreadyExists)
        } else {
            Err(EtlError::index_response(status, body))
        }
    }

    async fn bulk_upsert(&self, docs: &[IndexDocument]) -> Result<BulkOutcome> {
        if docs.is_empty() {
            return Ok(BulkOutcome::NothingToDo);
        }

        let body = build_bulk_body(&self.index, docs)?;
        let response = self
            .client
            .post(format!("{}/_bulk", self.address))
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EtlError::index_response(status, body));
        }

        let payload: Value = response.json().await?;
        let outcome = parse_bulk_response(&payload, docs.len());
        if let BulkOutcome::Rejected { failed, reason } = &outcome {
            warn!(index = %self.index, failed, reason = %reason, "bulk items rejected");
        }
        Ok(outcome)
    }
}

/// NDJSON body: an `index` action line followed by the document line, per document.
pub fn build_bulk_body(index: &str, docs: &[IndexDocument]) -> Result<String> {
    let mut body = String::new();
    for doc in docs {
        let action = json!({ "index": { "_index": index, "_id": doc.id } });
        body.push_str(&serde_json::to_string(&action).map_err(EtlError::serialization)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(doc).map_err(EtlError::serialization)?);
        body.push('\n');
    }
    Ok(body)
}

/// Interpret a successful `_bulk` answer.
pub fn parse_bulk_response(payload: &Value, submitted: usize) -> BulkOutcome {
    let items = payload
        .get("items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    if !payload.get("errors").and_then(Value::as_bool).unwrap_or(false) {
        let indexed = if items.is_empty() { submitted } else { items.len() };
        return BulkOutcome::Written { indexed };
    }

    let errors: Vec<&Value> = items
        .iter()
        .filter_map(|item| item.as_object()?.values().next())
        .filter_map(|result| result.get("error"))
        .collect();

    match errors.first() {
        None => BulkOutcome::Written {
            indexed: items.len(),
        },
        Some(first) => BulkOutcome::Rejected {
            failed: errors.len(),
            reason: describe_error(first),
        },
    }
}

fn describe_error(error: &Value) -> String {
    let kind = error.get("type").and_then(Value::as_str);
    let reason = error.get("reason").and_then(Value::as_str);
    match (kind, reason) {
        (Some(kind), Some(reason)) => format!("{}: {}", kind, reason),
        (Some(kind), None) => kind.to_string(),
        (None, Some(reason)) => reason.to_string(),
        (None, None) => error.to_string(),
    }
}

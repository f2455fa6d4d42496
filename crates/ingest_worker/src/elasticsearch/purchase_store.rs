use async_trait::async_trait;
use common::domain::{
    AggregateContribution, AggregateSpace, BulkDocument, BulkItemFailure, BulkWriteInput,
    BulkWriteOutcome, ConditionalUpsertInput, PurchaseStore, StoreError, StoreResult, StoreSpace,
};
use common::elasticsearch::ElasticsearchClient;
use reqwest::{header::CONTENT_TYPE, Method, Response, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Accumulate into an existing seller aggregate; the country set only grows
const SELLER_ACCUMULATE_SCRIPT: &str = "\
ctx._source.purchase_count += params.purchase_count; \
ctx._source.total_revenue_usd = Math.round((ctx._source.total_revenue_usd + params.revenue_usd) * 100.0) / 100.0; \
if (params.country_code != null) { \
  if (ctx._source.countries_seen == null) { ctx._source.countries_seen = []; } \
  if (!ctx._source.countries_seen.contains(params.country_code)) { ctx._source.countries_seen.add(params.country_code); } \
}";

const COUNTRY_ACCUMULATE_SCRIPT: &str = "\
ctx._source.purchase_count += params.purchase_count; \
ctx._source.revenue_usd = Math.round((ctx._source.revenue_usd + params.revenue_usd) * 100.0) / 100.0;";

#[derive(Debug, Clone)]
pub struct ElasticsearchIndices {
    pub purchases: String,
    pub sellers: String,
    pub countries: String,
}

impl ElasticsearchIndices {
    pub fn index(&self, space: StoreSpace) -> &str {
        match space {
            StoreSpace::Purchases => &self.purchases,
            StoreSpace::Sellers => &self.sellers,
            StoreSpace::Countries => &self.countries,
        }
    }
}

impl Default for ElasticsearchIndices {
    fn default() -> Self {
        Self {
            purchases: "purchases".to_string(),
            sellers: "seller_aggregates".to_string(),
            countries: "country_aggregates".to_string(),
        }
    }
}

#[derive(Serialize)]
struct ScriptParams<'a> {
    purchase_count: u64,
    #[serde(with = "rust_decimal::serde::float")]
    revenue_usd: Decimal,
    country_code: Option<&'a str>,
}

#[derive(Serialize)]
struct Script<'a> {
    lang: &'static str,
    source: &'static str,
    params: ScriptParams<'a>,
}

#[derive(Serialize)]
struct UpdateRequest<'a> {
    script: Script<'a>,
    upsert: &'a serde_json::Value,
}

/// Body of a scripted upsert: seed the document if absent, otherwise run the script
pub(crate) fn update_body(
    space: AggregateSpace,
    initial_document: &serde_json::Value,
    contribution: &AggregateContribution,
) -> StoreResult<serde_json::Value> {
    let source = match space {
        AggregateSpace::Seller => SELLER_ACCUMULATE_SCRIPT,
        AggregateSpace::Country => COUNTRY_ACCUMULATE_SCRIPT,
    };

    let request = UpdateRequest {
        script: Script {
            lang: "painless",
            source,
            params: ScriptParams {
                purchase_count: contribution.purchase_count,
                revenue_usd: contribution.revenue_usd,
                country_code: contribution.country_code.as_deref(),
            },
        },
        upsert: initial_document,
    };

    Ok(serde_json::to_value(request)?)
}

/// NDJSON body of a `_bulk` request with one `index` action per document
pub(crate) fn bulk_body(index: &str, documents: &[BulkDocument]) -> StoreResult<String> {
    let mut body = String::new();
    for doc in documents {
        let action = serde_json::json!({ "index": { "_index": index, "_id": doc.key } });
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&doc.document)?);
        body.push('\n');
    }
    Ok(body)
}

#[derive(Deserialize)]
struct BulkResponse {
    items: Vec<HashMap<String, BulkResponseItem>>,
}

#[derive(Deserialize)]
struct BulkResponseItem {
    status: u16,
    #[serde(default)]
    error: Option<ErrorCause>,
}

#[derive(Deserialize)]
struct ErrorCause {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

impl ErrorCause {
    fn describe(&self) -> String {
        match (&self.kind, &self.reason) {
            (Some(kind), Some(reason)) => format!("{kind}: {reason}"),
            (Some(text), None) | (None, Some(text)) => text.clone(),
            (None, None) => "unknown error".to_string(),
        }
    }
}

fn item_error(key: &str, status: u16, reason: String) -> StoreError {
    if status == StatusCode::CONFLICT.as_u16() {
        StoreError::VersionConflict {
            key: key.to_string(),
        }
    } else {
        StoreError::Rejected { status, reason }
    }
}

/// Map a `_bulk` response onto the submitted keys; items are reported in request order
pub(crate) fn bulk_outcome(keys: &[String], body: &[u8]) -> StoreResult<BulkWriteOutcome> {
    let response: BulkResponse = serde_json::from_slice(body)
        .map_err(|e| StoreError::MalformedResponse(e.to_string()))?;

    if response.items.len() != keys.len() {
        return Err(StoreError::MalformedResponse(format!(
            "bulk response has {} items for {} documents",
            response.items.len(),
            keys.len()
        )));
    }

    let mut outcome = BulkWriteOutcome::default();
    for (key, item) in keys.iter().zip(response.items) {
        let item = item.into_values().next().ok_or_else(|| {
            StoreError::MalformedResponse(format!("empty bulk item for key {key}"))
        })?;

        match item.error {
            None if (200..300).contains(&item.status) => outcome.succeeded += 1,
            error => {
                let reason = error
                    .map(|cause| cause.describe())
                    .unwrap_or_else(|| format!("status {}", item.status));
                outcome.failures.push(BulkItemFailure {
                    key: key.clone(),
                    error: item_error(key, item.status, reason),
                });
            }
        }
    }

    Ok(outcome)
}

/// Best-effort reason from an Elasticsearch error body
fn error_reason(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => match &value["error"] {
            serde_json::Value::String(reason) => reason.clone(),
            serde_json::Value::Object(_) => {
                let kind = value["error"]["type"].as_str().unwrap_or("error");
                let reason = value["error"]["reason"].as_str().unwrap_or_default();
                format!("{kind}: {reason}")
            }
            _ => body.to_string(),
        },
        Err(_) => body.to_string(),
    }
}

async fn rejection(key: &str, response: Response) -> StoreError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    item_error(key, status.as_u16(), error_reason(&body))
}

/// Purchase store backed by Elasticsearch indices
pub struct ElasticsearchPurchaseStore {
    client: Arc<ElasticsearchClient>,
    indices: ElasticsearchIndices,
    retry_on_conflict: u32,
}

impl ElasticsearchPurchaseStore {
    pub fn new(
        client: Arc<ElasticsearchClient>,
        indices: ElasticsearchIndices,
        retry_on_conflict: u32,
    ) -> Self {
        Self {
            client,
            indices,
            retry_on_conflict,
        }
    }

    /// Fetch a stored document source by key
    pub async fn get_document(
        &self,
        space: StoreSpace,
        key: &str,
    ) -> StoreResult<Option<serde_json::Value>> {
        let url = self
            .client
            .endpoint([self.indices.index(space), "_doc", key])?;
        let response = self.client.request(Method::GET, url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(rejection(key, response).await);
        }

        let mut body: serde_json::Value = response.json().await?;
        Ok(Some(body["_source"].take()))
    }

    /// Make recent writes to a space visible to reads
    pub async fn refresh(&self, space: StoreSpace) -> StoreResult<()> {
        let index = self.indices.index(space);
        let url = self.client.endpoint([index, "_refresh"])?;
        let response = self.client.request(Method::POST, url).send().await?;

        if !response.status().is_success() {
            return Err(rejection(index, response).await);
        }
        Ok(())
    }
}

#[async_trait]
impl PurchaseStore for ElasticsearchPurchaseStore {
    #[instrument(skip(self, input), fields(space = %input.space, key = %input.key))]
    async fn conditional_upsert(&self, input: ConditionalUpsertInput) -> StoreResult<()> {
        let index = self.indices.index(input.space.into());
        let mut url = self
            .client
            .endpoint([index, "_update", input.key.as_str()])?;
        url.query_pairs_mut()
            .append_pair("retry_on_conflict", &self.retry_on_conflict.to_string());

        let body = update_body(input.space, &input.initial_document, &input.contribution)?;
        let response = self
            .client
            .request(Method::POST, url)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let err = rejection(&input.key, response).await;
            warn!(error = %err, "conditional upsert rejected");
            return Err(err);
        }

        debug!("conditional upsert applied");
        Ok(())
    }

    #[instrument(skip(self, input), fields(space = ?input.space, documents = input.documents.len()))]
    async fn bulk_write(&self, input: BulkWriteInput) -> StoreResult<BulkWriteOutcome> {
        if input.documents.is_empty() {
            return Ok(BulkWriteOutcome::default());
        }

        let index = self.indices.index(input.space);
        let body = bulk_body(index, &input.documents)?;
        let url = self.client.endpoint(["_bulk"])?;

        let response = self
            .client
            .request(Method::POST, url)
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(rejection(index, response).await);
        }

        let bytes = response.bytes().await?;
        let keys: Vec<String> = input.documents.into_iter().map(|doc| doc.key).collect();
        let outcome = bulk_outcome(&keys, &bytes)?;

        debug!(
            succeeded = outcome.succeeded,
            failed = outcome.failures.len(),
            "bulk request completed"
        );

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_seller_update_body() {
        let contribution = AggregateContribution {
            purchase_count: 1,
            revenue_usd: Decimal::new(1000, 2),
            country_code: Some("US".to_string()),
        };
        let seed = json!({ "seller_account": "foo", "purchase_count": 1 });

        let body = update_body(AggregateSpace::Seller, &seed, &contribution).unwrap();

        assert_eq!(body["script"]["lang"], "painless");
        assert!(body["script"]["source"]
            .as_str()
            .unwrap()
            .contains("countries_seen.add(params.country_code)"));
        assert_eq!(body["script"]["params"]["purchase_count"], 1);
        assert_eq!(body["script"]["params"]["revenue_usd"], json!(10.0));
        assert_eq!(body["script"]["params"]["country_code"], "US");
        assert_eq!(body["upsert"], seed);
    }

    #[test]
    fn test_country_update_body_has_no_country_set() {
        let contribution = AggregateContribution {
            purchase_count: 1,
            revenue_usd: Decimal::new(5, 1),
            country_code: None,
        };

        let body = update_body(AggregateSpace::Country, &json!({}), &contribution).unwrap();

        let source = body["script"]["source"].as_str().unwrap();
        assert!(source.contains("ctx._source.revenue_usd"));
        assert!(!source.contains("countries_seen"));
        assert!(body["script"]["params"]["country_code"].is_null());
    }

    #[test]
    fn test_bulk_body_is_ndjson() {
        let body = bulk_body(
            "purchases",
            &[
                BulkDocument {
                    key: "1700000000".to_string(),
                    document: json!({ "a": 1 }),
                },
                BulkDocument {
                    key: "1700000001.5".to_string(),
                    document: json!({ "a": 2 }),
                },
            ],
        )
        .unwrap();

        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(body.ends_with('\n'));
        let action: serde_json::Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(action["index"]["_index"], "purchases");
        assert_eq!(action["index"]["_id"], "1700000001.5");
        assert_eq!(lines[3], r#"{"a":2}"#);
    }

    #[test]
    fn test_bulk_outcome_maps_item_failures() {
        let keys: Vec<String> = ["1", "2", "3"].iter().map(|k| k.to_string()).collect();
        let response = json!({
            "took": 3,
            "errors": true,
            "items": [
                { "index": { "_id": "1", "status": 201 } },
                { "index": { "_id": "2", "status": 400, "error": {
                    "type": "mapper_parsing_exception",
                    "reason": "failed to parse field [amount_paid]"
                } } },
                { "index": { "_id": "3", "status": 409, "error": {
                    "type": "version_conflict_engine_exception",
                    "reason": "conflict"
                } } }
            ]
        });

        let outcome = bulk_outcome(&keys, response.to_string().as_bytes()).unwrap();

        assert_eq!(outcome.succeeded, 1);
        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(outcome.failures[0].key, "2");
        assert_eq!(
            outcome.failures[0].error,
            StoreError::Rejected {
                status: 400,
                reason: "mapper_parsing_exception: failed to parse field [amount_paid]"
                    .to_string()
            }
        );
        assert_eq!(
            outcome.failures[1].error,
            StoreError::VersionConflict {
                key: "3".to_string()
            }
        );
    }

    #[test]
    fn test_bulk_outcome_rejects_mismatched_item_count() {
        let keys = vec!["1".to_string(), "2".to_string()];
        let response = json!({ "errors": false, "items": [ { "index": { "status": 201 } } ] });

        let err = bulk_outcome(&keys, response.to_string().as_bytes()).unwrap_err();

        assert!(matches!(err, StoreError::MalformedResponse(_)));
    }

    #[test]
    fn test_error_reason_extraction() {
        assert_eq!(
            error_reason(r#"{"error":{"type":"index_closed_exception","reason":"closed"},"status":400}"#),
            "index_closed_exception: closed"
        );
        assert_eq!(error_reason(r#"{"error":"no handler"}"#), "no handler");
        assert_eq!(error_reason("gateway timeout"), "gateway timeout");
    }

    #[test]
    fn test_indices_per_space() {
        let indices = ElasticsearchIndices::default();
        assert_eq!(indices.index(StoreSpace::Purchases), "purchases");
        assert_eq!(indices.index(StoreSpace::Sellers), "seller_aggregates");
        assert_eq!(indices.index(StoreSpace::Countries), "country_aggregates");
    }
}

//! JSON-LD schema loading and query construction.
//!
//! A request names a credential by `(context URL, type, field)`. The query
//! a circuit understands instead carries a schema hash and a claim path
//! key, both derived here from the schema document.

use alloy::primitives::keccak256;
use ark_ff::PrimeField;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::{FetchError, RetryPolicy};
use crate::error::VerifyError;
use crate::protocol::field::Fr;
use crate::protocol::hash;
use crate::protocol::query::{Operator, Query};

const NUMERIC_TYPES: &[&str] = &[
    "http://www.w3.org/2001/XMLSchema#integer",
    "http://www.w3.org/2001/XMLSchema#nonNegativeInteger",
    "http://www.w3.org/2001/XMLSchema#positiveInteger",
    "http://www.w3.org/2001/XMLSchema#decimal",
    "http://www.w3.org/2001/XMLSchema#double",
    "http://www.w3.org/2001/XMLSchema#dateTime",
];

#[async_trait]
pub trait SchemaLoader: Send + Sync {
    async fn load(&self, uri: &str) -> Result<Arc<Value>, VerifyError>;
}

/// Fetches schema documents over HTTP(S), resolving `ipfs://` through a
/// gateway. Documents are cached for the life of the process.
pub struct HttpSchemaLoader {
    client: reqwest::Client,
    ipfs_gateway: String,
    retry: RetryPolicy,
    cache: DashMap<String, Arc<Value>>,
}

impl HttpSchemaLoader {
    pub fn new(ipfs_gateway: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            client: reqwest::Client::new(),
            ipfs_gateway: ipfs_gateway.into().trim_end_matches('/').to_string(),
            retry,
            cache: DashMap::new(),
        }
    }

    pub fn resolve_url(&self, uri: &str) -> Result<String, VerifyError> {
        if let Some(cid) = uri.strip_prefix("ipfs://") {
            return Ok(format!("{}/ipfs/{}", self.ipfs_gateway, cid));
        }
        if uri.starts_with("https://") || uri.starts_with("http://") {
            return Ok(uri.to_string());
        }
        Err(VerifyError::SchemaFetch(format!("unsupported schema URI {:?}", uri)))
    }
}

#[async_trait]
impl SchemaLoader for HttpSchemaLoader {
    async fn load(&self, uri: &str) -> Result<Arc<Value>, VerifyError> {
        if let Some(document) = self.cache.get(uri) {
            return Ok(Arc::clone(document.value()));
        }

        let url = self.resolve_url(uri)?;
        let client = &self.client;
        let target = url.as_str();
        let document = self
            .retry
            .run("schema fetch", || async move {
                let response = client
                    .get(target)
                    .send()
                    .await
                    .map_err(|e| FetchError::Transient(e.to_string()))?;
                let status = response.status();
                if status.is_server_error() {
                    return Err(FetchError::Transient(format!("HTTP {}", status)));
                }
                if !status.is_success() {
                    return Err(FetchError::Permanent(format!("HTTP {}", status)));
                }
                response
                    .json::<Value>()
                    .await
                    .map_err(|e| FetchError::Permanent(format!("invalid JSON: {}", e)))
            })
            .await
            .map_err(|reason| VerifyError::SchemaFetch(format!("{}: {}", url, reason)))?;

        tracing::info!(schema = %uri, "Loaded schema document");
        let document = Arc::new(document);
        self.cache.insert(uri.to_string(), Arc::clone(&document));
        Ok(document)
    }
}

/// A query as a person writes it, before it is bound to a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialQuery {
    pub context: String,
    pub credential_type: String,
    pub field: String,
    pub operator: Operator,
    pub values: Vec<Fr>,
}

/// A credential field as defined by a schema document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDefinition {
    pub type_iri: String,
    pub field_iri: String,
    pub datatype: Option<String>,
}

impl FieldDefinition {
    /// Finds `field` inside the scoped context of `credential_type`.
    pub fn locate(document: &Value, credential_type: &str, field: &str) -> Result<Self, VerifyError> {
        let contexts = context_objects(document);
        let type_def = contexts
            .iter()
            .find_map(|ctx| ctx.get(credential_type))
            .and_then(Value::as_object)
            .ok_or_else(|| VerifyError::SchemaFetch(format!("type {} is not defined", credential_type)))?;

        let type_iri = type_def
            .get("@id")
            .and_then(Value::as_str)
            .ok_or_else(|| VerifyError::SchemaFetch(format!("type {} has no @id", credential_type)))?;

        let scoped = type_def.get("@context").and_then(Value::as_object);
        let mut scopes: Vec<&Map<String, Value>> = scoped.into_iter().collect();
        scopes.extend(contexts.iter().copied());

        let field_def = scoped
            .and_then(|ctx| ctx.get(field))
            .ok_or_else(|| {
                VerifyError::SchemaFetch(format!("field {} is not defined on {}", field, credential_type))
            })?;

        let (field_term, datatype) = match field_def {
            Value::String(iri) => (iri.as_str(), None),
            Value::Object(def) => (
                def.get("@id").and_then(Value::as_str).ok_or_else(|| {
                    VerifyError::SchemaFetch(format!("field {} has no @id", field))
                })?,
                def.get("@type").and_then(Value::as_str),
            ),
            _ => return Err(VerifyError::SchemaFetch(format!("field {} is not a term definition", field))),
        };

        Ok(Self {
            type_iri: expand(type_iri, &scopes),
            field_iri: expand(field_term, &scopes),
            datatype: datatype.map(|t| expand(t, &scopes)),
        })
    }

    pub fn is_numeric(&self) -> bool {
        self.datatype
            .as_deref()
            .map_or(false, |t| NUMERIC_TYPES.contains(&t))
    }
}

fn context_objects(document: &Value) -> Vec<&Map<String, Value>> {
    match document.get("@context") {
        Some(Value::Object(ctx)) => vec![ctx],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_object).collect(),
        _ => Vec::new(),
    }
}

/// Expands a compact IRI (`prefix:suffix`) using the first scope that
/// defines the prefix. Absolute IRIs and unknown prefixes are kept.
fn expand(term: &str, scopes: &[&Map<String, Value>]) -> String {
    let Some((prefix, suffix)) = term.split_once(':') else {
        return term.to_string();
    };
    if suffix.starts_with("//") {
        return term.to_string();
    }
    scopes
        .iter()
        .find_map(|ctx| ctx.get(prefix).and_then(Value::as_str))
        .map(|base| format!("{}{}", base, suffix))
        .unwrap_or_else(|| term.to_string())
}

/// Schema hash of a credential type: the last 16 bytes of the keccak digest
/// of `<context>#<type>`, read little-endian.
pub fn schema_hash(context: &str, credential_type: &str) -> Fr {
    let digest = keccak256(format!("{}#{}", context, credential_type).as_bytes());
    Fr::from_le_bytes_mod_order(&digest.as_slice()[16..])
}

fn iri_to_field(iri: &str) -> Fr {
    Fr::from_be_bytes_mod_order(keccak256(iri.as_bytes()).as_slice())
}

/// Binds a credential query to its schema.
pub async fn build_query(loader: &dyn SchemaLoader, request: &CredentialQuery) -> Result<Query, VerifyError> {
    let document = loader.load(&request.context).await?;
    let field = FieldDefinition::locate(&document, &request.credential_type, &request.field)?;

    if request.operator.is_ordering() && !field.is_numeric() {
        return Err(VerifyError::InvalidQuery(format!(
            "{} needs a numeric field, {} is {}",
            request.operator,
            request.field,
            field.datatype.as_deref().unwrap_or("untyped")
        )));
    }

    let claim_path_key = hash::hash(&[iri_to_field(&field.type_iri), iri_to_field(&field.field_iri)]);
    Query::new(
        schema_hash(&request.context, &request.credential_type),
        claim_path_key,
        request.operator,
        request.values.clone(),
    )
}

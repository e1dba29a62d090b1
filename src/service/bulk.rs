//! Bulk service: run sub-operations in declaration order, honoring
//! `failOnErrors`, resolving `bulkId` references to the ids minted within
//! the same request.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use serde_json::Value;

use crate::error::{ScimError, ScimResult};
use crate::resource::RequestContext;

use super::Services;
use super::create::CreateRequest;
use super::delete::DeleteRequest;
use super::patch::PatchRequest;
use super::replace::ReplaceRequest;

/// Schema URN of the BulkRequest message.
pub const BULK_REQUEST_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:BulkRequest";
/// Schema URN of the BulkResponse message.
pub const BULK_RESPONSE_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:BulkResponse";

/// Prefix marking a reference to a resource created earlier in the same
/// bulk request.
const BULK_ID_PREFIX: &str = "bulkId:";

pub struct BulkService {
    /// Per-type service bundles, keyed by endpoint segment (lowercase,
    /// without the leading slash)
    pub services: HashMap<String, Arc<Services>>,
    pub max_operations: usize,
}

pub struct BulkOperationResult {
    pub method: String,
    pub bulk_id: Option<String>,
    pub location: Option<String>,
    pub version: Option<String>,
    pub status: u16,
    pub response: Option<Value>,
}

pub struct BulkResponse {
    pub operations: Vec<BulkOperationResult>,
}

impl BulkService {
    pub async fn bulk(&self, ctx: &RequestContext, body: &Value) -> ScimResult<BulkResponse> {
        let declares_bulk = body
            .get("schemas")
            .and_then(Value::as_array)
            .is_some_and(|schemas| {
                schemas
                    .iter()
                    .any(|urn| urn.as_str() == Some(BULK_REQUEST_SCHEMA))
            });
        if !declares_bulk {
            return Err(ScimError::invalid_syntax(format!(
                "bulk request must declare the {} schema",
                BULK_REQUEST_SCHEMA
            )));
        }
        let operations = body
            .get("Operations")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ScimError::invalid_syntax("bulk request must carry an Operations array")
            })?;
        if operations.len() > self.max_operations {
            return Err(ScimError::TooMany(format!(
                "bulk request carries {} operations, the limit is {}",
                operations.len(),
                self.max_operations
            )));
        }
        let fail_on_errors = body
            .get("failOnErrors")
            .and_then(Value::as_u64)
            .map(|v| v as usize);

        let mut results = Vec::new();
        let mut minted: HashMap<String, String> = HashMap::new();
        let mut errors = 0usize;

        for operation in operations {
            let result = self.run_operation(ctx, operation, &minted).await;
            match result {
                Ok((result, bulk_binding)) => {
                    if let Some((bulk_id, id)) = bulk_binding {
                        minted.insert(bulk_id, id);
                    }
                    if result.status >= 400 {
                        errors += 1;
                    }
                    results.push(result);
                }
                Err(err) => {
                    errors += 1;
                    results.push(BulkOperationResult {
                        method: operation
                            .get("method")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        bulk_id: operation
                            .get("bulkId")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        location: None,
                        version: None,
                        status: err.http_status(),
                        response: Some(err.to_resource()),
                    });
                }
            }
            if let Some(limit) = fail_on_errors {
                if errors >= limit {
                    debug!(
                        "request {}: bulk aborted after {} errors",
                        ctx.request_id(),
                        errors
                    );
                    break;
                }
            }
        }
        Ok(BulkResponse { operations: results })
    }

    async fn run_operation(
        &self,
        ctx: &RequestContext,
        operation: &Value,
        minted: &HashMap<String, String>,
    ) -> ScimResult<(BulkOperationResult, Option<(String, String)>)> {
        let method = operation
            .get("method")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ScimError::invalid_syntax("bulk operation requires a 'method' field")
            })?
            .to_uppercase();
        let path = operation
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| ScimError::invalid_syntax("bulk operation requires a 'path' field"))?;
        let path = resolve_bulk_ids_in_text(path, minted)?;
        let bulk_id = operation
            .get("bulkId")
            .and_then(Value::as_str)
            .map(str::to_string);
        let expected_version = operation
            .get("version")
            .and_then(Value::as_str)
            .map(str::to_string);
        let data = operation
            .get("data")
            .map(|data| resolve_bulk_ids(data, minted))
            .transpose()?;

        let (endpoint, resource_id) = split_bulk_path(&path)?;
        let services = self.services.get(&endpoint.to_lowercase()).ok_or_else(|| {
            ScimError::not_found(format!("no resource type is served at /{}", endpoint))
        })?;

        let need_data = || {
            data.clone()
                .ok_or_else(|| ScimError::invalid_syntax("bulk operation requires 'data'"))
        };

        match (method.as_str(), resource_id) {
            ("POST", None) => {
                let response = services
                    .create
                    .create(ctx, CreateRequest { body: need_data()? })
                    .await?;
                let id = response.resource.id().unwrap_or_default();
                let binding = bulk_id.clone().map(|bulk| (bulk, id));
                Ok((
                    BulkOperationResult {
                        method: method.clone(),
                        bulk_id,
                        location: response.location,
                        version: response.version,
                        status: 201,
                        response: None,
                    },
                    binding,
                ))
            }
            ("PUT", Some(id)) => {
                let response = services
                    .replace
                    .replace(
                        ctx,
                        ReplaceRequest {
                            resource_id: id.to_string(),
                            body: need_data()?,
                            expected_version,
                        },
                    )
                    .await?;
                Ok((
                    BulkOperationResult {
                        method: method.clone(),
                        bulk_id,
                        location: response.location,
                        version: response.version,
                        status: 200,
                        response: None,
                    },
                    None,
                ))
            }
            ("PATCH", Some(id)) => {
                let response = services
                    .patch
                    .patch(
                        ctx,
                        PatchRequest {
                            resource_id: id.to_string(),
                            body: need_data()?,
                            expected_version,
                        },
                    )
                    .await?;
                Ok((
                    BulkOperationResult {
                        method: method.clone(),
                        bulk_id,
                        location: response.location,
                        version: response.version,
                        status: 200,
                        response: None,
                    },
                    None,
                ))
            }
            ("DELETE", Some(id)) => {
                services
                    .delete
                    .delete(
                        ctx,
                        DeleteRequest {
                            resource_id: id.to_string(),
                            expected_version,
                        },
                    )
                    .await?;
                Ok((
                    BulkOperationResult {
                        method: method.clone(),
                        bulk_id,
                        location: None,
                        version: None,
                        status: 204,
                        response: None,
                    },
                    None,
                ))
            }
            _ => Err(ScimError::invalid_syntax(format!(
                "bulk operation '{} {}' is not supported",
                method, path
            ))),
        }
    }
}

fn split_bulk_path(path: &str) -> ScimResult<(String, Option<String>)> {
    let trimmed = path.trim_start_matches('/');
    let mut parts = trimmed.splitn(2, '/');
    let endpoint = parts
        .next()
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| ScimError::invalid_syntax(format!("malformed bulk path '{}'", path)))?;
    Ok((
        endpoint.to_string(),
        parts.next().map(str::to_string),
    ))
}

/// Replace `bulkId:xyz` references in every string of the value.
fn resolve_bulk_ids(value: &Value, minted: &HashMap<String, String>) -> ScimResult<Value> {
    Ok(match value {
        Value::String(text) => Value::String(resolve_bulk_ids_in_text(text, minted)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_bulk_ids(item, minted))
                .collect::<ScimResult<_>>()?,
        ),
        Value::Object(object) => Value::Object(
            object
                .iter()
                .map(|(key, item)| Ok((key.clone(), resolve_bulk_ids(item, minted)?)))
                .collect::<ScimResult<_>>()?,
        ),
        other => other.clone(),
    })
}

fn resolve_bulk_ids_in_text(
    text: &str,
    minted: &HashMap<String, String>,
) -> ScimResult<String> {
    let Some(rest) = text.strip_prefix(BULK_ID_PREFIX) else {
        return Ok(text.to_string());
    };
    match minted.get(rest) {
        Some(id) => Ok(id.clone()),
        None => Err(ScimError::invalid_value(format!(
            "bulkId '{}' does not refer to a resource created in this request",
            rest
        ))),
    }
}

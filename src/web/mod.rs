//! HTTP surface: RFC 7644 endpoints over the service layer.
//!
//! Handlers are thin: they parse wire parameters, call a service, and
//! render the result as `application/scim+json`. All protocol logic lives
//! below the service boundary.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};

use crate::error::{ScimError, ScimResult};
use crate::json as scim_json;
use crate::resource::RequestContext;
use crate::schema::SchemaRegistry;
use crate::service::{
    BulkService, CreateRequest, DeleteRequest, GetRequest, PatchRequest, QueryRequest,
    QueryResponse, ReplaceRequest, Services,
};

/// Content type for all SCIM payloads.
pub const SCIM_CONTENT_TYPE: &str = "application/scim+json";
/// Schema URN of the ListResponse message.
pub const LIST_RESPONSE_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:ListResponse";

/// Shared handler state.
pub struct AppState {
    pub registry: Arc<SchemaRegistry>,
    pub services: HashMap<String, Arc<Services>>,
    pub bulk: BulkService,
    pub max_results: usize,
    pub max_bulk_operations: usize,
}

/// Build the SCIM router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ServiceProviderConfig", get(service_provider_config))
        .route("/Schemas", get(list_schemas))
        .route("/Schemas/{id}", get(get_schema))
        .route("/ResourceTypes", get(list_resource_types))
        .route("/ResourceTypes/{name}", get(get_resource_type))
        .route("/Bulk", post(bulk))
        .route("/.search", post(search_all))
        .route("/{endpoint}", get(list_resources).post(create_resource))
        .route("/{endpoint}/.search", post(search_resources))
        .route(
            "/{endpoint}/{id}",
            get(get_resource)
                .put(replace_resource)
                .patch(patch_resource)
                .delete(delete_resource),
        )
        .with_state(state)
}

impl IntoResponse for ScimError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        scim_body(status, self.to_resource(), None, None)
    }
}

fn scim_body(
    status: StatusCode,
    body: Value,
    etag: Option<String>,
    location: Option<String>,
) -> Response {
    let mut response = (status, Json(body)).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static(SCIM_CONTENT_TYPE),
    );
    if let Some(etag) = etag.and_then(|v| header::HeaderValue::from_str(&v).ok()) {
        headers.insert(header::ETAG, etag);
    }
    if let Some(location) = location.and_then(|v| header::HeaderValue::from_str(&v).ok()) {
        headers.insert(header::LOCATION, location);
    }
    response
}

fn weak_etag(version: Option<&str>) -> Option<String> {
    version.map(|v| format!("W/\"{}\"", v))
}

/// Parse an `If-Match` header into the raw version form.
fn if_match_version(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::IF_MATCH)?.to_str().ok()?;
    let trimmed = value
        .trim()
        .trim_start_matches("W/")
        .trim_matches('"')
        .to_string();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}

fn services_for<'s>(state: &'s AppState, endpoint: &str) -> ScimResult<&'s Arc<Services>> {
    state.services.get(&endpoint.to_lowercase()).ok_or_else(|| {
        ScimError::not_found(format!("no resource type is served at /{}", endpoint))
    })
}

fn projection_from(params: &HashMap<String, String>) -> ScimResult<Option<crate::crud::Projection>> {
    let projection = crate::crud::Projection::parse(
        params.get("attributes").map(String::as_str),
        params.get("excludedAttributes").map(String::as_str),
    )?;
    Ok(if projection.is_empty() { None } else { Some(projection) })
}

fn query_request_from(params: &HashMap<String, String>) -> QueryRequest {
    let parse_usize = |key: &str| params.get(key).and_then(|v| v.parse::<usize>().ok());
    QueryRequest {
        filter: params.get("filter").cloned(),
        sort_by: params.get("sortBy").cloned(),
        sort_order: params.get("sortOrder").cloned(),
        start_index: parse_usize("startIndex"),
        count: parse_usize("count"),
        attributes: params.get("attributes").cloned(),
        excluded_attributes: params.get("excludedAttributes").cloned(),
    }
}

fn render_list_response(response: &QueryResponse) -> ScimResult<Value> {
    let mut resources = Vec::with_capacity(response.resources.len());
    for resource in &response.resources {
        resources.push(scim_json::serialize(resource, response.projection.as_ref())?);
    }
    Ok(json!({
        "schemas": [LIST_RESPONSE_SCHEMA],
        "totalResults": response.total_results,
        "startIndex": response.start_index,
        "itemsPerPage": response.items_per_page,
        "Resources": resources,
    }))
}

// ----- discovery endpoints -----

async fn service_provider_config(State(state): State<Arc<AppState>>) -> Response {
    let body = json!({
        "schemas": ["urn:ietf:params:scim:schemas:core:2.0:ServiceProviderConfig"],
        "documentationUri": "https://datatracker.ietf.org/doc/html/rfc7644",
        "patch": {"supported": true},
        "bulk": {
            "supported": true,
            "maxOperations": state.max_bulk_operations,
            "maxPayloadSize": 1_048_576
        },
        "filter": {"supported": true, "maxResults": state.max_results},
        "changePassword": {"supported": false},
        "sort": {"supported": true},
        "etag": {"supported": true},
        "authenticationSchemes": []
    });
    scim_body(StatusCode::OK, body, None, None)
}

async fn list_schemas(State(state): State<Arc<AppState>>) -> Result<Response, ScimError> {
    let schemas: Vec<Value> = state
        .registry
        .schemas()
        .map(|schema| serde_json::to_value(schema.as_ref()))
        .collect::<Result<_, _>>()?;
    let body = json!({
        "schemas": [LIST_RESPONSE_SCHEMA],
        "totalResults": schemas.len(),
        "startIndex": 1,
        "itemsPerPage": schemas.len(),
        "Resources": schemas,
    });
    Ok(scim_body(StatusCode::OK, body, None, None))
}

async fn get_schema(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ScimError> {
    let schema = state
        .registry
        .schema(&id)
        .ok_or_else(|| ScimError::not_found(format!("schema '{}' is not registered", id)))?;
    Ok(scim_body(
        StatusCode::OK,
        serde_json::to_value(schema.as_ref())?,
        None,
        None,
    ))
}

async fn list_resource_types(State(state): State<Arc<AppState>>) -> Result<Response, ScimError> {
    let types: Vec<Value> = state
        .registry
        .resource_types()
        .map(|rt| serde_json::to_value(rt.as_ref()))
        .collect::<Result<_, _>>()?;
    let body = json!({
        "schemas": [LIST_RESPONSE_SCHEMA],
        "totalResults": types.len(),
        "startIndex": 1,
        "itemsPerPage": types.len(),
        "Resources": types,
    });
    Ok(scim_body(StatusCode::OK, body, None, None))
}

async fn get_resource_type(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, ScimError> {
    let resource_type = state
        .registry
        .resource_type(&name)
        .ok_or_else(|| ScimError::not_found(format!("resource type '{}' is not registered", name)))?;
    Ok(scim_body(
        StatusCode::OK,
        serde_json::to_value(resource_type.as_ref())?,
        None,
        None,
    ))
}

// ----- resource endpoints -----

async fn create_resource(
    State(state): State<Arc<AppState>>,
    Path(endpoint): Path<String>,
    Json(body): Json<Value>,
) -> Result<Response, ScimError> {
    let services = services_for(&state, &endpoint)?;
    let ctx = RequestContext::new();
    let response = services.create.create(&ctx, CreateRequest { body }).await?;
    let rendered = scim_json::serialize(&response.resource, None)?;
    Ok(scim_body(
        StatusCode::CREATED,
        rendered,
        weak_etag(response.version.as_deref()),
        response.location,
    ))
}

async fn get_resource(
    State(state): State<Arc<AppState>>,
    Path((endpoint, id)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ScimError> {
    let services = services_for(&state, &endpoint)?;
    let ctx = RequestContext::new();
    let projection = projection_from(&params)?;
    let response = services
        .get
        .get(
            &ctx,
            GetRequest {
                resource_id: id,
                projection: projection.clone(),
            },
        )
        .await?;
    let rendered = scim_json::serialize(&response.resource, projection.as_ref())?;
    Ok(scim_body(
        StatusCode::OK,
        rendered,
        weak_etag(response.version.as_deref()),
        response.location,
    ))
}

async fn list_resources(
    State(state): State<Arc<AppState>>,
    Path(endpoint): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ScimError> {
    let services = services_for(&state, &endpoint)?;
    let ctx = RequestContext::new();
    let response = services.query.query(&ctx, query_request_from(&params)).await?;
    Ok(scim_body(
        StatusCode::OK,
        render_list_response(&response)?,
        None,
        None,
    ))
}

async fn search_resources(
    State(state): State<Arc<AppState>>,
    Path(endpoint): Path<String>,
    Json(body): Json<Value>,
) -> Result<Response, ScimError> {
    let services = services_for(&state, &endpoint)?;
    let ctx = RequestContext::new();
    let request = QueryRequest::from_search_body(&body)?;
    let response = services.query.query(&ctx, request).await?;
    Ok(scim_body(
        StatusCode::OK,
        render_list_response(&response)?,
        None,
        None,
    ))
}

/// `POST /.search` across the default endpoint set runs the search against
/// every registered resource type and merges the pages in endpoint order.
async fn search_all(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Response, ScimError> {
    let ctx = RequestContext::new();
    let request = QueryRequest::from_search_body(&body)?;

    let mut endpoints: Vec<&String> = state.services.keys().collect();
    endpoints.sort();

    let mut total_results = 0;
    let mut resources = Vec::new();
    for endpoint in endpoints {
        let services = &state.services[endpoint];
        let response = services.query.query(&ctx, request.clone()).await?;
        total_results += response.total_results;
        for resource in &response.resources {
            resources.push(scim_json::serialize(resource, response.projection.as_ref())?);
        }
    }

    let body = json!({
        "schemas": [LIST_RESPONSE_SCHEMA],
        "totalResults": total_results,
        "startIndex": request.start_index.unwrap_or(1),
        "itemsPerPage": resources.len(),
        "Resources": resources,
    });
    Ok(scim_body(StatusCode::OK, body, None, None))
}

async fn replace_resource(
    State(state): State<Arc<AppState>>,
    Path((endpoint, id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ScimError> {
    let services = services_for(&state, &endpoint)?;
    let ctx = RequestContext::new();
    let response = services
        .replace
        .replace(
            &ctx,
            ReplaceRequest {
                resource_id: id,
                body,
                expected_version: if_match_version(&headers),
            },
        )
        .await?;
    let rendered = scim_json::serialize(&response.resource, None)?;
    Ok(scim_body(
        StatusCode::OK,
        rendered,
        weak_etag(response.version.as_deref()),
        response.location,
    ))
}

async fn patch_resource(
    State(state): State<Arc<AppState>>,
    Path((endpoint, id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ScimError> {
    let services = services_for(&state, &endpoint)?;
    let ctx = RequestContext::new();
    let response = services
        .patch
        .patch(
            &ctx,
            PatchRequest {
                resource_id: id,
                body,
                expected_version: if_match_version(&headers),
            },
        )
        .await?;
    let rendered = scim_json::serialize(&response.resource, None)?;
    Ok(scim_body(
        StatusCode::OK,
        rendered,
        weak_etag(response.version.as_deref()),
        response.location,
    ))
}

async fn delete_resource(
    State(state): State<Arc<AppState>>,
    Path((endpoint, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ScimError> {
    let services = services_for(&state, &endpoint)?;
    let ctx = RequestContext::new();
    services
        .delete
        .delete(
            &ctx,
            DeleteRequest {
                resource_id: id,
                expected_version: if_match_version(&headers),
            },
        )
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn bulk(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Response, ScimError> {
    let ctx = RequestContext::new();
    let response = state.bulk.bulk(&ctx, &body).await?;
    let operations: Vec<Value> = response
        .operations
        .iter()
        .map(|op| {
            let mut rendered = json!({
                "method": op.method,
                "status": op.status.to_string(),
            });
            if let Some(bulk_id) = &op.bulk_id {
                rendered["bulkId"] = json!(bulk_id);
            }
            if let Some(location) = &op.location {
                rendered["location"] = json!(location);
            }
            if let Some(version) = weak_etag(op.version.as_deref()) {
                rendered["version"] = json!(version);
            }
            if let Some(body) = &op.response {
                rendered["response"] = body.clone();
            }
            rendered
        })
        .collect();
    let body = json!({
        "schemas": [crate::service::bulk::BULK_RESPONSE_SCHEMA],
        "Operations": operations,
    });
    Ok(scim_body(StatusCode::OK, body, None, None))
}

//! Query service: validate the filter compiles, then delegate to the
//! database. Also backs `POST /.search`.

use std::sync::Arc;

use log::debug;
use serde_json::Value;

use crate::crud::params::{Pagination, Projection, Sort};
use crate::db::Database;
use crate::error::{ScimError, ScimResult};
use crate::expr::{AttrPath, Filter, compile_filter};
use crate::resource::{RequestContext, Resource};

/// Schema URN of the SearchRequest message.
pub const SEARCH_REQUEST_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:SearchRequest";

/// Default page size when the request does not carry `count`.
pub const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Default, Clone)]
pub struct QueryRequest {
    pub filter: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub start_index: Option<usize>,
    pub count: Option<usize>,
    pub attributes: Option<String>,
    pub excluded_attributes: Option<String>,
}

impl QueryRequest {
    /// Parse a SearchRequest message body.
    pub fn from_search_body(body: &Value) -> ScimResult<Self> {
        let declares_search = body
            .get("schemas")
            .and_then(Value::as_array)
            .is_some_and(|schemas| {
                schemas
                    .iter()
                    .any(|urn| urn.as_str() == Some(SEARCH_REQUEST_SCHEMA))
            });
        if !declares_search {
            return Err(ScimError::invalid_syntax(format!(
                "search request must declare the {} schema",
                SEARCH_REQUEST_SCHEMA
            )));
        }
        let string_list = |key: &str| -> Option<String> {
            body.get(key).and_then(Value::as_array).map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(",")
            })
        };
        Ok(Self {
            filter: body.get("filter").and_then(Value::as_str).map(str::to_string),
            sort_by: body.get("sortBy").and_then(Value::as_str).map(str::to_string),
            sort_order: body
                .get("sortOrder")
                .and_then(Value::as_str)
                .map(str::to_string),
            start_index: body
                .get("startIndex")
                .and_then(Value::as_u64)
                .map(|v| v as usize),
            count: body.get("count").and_then(Value::as_u64).map(|v| v as usize),
            attributes: string_list("attributes"),
            excluded_attributes: string_list("excludedAttributes"),
        })
    }
}

#[derive(Debug)]
pub struct QueryResponse {
    pub total_results: usize,
    pub start_index: usize,
    pub items_per_page: usize,
    pub resources: Vec<Resource>,
    pub projection: Option<Projection>,
}

pub struct QueryService {
    pub database: Arc<dyn Database>,
    /// Upper bound on page size, from the service provider configuration
    pub max_results: usize,
}

impl QueryService {
    pub async fn query(
        &self,
        ctx: &RequestContext,
        request: QueryRequest,
    ) -> ScimResult<QueryResponse> {
        let filter = match &request.filter {
            Some(text) if !text.trim().is_empty() => Some(compile_filter(text)?),
            _ => None,
        };
        let sort = Sort::parse(request.sort_by.as_deref(), request.sort_order.as_deref())?;
        let pagination = Pagination::new(
            request.start_index,
            request.count.map(|count| count.min(self.max_results)),
            DEFAULT_PAGE_SIZE.min(self.max_results),
        );
        let projection = Projection::parse(
            request.attributes.as_deref(),
            request.excluded_attributes.as_deref(),
        )?;
        let projection = if projection.is_empty() {
            None
        } else {
            Some(projection)
        };

        // Total results counts all matches, not just this page.
        let count_filter = filter
            .clone()
            .unwrap_or_else(|| Filter::Present(AttrPath::simple("id")));
        let total_results = self.database.count(ctx, &count_filter).await?;

        let resources = self
            .database
            .query(
                ctx,
                filter.as_ref(),
                sort.as_ref(),
                Some(&pagination),
                projection.as_ref(),
            )
            .await?;

        debug!(
            "request {}: query returned {} of {} resources",
            ctx.request_id(),
            resources.len(),
            total_results
        );
        Ok(QueryResponse {
            total_results,
            start_index: pagination.start_index,
            items_per_page: resources.len(),
            resources,
            projection,
        })
    }
}

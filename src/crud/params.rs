//! Request-time query parameters: projection, sorting, pagination.

use serde::{Deserialize, Serialize};

use crate::error::ScimResult;
use crate::expr::{AttrPath, compile_path};

/// Attribute projection from `attributes` / `excludedAttributes`.
///
/// Only one of the two lists should be populated; when both are, includes
/// win. Final `returned` enforcement happens in the response serializer;
/// the database layer treats projection as best-effort.
#[derive(Debug, Clone, Default)]
pub struct Projection {
    pub attributes: Vec<AttrPath>,
    pub excluded_attributes: Vec<AttrPath>,
}

impl Projection {
    /// Parse comma-separated attribute lists as sent on the wire.
    pub fn parse(
        attributes: Option<&str>,
        excluded_attributes: Option<&str>,
    ) -> ScimResult<Self> {
        Ok(Self {
            attributes: Self::parse_list(attributes)?,
            excluded_attributes: Self::parse_list(excluded_attributes)?,
        })
    }

    fn parse_list(list: Option<&str>) -> ScimResult<Vec<AttrPath>> {
        let Some(list) = list else {
            return Ok(Vec::new());
        };
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(compile_path)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.excluded_attributes.is_empty()
    }
}

/// Sort order for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    /// Parse the wire-level `sortOrder` value; anything other than
    /// `descending` sorts ascending, per RFC 7644.
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("descending") => Self::Descending,
            _ => Self::Ascending,
        }
    }
}

/// Sort specification from `sortBy` / `sortOrder`.
#[derive(Debug, Clone)]
pub struct Sort {
    pub by: AttrPath,
    pub order: SortOrder,
}

impl Sort {
    pub fn parse(sort_by: Option<&str>, sort_order: Option<&str>) -> ScimResult<Option<Self>> {
        match sort_by {
            Some(by) if !by.trim().is_empty() => Ok(Some(Self {
                by: compile_path(by.trim())?,
                order: SortOrder::parse(sort_order),
            })),
            _ => Ok(None),
        }
    }
}

/// Pagination window. `start_index` is 1-based per RFC 7644; values below 1
/// are normalized to 1.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub start_index: usize,
    pub count: usize,
}

impl Pagination {
    pub fn new(start_index: Option<usize>, count: Option<usize>, default_count: usize) -> Self {
        Self {
            start_index: start_index.unwrap_or(1).max(1),
            count: count.unwrap_or(default_count),
        }
    }

    /// The zero-based offset into the result set.
    pub fn offset(&self) -> usize {
        self.start_index - 1
    }
}

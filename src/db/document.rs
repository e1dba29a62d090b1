//! Document-store adapter for the database contract.
//!
//! The adapter owns everything SCIM-specific: lowering compiled filters
//! into backend query documents, resolving SCIM attribute paths to stored
//! field names, and mapping store outcomes onto the contract's error kinds.
//! The driver I/O itself is injected through the [`DocumentStore`] trait.
//!
//! Stored field naming: SCIM attribute names may contain characters that
//! are illegal in document stores (`$ref`, extension URNs with dots). The
//! adapter walks the attribute tree and consults per-attribute metadata for
//! a backend alias, falling back to the attribute's own name.
//!
//! At startup the adapter asks the store to index attributes whose
//! uniqueness is `server` or `global`, or that carry the `@DbIndex`
//! annotation. Index creation failures are logged as warnings and are not
//! fatal, matching the behavior expected of a secondary optimization.
//!
//! Like the in-memory implementation, `replace` and `delete` match on
//! `(id, meta.version)` and yield `preCondition` when no document matches.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde_json::{Map, Value, json};

use super::Database;
use crate::crud::params::{Pagination, Projection, Sort, SortOrder};
use crate::error::{ScimError, ScimResult};
use crate::expr::ast::{AttrPath, CompareOp, Filter, PathStep};
use crate::expr::eval::{PathEntry, resolve_entry};
use crate::json as scim_json;
use crate::resource::{RequestContext, Resource};
use crate::schema::{Attribute, AttributeType, ResourceType, SchemaRegistry, Uniqueness};

/// Pluggable driver for one backend collection.
///
/// Query documents use the conventional operator vocabulary (`$and`, `$or`,
/// `$nor`, `$eq`, `$ne`, `$gt`, `$ge`→`$gte`, `$lt`, `$lte`, `$regex`,
/// `$exists`, `$nin`, `$elemMatch`); sort is a `(field, ascending)` pair,
/// projection a `{field: 0|1}` document.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert_one(&self, document: Value) -> ScimResult<()>;
    async fn find_one(&self, query: Value, projection: Option<Value>)
    -> ScimResult<Option<Value>>;
    async fn find(
        &self,
        query: Value,
        sort: Option<(String, bool)>,
        skip: usize,
        limit: Option<usize>,
        projection: Option<Value>,
    ) -> ScimResult<Vec<Value>>;
    async fn count(&self, query: Value) -> ScimResult<usize>;
    async fn find_one_and_replace(&self, query: Value, document: Value)
    -> ScimResult<Option<Value>>;
    async fn find_one_and_delete(&self, query: Value) -> ScimResult<Option<Value>>;
    async fn create_index(&self, field: &str, unique: bool) -> ScimResult<()>;
}

/// Adapter options.
#[derive(Debug, Clone, Default)]
pub struct DocumentDbOptions {
    ignore_projection: bool,
}

impl DocumentDbOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ignore projection parameters and always fetch complete documents.
    /// Reasonable when downstream stages need the full resource.
    pub fn ignore_projection(mut self) -> Self {
        self.ignore_projection = true;
        self
    }
}

/// Database contract implementation over an injected document store.
pub struct DocumentDatabase<S: DocumentStore> {
    registry: Arc<SchemaRegistry>,
    resource_type: Arc<ResourceType>,
    store: S,
    options: DocumentDbOptions,
}

impl<S: DocumentStore> DocumentDatabase<S> {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        resource_type: Arc<ResourceType>,
        store: S,
        options: DocumentDbOptions,
    ) -> Self {
        Self {
            registry,
            resource_type,
            store,
            options,
        }
    }

    /// Create backend indexes for unique and `@DbIndex` attributes.
    /// Failures are logged and swallowed.
    pub async fn ensure_indexes(&self) {
        let mut fields = Vec::new();
        self.collect_index_fields(self.resource_type.super_attribute(), "", &mut fields);
        for (field, unique) in fields {
            match self.store.create_index(&field, unique).await {
                Ok(()) => info!(
                    "created {} index on {}.{}",
                    if unique { "unique" } else { "ordinary" },
                    self.resource_type.name,
                    field
                ),
                Err(err) => warn!(
                    "failed to create index on {}.{}: {}",
                    self.resource_type.name, field, err
                ),
            }
        }
    }

    fn collect_index_fields(
        &self,
        attr: &Arc<Attribute>,
        prefix: &str,
        out: &mut Vec<(String, bool)>,
    ) {
        for sub in &attr.sub_attributes {
            let segment = self
                .registry
                .db_alias(&sub.id)
                .unwrap_or(sub.name.as_str());
            let field = if prefix.is_empty() {
                segment.to_string()
            } else {
                format!("{}.{}", prefix, segment)
            };
            let unique = sub.uniqueness != Uniqueness::None;
            if unique || self.registry.has_annotation(&sub.id, "@DbIndex") {
                out.push((field.clone(), unique));
            }
            if sub.is_complex() {
                self.collect_index_fields(sub, &field, out);
            }
        }
    }

    /// Translate a compiled filter into a backend query document.
    pub fn translate(&self, filter: &Filter) -> ScimResult<Value> {
        self.translate_at(filter, self.resource_type.super_attribute(), true)
    }

    fn translate_at(
        &self,
        filter: &Filter,
        context: &Arc<Attribute>,
        at_root: bool,
    ) -> ScimResult<Value> {
        match filter {
            Filter::And(left, right) => Ok(json!({
                "$and": [
                    self.translate_at(left, context, at_root)?,
                    self.translate_at(right, context, at_root)?
                ]
            })),
            Filter::Or(left, right) => Ok(json!({
                "$or": [
                    self.translate_at(left, context, at_root)?,
                    self.translate_at(right, context, at_root)?
                ]
            })),
            Filter::Not(inner) => Ok(json!({
                "$nor": [self.translate_at(inner, context, at_root)?]
            })),
            Filter::Compare { path, op, value } => {
                self.translate_leaf(path, context, at_root, Some((*op, value)))
            }
            Filter::Present(path) => self.translate_leaf(path, context, at_root, None),
        }
    }

    fn translate_leaf(
        &self,
        path: &AttrPath,
        context: &Arc<Attribute>,
        at_root: bool,
        comparison: Option<(CompareOp, &Value)>,
    ) -> ScimResult<Value> {
        let (start, prefix, steps): (&Arc<Attribute>, String, &[PathStep]) = if at_root {
            match resolve_entry(path, &self.resource_type.schema, context).map_err(|err| {
                ScimError::invalid_filter(err.to_string())
            })? {
                PathEntry::Root(steps) => (context, String::new(), steps),
                PathEntry::Container(name, steps) => {
                    let container = context.sub_attribute(&name).ok_or_else(|| {
                        ScimError::invalid_filter(format!("no extension container '{}'", name))
                    })?;
                    let segment = self
                        .registry
                        .db_alias(&container.id)
                        .unwrap_or(container.name.as_str())
                        .to_string();
                    (container, segment, steps)
                }
            }
        } else {
            if path.schema_urn.is_some() {
                return Err(ScimError::invalid_filter(
                    "URN-qualified paths are not allowed inside value filters",
                ));
            }
            (context, String::new(), &path.steps)
        };
        self.path_condition(start, &prefix, steps, comparison)
    }

    fn path_condition(
        &self,
        context: &Arc<Attribute>,
        prefix: &str,
        steps: &[PathStep],
        comparison: Option<(CompareOp, &Value)>,
    ) -> ScimResult<Value> {
        let mut attr: Arc<Attribute> = Arc::clone(context);
        let mut field = prefix.to_string();

        for (index, step) in steps.iter().enumerate() {
            let sub = attr.sub_attribute(&step.name).cloned().ok_or_else(|| {
                ScimError::invalid_filter(format!(
                    "no attribute named '{}' under '{}'",
                    step.name, attr.name
                ))
            })?;
            let segment = self.registry.db_alias(&sub.id).unwrap_or(sub.name.as_str());
            if field.is_empty() {
                field = segment.to_string();
            } else {
                field = format!("{}.{}", field, segment);
            }
            let effective = match sub.element_attribute() {
                Some(elem) => Arc::clone(elem),
                None => Arc::clone(&sub),
            };

            if let Some(filter) = &step.filter {
                let mut parts =
                    vec![self.translate_at(filter, &effective, false)?];
                if index + 1 < steps.len() {
                    parts.push(self.path_condition(
                        &effective,
                        "",
                        &steps[index + 1..],
                        comparison,
                    )?);
                } else if let Some((op, value)) = comparison {
                    parts.push(self.element_condition(&effective, op, value)?);
                }
                let inner = if parts.len() == 1 {
                    parts.pop().unwrap_or(Value::Null)
                } else {
                    json!({"$and": parts})
                };
                return Ok(field_doc(field, json!({"$elemMatch": inner})));
            }
            attr = effective;
        }

        match comparison {
            Some((op, value)) => {
                let condition = self.leaf_condition(&attr, op, value)?;
                Ok(field_doc(field, condition))
            }
            None => Ok(field_doc(
                field,
                json!({"$exists": true, "$nin": [null, []]}),
            )),
        }
    }

    /// Condition applied to one element inside `$elemMatch` when the path
    /// ends at the filtered step, e.g. `emails[type eq "work"] co "x"`.
    fn element_condition(
        &self,
        element: &Arc<Attribute>,
        op: CompareOp,
        value: &Value,
    ) -> ScimResult<Value> {
        if element.is_complex() {
            let value_sub = element.sub_attribute("value").cloned().ok_or_else(|| {
                ScimError::invalid_filter(format!(
                    "attribute '{}' has no 'value' sub-attribute to compare",
                    element.name
                ))
            })?;
            let segment = self
                .registry
                .db_alias(&value_sub.id)
                .unwrap_or(value_sub.name.as_str())
                .to_string();
            let condition = self.leaf_condition(&value_sub, op, value)?;
            Ok(field_doc(segment, condition))
        } else {
            self.leaf_condition(element, op, value)
        }
    }

    fn leaf_condition(
        &self,
        attr: &Arc<Attribute>,
        op: CompareOp,
        value: &Value,
    ) -> ScimResult<Value> {
        let value = self.normalize_literal(attr, value)?;
        match op {
            CompareOp::Eq => {
                if self.needs_case_fold(attr, &value) {
                    Ok(json!({"$regex": anchored(&value), "$options": "i"}))
                } else {
                    Ok(json!({"$eq": value}))
                }
            }
            CompareOp::Ne => {
                if self.needs_case_fold(attr, &value) {
                    Ok(json!({"$not": {"$regex": anchored(&value), "$options": "i"}}))
                } else {
                    Ok(json!({"$ne": value}))
                }
            }
            CompareOp::Co | CompareOp::Sw | CompareOp::Ew => {
                if !attr.is_string_like() && attr.data_type != AttributeType::Complex {
                    return Err(ScimError::invalid_filter(format!(
                        "'{}' is not defined for attribute '{}'",
                        op.keyword(),
                        attr.path
                    )));
                }
                let literal = value.as_str().ok_or_else(|| {
                    ScimError::invalid_filter(format!(
                        "'{}' requires a string literal",
                        op.keyword()
                    ))
                })?;
                let escaped = escape_regex(literal);
                let pattern = match op {
                    CompareOp::Co => escaped,
                    CompareOp::Sw => format!("^{}", escaped),
                    _ => format!("{}$", escaped),
                };
                if attr.case_exact {
                    Ok(json!({"$regex": pattern}))
                } else {
                    Ok(json!({"$regex": pattern, "$options": "i"}))
                }
            }
            CompareOp::Gt => Ok(json!({"$gt": value})),
            CompareOp::Ge => Ok(json!({"$gte": value})),
            CompareOp::Lt => Ok(json!({"$lt": value})),
            CompareOp::Le => Ok(json!({"$lte": value})),
        }
    }

    fn needs_case_fold(&self, attr: &Attribute, value: &Value) -> bool {
        attr.data_type == AttributeType::String && !attr.case_exact && value.is_string()
    }

    /// Normalize dateTime literals to the canonical stored rendering so
    /// that string comparison in the backend agrees with typed comparison.
    fn normalize_literal(&self, attr: &Attribute, value: &Value) -> ScimResult<Value> {
        if attr.data_type != AttributeType::DateTime {
            return Ok(value.clone());
        }
        let Some(text) = value.as_str() else {
            return Ok(value.clone());
        };
        let parsed = chrono::DateTime::parse_from_rfc3339(text).map_err(|_| {
            ScimError::invalid_filter(format!(
                "cannot compare dateTime {} against '{}'",
                attr.path, text
            ))
        })?;
        Ok(Value::String(
            parsed
                .with_timezone(&chrono::Utc)
                .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        ))
    }

    /// Resolve a path to its stored dotted field name, ignoring filters.
    fn stored_field(&self, path: &AttrPath) -> Option<String> {
        let root = self.resource_type.super_attribute();
        let (mut attr, mut field, steps): (Arc<Attribute>, String, &[PathStep]) =
            match resolve_entry(path, &self.resource_type.schema, root).ok()? {
                PathEntry::Root(steps) => (Arc::clone(root), String::new(), steps),
                PathEntry::Container(name, steps) => {
                    let container = root.sub_attribute(&name)?;
                    let segment = self
                        .registry
                        .db_alias(&container.id)
                        .unwrap_or(container.name.as_str())
                        .to_string();
                    (Arc::clone(container), segment, steps)
                }
            };
        for step in steps {
            let sub = attr.sub_attribute(&step.name)?;
            let segment = self.registry.db_alias(&sub.id).unwrap_or(sub.name.as_str());
            field = if field.is_empty() {
                segment.to_string()
            } else {
                format!("{}.{}", field, segment)
            };
            attr = match sub.element_attribute() {
                Some(elem) => Arc::clone(elem),
                None => Arc::clone(sub),
            };
        }
        if field.is_empty() { None } else { Some(field) }
    }

    fn projection_doc(&self, projection: Option<&Projection>) -> Option<Value> {
        if self.options.ignore_projection {
            return None;
        }
        let projection = projection?;
        if !projection.attributes.is_empty() {
            let mut doc = Map::new();
            for path in &projection.attributes {
                if let Some(field) = self.stored_field(path) {
                    doc.insert(field, json!(1));
                }
            }
            return Some(Value::Object(doc));
        }
        if !projection.excluded_attributes.is_empty() {
            let mut doc = Map::new();
            for path in &projection.excluded_attributes {
                if let Some(field) = self.stored_field(path) {
                    doc.insert(field, json!(0));
                }
            }
            return Some(Value::Object(doc));
        }
        None
    }

    fn id_query(&self, id: &str) -> Value {
        json!({"id": {"$eq": id}})
    }

    fn version_query(&self, id: &str, version: &str) -> Value {
        json!({"$and": [
            {"id": {"$eq": id}},
            {"meta.version": {"$eq": version}}
        ]})
    }

    /// Rename SCIM attribute names to stored aliases, recursively.
    fn to_stored(&self, resource: &Resource) -> Value {
        rename_keys(
            &scim_json::serialize_stored(resource),
            self.resource_type.super_attribute(),
            |registry, attr| {
                registry
                    .db_alias(&attr.id)
                    .unwrap_or(attr.name.as_str())
                    .to_string()
            },
            &self.registry,
            Direction::Out,
        )
    }

    fn from_stored(&self, document: &Value) -> ScimResult<Resource> {
        let restored = rename_keys(
            document,
            self.resource_type.super_attribute(),
            |_, attr| attr.name.clone(),
            &self.registry,
            Direction::In,
        );
        scim_json::deserialize_stored(&self.registry, &self.resource_type, &restored).map_err(
            |err| {
                error!(
                    "stored {} document no longer deserializes: {}",
                    self.resource_type.name, err
                );
                ScimError::internal("stored resource is corrupt")
            },
        )
    }

    fn pre_condition(&self, id: &str) -> ScimError {
        ScimError::pre_condition(format!(
            "{} resource '{}' does not exist, or another process has updated it since last read",
            self.resource_type.name, id
        ))
    }
}

#[derive(Clone, Copy)]
enum Direction {
    /// SCIM names to stored aliases
    Out,
    /// Stored aliases back to SCIM names
    In,
}

fn rename_keys(
    value: &Value,
    attr: &Arc<Attribute>,
    target_name: fn(&SchemaRegistry, &Attribute) -> String,
    registry: &SchemaRegistry,
    direction: Direction,
) -> Value {
    match value {
        Value::Object(object) => {
            let mut out = Map::new();
            for (key, item) in object {
                let sub = attr.sub_attributes.iter().find(|sub| {
                    let stored = registry
                        .db_alias(&sub.id)
                        .unwrap_or(sub.name.as_str());
                    match direction {
                        Direction::Out => sub.name.eq_ignore_ascii_case(key),
                        Direction::In => stored.eq_ignore_ascii_case(key),
                    }
                });
                match sub {
                    Some(sub) => {
                        out.insert(
                            target_name(registry, sub),
                            rename_keys(item, sub, target_name, registry, direction),
                        );
                    }
                    None => {
                        out.insert(key.clone(), item.clone());
                    }
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| rename_keys(item, attr, target_name, registry, direction))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn field_doc(field: String, condition: Value) -> Value {
    let mut doc = Map::new();
    doc.insert(field, condition);
    Value::Object(doc)
}

fn escape_regex(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(
            c,
            '.' | '^' | '$' | '*' | '+' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '\\'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn anchored(value: &Value) -> String {
    format!("^{}$", escape_regex(value.as_str().unwrap_or_default()))
}

#[async_trait]
impl<S: DocumentStore> Database for DocumentDatabase<S> {
    async fn insert(&self, ctx: &RequestContext, resource: &Resource) -> ScimResult<()> {
        ctx.check_cancelled()?;
        let document = self.to_stored(resource);
        if let Err(err) = self.store.insert_one(document).await {
            error!(
                "failed to insert {} resource {:?}: {}",
                self.resource_type.name,
                resource.id(),
                err
            );
            return Err(err);
        }
        debug!(
            "inserted {} resource {:?}",
            self.resource_type.name,
            resource.id()
        );
        Ok(())
    }

    async fn get(
        &self,
        ctx: &RequestContext,
        id: &str,
        projection: Option<&Projection>,
    ) -> ScimResult<Resource> {
        ctx.check_cancelled()?;
        let found = self
            .store
            .find_one(self.id_query(id), self.projection_doc(projection))
            .await
            .map_err(|err| {
                error!("failed to find {} resource {}: {}", self.resource_type.name, id, err);
                err
            })?;
        match found {
            Some(document) => self.from_stored(&document),
            None => Err(ScimError::not_found(format!(
                "{} resource with id '{}' does not exist",
                self.resource_type.name, id
            ))),
        }
    }

    async fn count(&self, ctx: &RequestContext, filter: &Filter) -> ScimResult<usize> {
        ctx.check_cancelled()?;
        let query = self.translate(filter)?;
        self.store.count(query).await.map_err(|err| {
            error!(
                "failed to count {} documents for filter {}: {}",
                self.resource_type.name, filter, err
            );
            err
        })
    }

    async fn query(
        &self,
        ctx: &RequestContext,
        filter: Option<&Filter>,
        sort: Option<&Sort>,
        pagination: Option<&Pagination>,
        projection: Option<&Projection>,
    ) -> ScimResult<Vec<Resource>> {
        ctx.check_cancelled()?;
        let query = match filter {
            Some(filter) => self.translate(filter)?,
            None => Value::Object(Map::new()),
        };
        let sort_spec = sort.and_then(|sort| {
            self.stored_field(&sort.by)
                .map(|field| (field, sort.order == SortOrder::Ascending))
        });
        let (skip, limit) = match pagination {
            Some(page) => (page.offset(), Some(page.count)),
            None => (0, None),
        };
        let documents = self
            .store
            .find(query, sort_spec, skip, limit, self.projection_doc(projection))
            .await
            .map_err(|err| {
                error!(
                    "failed to query {} documents: {}",
                    self.resource_type.name, err
                );
                err
            })?;
        documents
            .iter()
            .map(|document| self.from_stored(document))
            .collect()
    }

    async fn replace(
        &self,
        ctx: &RequestContext,
        resource: &Resource,
        old_version: &str,
    ) -> ScimResult<()> {
        ctx.check_cancelled()?;
        let id = resource
            .id()
            .ok_or_else(|| ScimError::internal("cannot replace a resource without an id"))?;
        let replaced = self
            .store
            .find_one_and_replace(self.version_query(&id, old_version), self.to_stored(resource))
            .await
            .map_err(|err| {
                error!(
                    "failed to replace {} resource {} at version {}: {}",
                    self.resource_type.name, id, old_version, err
                );
                err
            })?;
        match replaced {
            Some(_) => Ok(()),
            None => Err(self.pre_condition(&id)),
        }
    }

    async fn delete(&self, ctx: &RequestContext, resource: &Resource) -> ScimResult<()> {
        ctx.check_cancelled()?;
        let id = resource
            .id()
            .ok_or_else(|| ScimError::internal("cannot delete a resource without an id"))?;
        let version = resource.version().unwrap_or_default();
        let deleted = self
            .store
            .find_one_and_delete(self.version_query(&id, &version))
            .await
            .map_err(|err| {
                error!(
                    "failed to delete {} resource {} at version {}: {}",
                    self.resource_type.name, id, version, err
                );
                err
            })?;
        match deleted {
            Some(_) => Ok(()),
            None => Err(self.pre_condition(&id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::compile_filter;

    fn adapter() -> DocumentDatabase<NullStore> {
        let registry = Arc::new(SchemaRegistry::with_embedded().unwrap());
        let resource_type = Arc::clone(registry.resource_type("User").unwrap());
        DocumentDatabase::new(registry, resource_type, NullStore, DocumentDbOptions::new())
    }

    struct NullStore;

    #[async_trait]
    impl DocumentStore for NullStore {
        async fn insert_one(&self, _document: Value) -> ScimResult<()> {
            Ok(())
        }
        async fn find_one(
            &self,
            _query: Value,
            _projection: Option<Value>,
        ) -> ScimResult<Option<Value>> {
            Ok(None)
        }
        async fn find(
            &self,
            _query: Value,
            _sort: Option<(String, bool)>,
            _skip: usize,
            _limit: Option<usize>,
            _projection: Option<Value>,
        ) -> ScimResult<Vec<Value>> {
            Ok(Vec::new())
        }
        async fn count(&self, _query: Value) -> ScimResult<usize> {
            Ok(0)
        }
        async fn find_one_and_replace(
            &self,
            _query: Value,
            _document: Value,
        ) -> ScimResult<Option<Value>> {
            Ok(None)
        }
        async fn find_one_and_delete(&self, _query: Value) -> ScimResult<Option<Value>> {
            Ok(None)
        }
        async fn create_index(&self, _field: &str, _unique: bool) -> ScimResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_translate_equality() {
        let db = adapter();
        let filter = compile_filter(r#"id eq "42""#).unwrap();
        assert_eq!(db.translate(&filter).unwrap(), json!({"id": {"$eq": "42"}}));
    }

    #[test]
    fn test_translate_case_insensitive_equality() {
        let db = adapter();
        let filter = compile_filter(r#"userName eq "Alice""#).unwrap();
        assert_eq!(
            db.translate(&filter).unwrap(),
            json!({"userName": {"$regex": "^Alice$", "$options": "i"}})
        );
    }

    #[test]
    fn test_translate_logical_operators() {
        let db = adapter();
        let filter = compile_filter(r#"id eq "1" and not (active eq true)"#).unwrap();
        assert_eq!(
            db.translate(&filter).unwrap(),
            json!({"$and": [
                {"id": {"$eq": "1"}},
                {"$nor": [{"active": {"$eq": true}}]}
            ]})
        );
    }

    #[test]
    fn test_translate_sub_filter_to_elem_match() {
        let db = adapter();
        let filter = compile_filter(r#"emails[type eq "work"].value sw "a""#).unwrap();
        let query = db.translate(&filter).unwrap();
        let elem = &query["emails"]["$elemMatch"]["$and"];
        assert_eq!(elem[0], json!({"type": {"$regex": "^work$", "$options": "i"}}));
        assert_eq!(elem[1], json!({"value": {"$regex": "^a", "$options": "i"}}));
    }

    #[test]
    fn test_translate_aliased_ref_field() {
        let db = adapter();
        let filter = compile_filter(r#"groups[$ref sw "https://x"] pr"#).unwrap();
        let query = db.translate(&filter).unwrap();
        let inner = &query["groups"]["$elemMatch"];
        assert!(inner.get("ref").is_some(), "expected alias 'ref', got {}", query);
    }

    #[test]
    fn test_translate_extension_container_alias() {
        let db = adapter();
        let filter = compile_filter(
            r#"urn:ietf:params:scim:schemas:extension:enterprise:2.0:User:employeeNumber eq "E-1""#,
        )
        .unwrap();
        let query = db.translate(&filter).unwrap();
        let field = "urn_ietf_params_scim_schemas_extension_enterprise_2_0_User.employeeNumber";
        assert!(query.get(field).is_some(), "got {}", query);
    }

    #[test]
    fn test_translate_datetime_normalization() {
        let db = adapter();
        let filter =
            compile_filter(r#"meta.lastModified gt "2024-01-01T01:00:00+01:00""#).unwrap();
        assert_eq!(
            db.translate(&filter).unwrap(),
            json!({"meta.lastModified": {"$gt": "2024-01-01T00:00:00.000Z"}})
        );
    }

    #[test]
    fn test_translate_presence() {
        let db = adapter();
        let filter = compile_filter("name.familyName pr").unwrap();
        assert_eq!(
            db.translate(&filter).unwrap(),
            json!({"name.familyName": {"$exists": true, "$nin": [null, []]}})
        );
    }

    #[test]
    fn test_unsupported_operator_combination() {
        let db = adapter();
        let filter = compile_filter("active co \"tr\"").unwrap();
        assert!(db.translate(&filter).is_err());
    }

    #[test]
    fn test_stored_document_renames_aliases() {
        let db = adapter();
        let body = json!({
            "id": "1",
            "userName": "alice",
            "groups": [{"value": "g1", "$ref": "https://example.com/Groups/g1"}],
            "urn:ietf:params:scim:schemas:extension:enterprise:2.0:User": {
                "employeeNumber": "E-1"
            }
        });
        let resource =
            scim_json::deserialize(&db.registry, &db.resource_type, &body).unwrap();
        let stored = db.to_stored(&resource);
        assert_eq!(stored["groups"][0]["ref"], "https://example.com/Groups/g1");
        assert!(stored["groups"][0].get("$ref").is_none());
        assert_eq!(
            stored["urn_ietf_params_scim_schemas_extension_enterprise_2_0_User"]
                ["employeeNumber"],
            "E-1"
        );

        let round_tripped = db.from_stored(&stored).unwrap();
        assert!(resource.matches(&round_tripped));
    }
}

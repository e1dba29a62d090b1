//! Standard property filters, identified by the annotation or attribute
//! characteristic they react to.
//!
//! Order bands: read-only reset (100) runs first so user-supplied values
//! never survive into generation; generators (150..199) fill server-owned
//! values; validators (200..299) check what remains; hashing (300) runs
//! before uniqueness (400) so stored and compared forms agree; meta
//! stamping (600) runs last and records the version of the final tree.

use async_trait::async_trait;
use log::debug;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::{FilterContext, FilterTarget, PropertyFilter};
use crate::error::{ScimError, ScimResult};
use crate::expr::ast::{AttrPath, Filter, PathStep};
use crate::resource::Resource;
use crate::schema::{Attribute, AttributeType, Mutability, SchemaRegistry, Uniqueness};

/// The standard filter chain.
pub fn standard_filters() -> Vec<std::sync::Arc<dyn PropertyFilter>> {
    vec![
        std::sync::Arc::new(ReadOnlyFilter),
        std::sync::Arc::new(UuidGenerateFilter),
        std::sync::Arc::new(SchemaSyncFilter),
        std::sync::Arc::new(ImmutableFilter),
        std::sync::Arc::new(RequiredFilter),
        std::sync::Arc::new(CanonicalFilter),
        std::sync::Arc::new(ReferenceFilter),
        std::sync::Arc::new(HashFilter),
        std::sync::Arc::new(UniqueFilter),
        std::sync::Arc::new(MetaFilter),
    ]
}

/// Resets `mutability=readOnly` properties: user-supplied values are
/// discarded on create and replaced by the server-kept value on update.
pub struct ReadOnlyFilter;

impl ReadOnlyFilter {
    /// Nested read-only properties are handled wholesale at the outermost
    /// read-only ancestor.
    fn handled_by_parent(target: &FilterTarget, resource: &Resource) -> bool {
        target
            .parent()
            .and_then(|parent| parent.locate(resource.root()).map(|p| p.attribute().mutability))
            .is_some_and(|mutability| mutability == Mutability::ReadOnly)
    }
}

#[async_trait]
impl PropertyFilter for ReadOnlyFilter {
    fn supports(&self, _registry: &SchemaRegistry, attr: &Attribute) -> bool {
        attr.mutability == Mutability::ReadOnly
    }

    fn order(&self) -> u32 {
        100
    }

    async fn on_create(
        &self,
        _ctx: &FilterContext<'_>,
        resource: &mut Resource,
        target: &FilterTarget,
    ) -> ScimResult<()> {
        if Self::handled_by_parent(target, resource) {
            return Ok(());
        }
        let changes = match target.locate_mut(resource.root_mut()) {
            Some(prop) => prop.delete(),
            None => return Ok(()),
        };
        resource.record(changes);
        Ok(())
    }

    async fn on_update(
        &self,
        _ctx: &FilterContext<'_>,
        resource: &mut Resource,
        target: &FilterTarget,
        reference: &Resource,
    ) -> ScimResult<()> {
        if Self::handled_by_parent(target, resource) {
            return Ok(());
        }
        let kept = target
            .locate_ref(resource.root(), reference.root(), reference.registry())
            .map(|prop| prop.raw());
        let changes = match target.locate_mut(resource.root_mut()) {
            Some(prop) => match kept {
                Some(value) if !value.is_null() => {
                    if prop.raw() == value {
                        Vec::new()
                    } else {
                        prop.set(&value)?
                    }
                }
                _ => prop.delete(),
            },
            None => return Ok(()),
        };
        resource.record(changes);
        Ok(())
    }
}

/// Fills unassigned `@UUID` / `@AutoGenerated` properties with a v4 UUID.
pub struct UuidGenerateFilter;

#[async_trait]
impl PropertyFilter for UuidGenerateFilter {
    fn supports(&self, registry: &SchemaRegistry, attr: &Attribute) -> bool {
        registry.has_annotation(&attr.id, "@UUID")
            || registry.has_annotation(&attr.id, "@AutoGenerated")
    }

    fn order(&self) -> u32 {
        150
    }

    async fn on_create(
        &self,
        _ctx: &FilterContext<'_>,
        resource: &mut Resource,
        target: &FilterTarget,
    ) -> ScimResult<()> {
        let changes = match target.locate_mut(resource.root_mut()) {
            Some(prop) if prop.is_unassigned() => {
                prop.set(&json!(Uuid::new_v4().to_string()))?
            }
            _ => return Ok(()),
        };
        resource.record(changes);
        Ok(())
    }

    async fn on_update(
        &self,
        ctx: &FilterContext<'_>,
        resource: &mut Resource,
        target: &FilterTarget,
        _reference: &Resource,
    ) -> ScimResult<()> {
        // The read-only reset already restored the server-kept value; only
        // a genuinely absent value is regenerated.
        self.on_create(ctx, resource, target).await
    }
}

/// Keeps the `schemas` list equal to the core schema URN plus the URNs of
/// populated extensions.
pub struct SchemaSyncFilter;

#[async_trait]
impl PropertyFilter for SchemaSyncFilter {
    fn supports(&self, registry: &SchemaRegistry, attr: &Attribute) -> bool {
        attr.id == "schemas" || registry.has_annotation(&attr.id, "@SchemaSync")
    }

    fn order(&self) -> u32 {
        160
    }

    async fn on_create(
        &self,
        _ctx: &FilterContext<'_>,
        resource: &mut Resource,
        target: &FilterTarget,
    ) -> ScimResult<()> {
        let mut urns = vec![resource.resource_type().schema.clone()];
        for urn in resource
            .resource_type()
            .extension_urns()
            .map(str::to_string)
            .collect::<Vec<_>>()
        {
            let populated = resource
                .root()
                .child(&urn)
                .is_some_and(|container| !container.is_unassigned());
            if populated {
                urns.push(urn);
            }
        }
        let desired = json!(urns);
        let changes = match target.locate_mut(resource.root_mut()) {
            Some(prop) => {
                if prop.raw() == desired {
                    return Ok(());
                }
                prop.set(&desired)?
            }
            None => return Ok(()),
        };
        resource.record(changes);
        Ok(())
    }

    async fn on_update(
        &self,
        ctx: &FilterContext<'_>,
        resource: &mut Resource,
        target: &FilterTarget,
        _reference: &Resource,
    ) -> ScimResult<()> {
        self.on_create(ctx, resource, target).await
    }
}

/// Rejects changes to `mutability=immutable` properties that already held a
/// different non-null value.
pub struct ImmutableFilter;

#[async_trait]
impl PropertyFilter for ImmutableFilter {
    fn supports(&self, _registry: &SchemaRegistry, attr: &Attribute) -> bool {
        attr.mutability == Mutability::Immutable
    }

    fn order(&self) -> u32 {
        200
    }

    async fn on_create(
        &self,
        _ctx: &FilterContext<'_>,
        _resource: &mut Resource,
        _target: &FilterTarget,
    ) -> ScimResult<()> {
        // First assignment is always permitted.
        Ok(())
    }

    async fn on_update(
        &self,
        ctx: &FilterContext<'_>,
        resource: &mut Resource,
        target: &FilterTarget,
        reference: &Resource,
    ) -> ScimResult<()> {
        let Some(prop) = target.locate(resource.root()) else {
            return Ok(());
        };
        let Some(kept) = target.locate_ref(resource.root(), reference.root(), ctx.registry)
        else {
            return Ok(());
        };
        if kept.is_unassigned() || prop.is_unassigned() {
            return Ok(());
        }
        if !prop.matches(kept, ctx.registry) {
            return Err(ScimError::mutability(format!(
                "attribute is immutable and already has the value {}",
                kept.raw()
            )));
        }
        Ok(())
    }
}

/// Rejects unassigned `required` properties whose parent is present.
pub struct RequiredFilter;

impl RequiredFilter {
    fn check(resource: &Resource, target: &FilterTarget) -> ScimResult<()> {
        let Some(prop) = target.locate(resource.root()) else {
            return Ok(());
        };
        if !prop.is_unassigned() {
            return Ok(());
        }
        // A required sub-attribute of an absent optional parent is not an
        // error; only a populated parent demands it.
        if let Some(parent) = target.parent() {
            let parent_present = parent
                .locate(resource.root())
                .is_some_and(|p| !p.is_unassigned());
            if !parent_present {
                return Ok(());
            }
        }
        Err(ScimError::invalid_value("required attribute is missing"))
    }
}

#[async_trait]
impl PropertyFilter for RequiredFilter {
    fn supports(&self, _registry: &SchemaRegistry, attr: &Attribute) -> bool {
        attr.required
    }

    fn order(&self) -> u32 {
        210
    }

    async fn on_create(
        &self,
        _ctx: &FilterContext<'_>,
        resource: &mut Resource,
        target: &FilterTarget,
    ) -> ScimResult<()> {
        Self::check(resource, target)
    }

    async fn on_update(
        &self,
        _ctx: &FilterContext<'_>,
        resource: &mut Resource,
        target: &FilterTarget,
        _reference: &Resource,
    ) -> ScimResult<()> {
        Self::check(resource, target)
    }
}

/// Rejects string values outside the attribute's canonical values.
pub struct CanonicalFilter;

impl CanonicalFilter {
    fn check(resource: &Resource, target: &FilterTarget) -> ScimResult<()> {
        let Some(prop) = target.locate(resource.root()) else {
            return Ok(());
        };
        if prop.is_unassigned() || prop.attribute().multi_valued {
            return Ok(());
        }
        let attr = prop.attribute();
        let value = prop.raw();
        let Some(text) = value.as_str() else {
            return Ok(());
        };
        if attr
            .canonical_values
            .iter()
            .any(|canonical| attr.string_eq(canonical, text))
        {
            Ok(())
        } else {
            Err(ScimError::invalid_value(format!(
                "value '{}' is not one of the canonical values {:?}",
                text, attr.canonical_values
            )))
        }
    }
}

#[async_trait]
impl PropertyFilter for CanonicalFilter {
    fn supports(&self, _registry: &SchemaRegistry, attr: &Attribute) -> bool {
        !attr.canonical_values.is_empty()
    }

    fn order(&self) -> u32 {
        220
    }

    async fn on_create(
        &self,
        _ctx: &FilterContext<'_>,
        resource: &mut Resource,
        target: &FilterTarget,
    ) -> ScimResult<()> {
        Self::check(resource, target)
    }

    async fn on_update(
        &self,
        _ctx: &FilterContext<'_>,
        resource: &mut Resource,
        target: &FilterTarget,
        _reference: &Resource,
    ) -> ScimResult<()> {
        Self::check(resource, target)
    }
}

/// Verifies that references to local resource types resolve. Best-effort:
/// reference types without a registered database are skipped; a lookup that
/// comes back empty everywhere is a rejection.
pub struct ReferenceFilter;

impl ReferenceFilter {
    async fn check(ctx: &FilterContext<'_>, resource: &Resource, target: &FilterTarget) -> ScimResult<()> {
        let Some(prop) = target.locate(resource.root()) else {
            return Ok(());
        };
        if prop.is_unassigned() || prop.attribute().multi_valued {
            return Ok(());
        }
        let value = prop.raw();
        let Some(text) = value.as_str() else {
            return Ok(());
        };
        let id = text.rsplit('/').next().unwrap_or(text);

        let mut attempted = false;
        for reference_type in &prop.attribute().reference_types {
            let Some(database) = ctx.databases.get(reference_type) else {
                continue;
            };
            attempted = true;
            match database.get(ctx.request, id, None).await {
                Ok(_) => return Ok(()),
                Err(ScimError::NotFound(_)) => {}
                Err(other) => return Err(other),
            }
        }
        if attempted {
            return Err(ScimError::invalid_value(format!(
                "reference '{}' does not resolve to an existing resource",
                text
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PropertyFilter for ReferenceFilter {
    fn supports(&self, _registry: &SchemaRegistry, attr: &Attribute) -> bool {
        attr.data_type == AttributeType::Reference
            && attr
                .reference_types
                .iter()
                .any(|t| t != "external" && t != "uri")
    }

    fn order(&self) -> u32 {
        230
    }

    async fn on_create(
        &self,
        ctx: &FilterContext<'_>,
        resource: &mut Resource,
        target: &FilterTarget,
    ) -> ScimResult<()> {
        Self::check(ctx, resource, target).await
    }

    async fn on_update(
        &self,
        ctx: &FilterContext<'_>,
        resource: &mut Resource,
        target: &FilterTarget,
        _reference: &Resource,
    ) -> ScimResult<()> {
        Self::check(ctx, resource, target).await
    }
}

/// One-way hashes `@Hash` values before persistence. An update without a
/// new value keeps the stored hash.
pub struct HashFilter;

impl HashFilter {
    const PREFIX: &'static str = "{sha256}";

    fn digest(plain: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(plain.as_bytes());
        let digest = hasher.finalize();
        let mut out = String::with_capacity(Self::PREFIX.len() + digest.len() * 2);
        out.push_str(Self::PREFIX);
        for byte in digest {
            out.push_str(&format!("{:02x}", byte));
        }
        out
    }
}

#[async_trait]
impl PropertyFilter for HashFilter {
    fn supports(&self, registry: &SchemaRegistry, attr: &Attribute) -> bool {
        registry.has_annotation(&attr.id, "@Hash")
    }

    fn order(&self) -> u32 {
        300
    }

    async fn on_create(
        &self,
        _ctx: &FilterContext<'_>,
        resource: &mut Resource,
        target: &FilterTarget,
    ) -> ScimResult<()> {
        let changes = match target.locate_mut(resource.root_mut()) {
            Some(prop) => match prop.raw().as_str() {
                Some(plain) if !plain.starts_with(Self::PREFIX) => {
                    prop.set(&json!(Self::digest(plain)))?
                }
                _ => return Ok(()),
            },
            None => return Ok(()),
        };
        resource.record(changes);
        Ok(())
    }

    async fn on_update(
        &self,
        ctx: &FilterContext<'_>,
        resource: &mut Resource,
        target: &FilterTarget,
        reference: &Resource,
    ) -> ScimResult<()> {
        let unassigned = target
            .locate(resource.root())
            .is_some_and(|prop| prop.is_unassigned());
        if unassigned {
            // Carry the stored hash forward when the update omits the value.
            let kept = target
                .locate_ref(resource.root(), reference.root(), ctx.registry)
                .map(|prop| prop.raw());
            if let Some(value) = kept {
                if !value.is_null() {
                    let changes = match target.locate_mut(resource.root_mut()) {
                        Some(prop) => prop.set(&value)?,
                        None => return Ok(()),
                    };
                    resource.record(changes);
                }
            }
            return Ok(());
        }
        self.on_create(ctx, resource, target).await
    }
}

/// Enforces `uniqueness=server|global` with a count query; global
/// uniqueness consults every registered database.
pub struct UniqueFilter;

impl UniqueFilter {
    fn count_filter(attr_path: &str, value: Value, exclude_id: Option<String>) -> Filter {
        let path = AttrPath {
            schema_urn: None,
            steps: attr_path.split('.').map(PathStep::named).collect(),
        };
        let mut filter = Filter::eq(path, value);
        if let Some(id) = exclude_id {
            filter = Filter::and(
                filter,
                Filter::not(Filter::eq(AttrPath::simple("id"), json!(id))),
            );
        }
        filter
    }

    async fn check(
        ctx: &FilterContext<'_>,
        resource: &Resource,
        target: &FilterTarget,
        exclude_self: bool,
    ) -> ScimResult<()> {
        let Some(prop) = target.locate(resource.root()) else {
            return Ok(());
        };
        if prop.is_unassigned() || prop.attribute().multi_valued {
            return Ok(());
        }
        let attr = prop.attribute().clone();
        let value = prop.raw();
        let exclude = if exclude_self { resource.id() } else { None };
        let filter = Self::count_filter(&attr.path, value.clone(), exclude);

        let collisions = match attr.uniqueness {
            Uniqueness::Server => ctx.database.count(ctx.request, &filter).await?,
            Uniqueness::Global => {
                let mut total = 0;
                for database in ctx.databases.values() {
                    total += match database.count(ctx.request, &filter).await {
                        Ok(count) => count,
                        // Related types may not carry the attribute at all.
                        Err(ScimError::InvalidFilter(_)) => 0,
                        Err(other) => return Err(other),
                    };
                }
                total
            }
            Uniqueness::None => 0,
        };

        if collisions > 0 {
            debug!(
                "uniqueness collision on {} for value {}",
                attr.path, value
            );
            return Err(ScimError::uniqueness(format!(
                "value {} is already taken",
                value
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PropertyFilter for UniqueFilter {
    fn supports(&self, _registry: &SchemaRegistry, attr: &Attribute) -> bool {
        attr.uniqueness != Uniqueness::None
    }

    fn order(&self) -> u32 {
        400
    }

    async fn on_create(
        &self,
        ctx: &FilterContext<'_>,
        resource: &mut Resource,
        target: &FilterTarget,
    ) -> ScimResult<()> {
        Self::check(ctx, resource, target, false).await
    }

    async fn on_update(
        &self,
        ctx: &FilterContext<'_>,
        resource: &mut Resource,
        target: &FilterTarget,
        _reference: &Resource,
    ) -> ScimResult<()> {
        Self::check(ctx, resource, target, true).await
    }
}

/// Stamps `meta`: resource type and creation time on create, last modified
/// time, location and the tree-hash version on every mutation.
pub struct MetaFilter;

impl MetaFilter {
    fn stamp(
        ctx: &FilterContext<'_>,
        resource: &mut Resource,
        target: &FilterTarget,
        create: bool,
    ) -> ScimResult<()> {
        let now = chrono::Utc::now()
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let resource_type_name = resource.resource_type().name.clone();
        let endpoint = resource.resource_type().endpoint.clone();
        let location = resource.id().map(|id| {
            format!(
                "{}{}/{}",
                ctx.config.base_url,
                endpoint,
                id
            )
        });
        let version = resource.compute_version();

        let mut desired = serde_json::Map::new();
        desired.insert("resourceType".to_string(), json!(resource_type_name));
        desired.insert("lastModified".to_string(), json!(now));
        desired.insert("version".to_string(), json!(version));
        if let Some(location) = location {
            desired.insert("location".to_string(), json!(location));
        }

        let changes = {
            let Some(meta) = target.locate_mut(resource.root_mut()) else {
                return Ok(());
            };
            let mut changes = Vec::new();
            if create || meta.child("created").is_none_or(|c| c.is_unassigned()) {
                desired.insert("created".to_string(), json!(now));
            }
            changes.extend(meta.merge(&desired)?);
            changes
        };
        resource.record(changes);
        Ok(())
    }
}

#[async_trait]
impl PropertyFilter for MetaFilter {
    fn supports(&self, registry: &SchemaRegistry, attr: &Attribute) -> bool {
        attr.id == "meta" || registry.has_annotation(&attr.id, "@Meta")
    }

    fn order(&self) -> u32 {
        600
    }

    async fn on_create(
        &self,
        ctx: &FilterContext<'_>,
        resource: &mut Resource,
        target: &FilterTarget,
    ) -> ScimResult<()> {
        Self::stamp(ctx, resource, target, true)
    }

    async fn on_update(
        &self,
        ctx: &FilterContext<'_>,
        resource: &mut Resource,
        target: &FilterTarget,
        _reference: &Resource,
    ) -> ScimResult<()> {
        Self::stamp(ctx, resource, target, false)
    }
}

//! Annotation-driven filter pipeline applied on create and update.
//!
//! A [`PropertyFilter`] declares which attributes it supports and an order;
//! at startup the pipeline walks the union of derived attributes across all
//! registered resource types and materializes, per attribute id, the sorted
//! list of supporting filters. At runtime the resource tree is walked depth
//! first and each visited property runs its filters in order; the first
//! error aborts the walk, tagged with the property's path.

pub mod filters;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use crate::db::{Database, DatabaseSet};
use crate::error::ScimResult;
use crate::property::Property;
use crate::resource::{RequestContext, Resource};
use crate::schema::{Attribute, SchemaRegistry};

/// Shared configuration for the standard filters.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Base URL used to stamp `meta.location`, without a trailing slash
    pub base_url: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
        }
    }
}

/// Everything a filter may need while processing one property.
pub struct FilterContext<'a> {
    pub registry: &'a Arc<SchemaRegistry>,
    /// Database of the resource type under mutation
    pub database: &'a Arc<dyn Database>,
    /// All databases by resource type name, for reference resolution
    pub databases: &'a DatabaseSet,
    pub request: &'a RequestContext,
    pub config: &'a PipelineConfig,
}

/// One processing stage, reacting to the attributes it supports.
#[async_trait]
pub trait PropertyFilter: Send + Sync {
    /// Whether this filter wants to process properties of this attribute.
    fn supports(&self, registry: &SchemaRegistry, attr: &Attribute) -> bool;

    /// Sort key; lower orders run first. Generators run before validators,
    /// validators before uniqueness, uniqueness before meta stamping.
    fn order(&self) -> u32;

    /// Process the property during resource creation.
    async fn on_create(
        &self,
        ctx: &FilterContext<'_>,
        resource: &mut Resource,
        target: &FilterTarget,
    ) -> ScimResult<()>;

    /// Process the property during resource update, with access to the
    /// server-kept reference resource.
    async fn on_update(
        &self,
        ctx: &FilterContext<'_>,
        resource: &mut Resource,
        target: &FilterTarget,
        reference: &Resource,
    ) -> ScimResult<()>;
}

/// One navigation segment of a concrete property location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Name(String),
    Index(usize),
}

/// Addresses one property inside a resource tree at execution time.
///
/// Targets are collected before the filters run; a filter that restructures
/// the tree may invalidate later targets, which then simply fail to locate
/// and are skipped.
#[derive(Debug, Clone)]
pub struct FilterTarget {
    pub attribute_id: String,
    pub segments: Vec<Segment>,
    /// Human-readable location, e.g. `emails[0].value`
    pub display: String,
}

impl FilterTarget {
    /// Resolve this target inside a tree.
    pub fn locate<'r>(&self, root: &'r Property) -> Option<&'r Property> {
        let mut current = root;
        for segment in &self.segments {
            current = match segment {
                Segment::Name(name) => current.child(name)?,
                Segment::Index(index) => current.element(*index)?,
            };
        }
        Some(current)
    }

    pub fn locate_mut<'r>(&self, root: &'r mut Property) -> Option<&'r mut Property> {
        let mut current = root;
        for segment in &self.segments {
            current = match segment {
                Segment::Name(name) => current.child_mut(name)?,
                Segment::Index(index) => current.element_mut(*index)?,
            };
        }
        Some(current)
    }

    /// Resolve the corresponding property on the reference resource.
    ///
    /// Multi-valued elements pair by structural matching rather than by
    /// position: the element of the updated resource selects the reference
    /// element it matches, so reordering does not break the pairing.
    pub fn locate_ref<'r>(
        &self,
        resource_root: &Property,
        reference_root: &'r Property,
        registry: &SchemaRegistry,
    ) -> Option<&'r Property> {
        let mut resource_current = Some(resource_root);
        let mut current = reference_root;
        for segment in &self.segments {
            match segment {
                Segment::Name(name) => {
                    current = current.child(name)?;
                    resource_current = resource_current.and_then(|p| p.child(name));
                }
                Segment::Index(index) => {
                    let resource_element = resource_current.and_then(|p| p.element(*index))?;
                    current = current
                        .elements()
                        .iter()
                        .find(|candidate| resource_element.matches(candidate, registry))?;
                    resource_current = Some(resource_element);
                }
            }
        }
        Some(current)
    }

    /// The target addressing this property's parent, if any.
    pub fn parent(&self) -> Option<FilterTarget> {
        if self.segments.len() < 2 {
            return None;
        }
        let segments = self.segments[..self.segments.len() - 1].to_vec();
        let display = self
            .display
            .rsplit_once('.')
            .map(|(head, _)| head.to_string())
            .unwrap_or_default();
        Some(FilterTarget {
            attribute_id: String::new(),
            segments,
            display,
        })
    }
}

/// The materialized filter index, immutable after startup.
pub struct FilterPipeline {
    index: HashMap<String, Vec<Arc<dyn PropertyFilter>>>,
    config: PipelineConfig,
}

impl FilterPipeline {
    /// Build the index over the union of derived attributes across all
    /// registered resource types. Filters are sorted ascending by order;
    /// the sort is stable, so ties break by load order.
    pub fn build(
        registry: &SchemaRegistry,
        filters: Vec<Arc<dyn PropertyFilter>>,
        config: PipelineConfig,
    ) -> Self {
        let mut attributes: HashMap<String, Arc<Attribute>> = HashMap::new();
        for resource_type in registry.resource_types() {
            for attr in resource_type.derived_attributes() {
                if let Some(element) = attr.element_attribute() {
                    attributes.insert(element.id.clone(), Arc::clone(element));
                }
                attributes.insert(attr.id.clone(), attr);
            }
        }

        let mut index = HashMap::new();
        for (id, attr) in attributes {
            let mut supporting: Vec<Arc<dyn PropertyFilter>> = filters
                .iter()
                .filter(|filter| filter.supports(registry, &attr))
                .cloned()
                .collect();
            if supporting.is_empty() {
                continue;
            }
            supporting.sort_by_key(|filter| filter.order());
            index.insert(id, supporting);
        }
        debug!("filter pipeline indexed {} attributes", index.len());
        Self { index, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the create-time pipeline over the whole resource tree.
    pub async fn on_create(
        &self,
        registry: &Arc<SchemaRegistry>,
        database: &Arc<dyn Database>,
        databases: &DatabaseSet,
        request: &RequestContext,
        resource: &mut Resource,
    ) -> ScimResult<()> {
        let ctx = FilterContext {
            registry,
            database,
            databases,
            request,
            config: &self.config,
        };
        for target in collect_targets(resource.root()) {
            let Some(filters) = self.index.get(&target.attribute_id) else {
                continue;
            };
            for filter in filters {
                filter
                    .on_create(&ctx, resource, &target)
                    .await
                    .map_err(|err| err.at_path(&target.display))?;
            }
        }
        Ok(())
    }

    /// Run the update-time pipeline, giving filters access to the
    /// server-kept reference resource.
    pub async fn on_update(
        &self,
        registry: &Arc<SchemaRegistry>,
        database: &Arc<dyn Database>,
        databases: &DatabaseSet,
        request: &RequestContext,
        resource: &mut Resource,
        reference: &Resource,
    ) -> ScimResult<()> {
        let ctx = FilterContext {
            registry,
            database,
            databases,
            request,
            config: &self.config,
        };
        for target in collect_targets(resource.root()) {
            let Some(filters) = self.index.get(&target.attribute_id) else {
                continue;
            };
            for filter in filters {
                filter
                    .on_update(&ctx, resource, &target, reference)
                    .await
                    .map_err(|err| err.at_path(&target.display))?;
            }
        }
        Ok(())
    }
}

/// Depth-first collection of every property location in the tree.
///
/// `meta` is visited last so that its stamped version reflects the tree
/// after every other filter (hashing included) has run.
fn collect_targets(root: &Property) -> Vec<FilterTarget> {
    let mut out = Vec::new();
    for child in root.children() {
        if child.attribute().name == "meta" {
            continue;
        }
        visit(child, Vec::new(), String::new(), &mut out);
    }
    if let Some(meta) = root.child("meta") {
        visit(meta, Vec::new(), String::new(), &mut out);
    }
    out
}

fn visit(prop: &Property, segments: Vec<Segment>, display_prefix: String, out: &mut Vec<FilterTarget>) {
    let attr = prop.attribute();
    let mut segments = segments;
    segments.push(Segment::Name(attr.name.clone()));
    let display = if display_prefix.is_empty() {
        attr.name.clone()
    } else {
        format!("{}.{}", display_prefix, attr.name)
    };
    out.push(FilterTarget {
        attribute_id: attr.id.clone(),
        segments: segments.clone(),
        display: display.clone(),
    });

    if attr.multi_valued {
        for (index, element) in prop.elements().iter().enumerate() {
            let mut element_segments = segments.clone();
            element_segments.push(Segment::Index(index));
            let element_display = format!("{}[{}]", display, index);
            out.push(FilterTarget {
                attribute_id: element.attribute().id.clone(),
                segments: element_segments.clone(),
                display: element_display.clone(),
            });
            if element.attribute().is_complex() {
                for child in element.children() {
                    visit(
                        child,
                        element_segments.clone(),
                        element_display.clone(),
                        out,
                    );
                }
            }
        }
    } else if attr.is_complex() {
        for child in prop.children() {
            visit(child, segments.clone(), display.clone(), out);
        }
    }
}

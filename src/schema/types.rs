//! Core schema type definitions for SCIM resources.
//!
//! This module contains the fundamental data structures that define SCIM
//! schemas, attribute definitions and resource types as specified in
//! RFC 7643. Attributes form a forest rooted at schemas; after loading,
//! every attribute is *sealed*: it receives a stable id, a canonical dotted
//! path, and (for multi-valued attributes) a derived element attribute.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// SCIM attribute data types as defined in RFC 7643.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum AttributeType {
    #[default]
    String,
    Boolean,
    Decimal,
    Integer,
    DateTime,
    Binary,
    Reference,
    Complex,
}

impl AttributeType {
    /// Human-readable type name used in error messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Decimal => "decimal",
            Self::Integer => "integer",
            Self::DateTime => "dateTime",
            Self::Binary => "binary",
            Self::Reference => "reference",
            Self::Complex => "complex",
        }
    }
}

/// Attribute mutability characteristics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum Mutability {
    ReadOnly,
    #[default]
    ReadWrite,
    Immutable,
    WriteOnly,
}

/// When an attribute is emitted in responses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum Returned {
    Always,
    Never,
    #[default]
    Default,
    Request,
}

/// Attribute uniqueness constraints.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum Uniqueness {
    #[default]
    None,
    Server,
    Global,
}

/// Definition of a SCIM attribute.
///
/// Immutable after sealing. The `id` is globally unique across all loaded
/// schemas (for schema-bound attributes it is `<schema-urn>:<path>`, for the
/// common attributes it equals the path) and is the key into the attribute
/// metadata hub.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Attribute {
    /// Stable attribute id, assigned at seal time
    #[serde(skip)]
    pub id: String,
    /// Canonical dotted path, assigned at seal time
    #[serde(skip)]
    pub path: String,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "type")]
    pub data_type: AttributeType,
    pub multi_valued: bool,
    pub required: bool,
    pub case_exact: bool,
    pub mutability: Mutability,
    pub returned: Returned,
    pub uniqueness: Uniqueness,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reference_types: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub canonical_values: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sub_attributes: Vec<Arc<Attribute>>,
    /// Derived single-valued attribute describing one element of a
    /// multi-valued attribute, built at seal time
    #[serde(skip)]
    element: Option<Arc<Attribute>>,
}

impl Attribute {
    pub fn is_complex(&self) -> bool {
        self.data_type == AttributeType::Complex
    }

    pub fn is_string_like(&self) -> bool {
        matches!(
            self.data_type,
            AttributeType::String | AttributeType::Reference | AttributeType::Binary
        )
    }

    /// Look up a sub-attribute by name. SCIM attribute names compare
    /// case-insensitively.
    pub fn sub_attribute(&self, name: &str) -> Option<&Arc<Attribute>> {
        self.sub_attributes
            .iter()
            .find(|sub| sub.name.eq_ignore_ascii_case(name))
    }

    /// The derived element attribute of a multi-valued attribute.
    ///
    /// Element attributes share the parent's sub-attribute structure but are
    /// single-valued and carry the id suffix `$elem`.
    pub fn element_attribute(&self) -> Option<&Arc<Attribute>> {
        self.element.as_ref()
    }

    /// Build a complex container attribute over pre-sealed children. Used
    /// by the registry for extension containers and the synthetic super
    /// attribute.
    pub fn complex_container(
        id: impl Into<String>,
        path: impl Into<String>,
        name: impl Into<String>,
        required: bool,
        sub_attributes: Vec<Arc<Attribute>>,
    ) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            name: name.into(),
            data_type: AttributeType::Complex,
            required,
            sub_attributes,
            ..Self::default()
        }
    }

    /// Whether two string values compare equal under this attribute's
    /// `caseExact` setting.
    pub fn string_eq(&self, left: &str, right: &str) -> bool {
        if self.case_exact {
            left == right
        } else {
            left.eq_ignore_ascii_case(right)
        }
    }

}

/// Assign ids and canonical paths to an attribute and its children.
///
/// `id_prefix` is the owning schema URN (empty for common attributes);
/// `parent_path` is the dotted path of the parent attribute (empty at the
/// top level).
pub fn seal_attribute(attr: &mut Arc<Attribute>, id_prefix: &str, parent_path: &str) {
    let this = Arc::make_mut(attr);
    this.path = if parent_path.is_empty() {
        this.name.clone()
    } else {
        format!("{}.{}", parent_path, this.name)
    };
    this.id = if id_prefix.is_empty() {
        this.path.clone()
    } else {
        format!("{}:{}", id_prefix, this.path)
    };
    let path = this.path.clone();
    for sub in &mut this.sub_attributes {
        seal_attribute(sub, id_prefix, &path);
    }
    if this.multi_valued {
        let mut elem = this.clone();
        elem.multi_valued = false;
        elem.element = None;
        elem.id = format!("{}$elem", this.id);
        this.element = Some(Arc::new(elem));
    }
}

/// Collect an attribute and every attribute reachable beneath it.
pub fn collect_attributes(attr: &Arc<Attribute>, out: &mut Vec<Arc<Attribute>>) {
    out.push(Arc::clone(attr));
    for sub in &attr.sub_attributes {
        collect_attributes(sub, out);
    }
}

/// A SCIM schema definition, identified by URN.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub attributes: Vec<Arc<Attribute>>,
}

impl Schema {
    /// Seal all top-level attributes against this schema's URN.
    pub fn seal(&mut self) {
        let id = self.id.clone();
        for attr in &mut self.attributes {
            seal_attribute(attr, &id, "");
        }
    }
}

/// Reference from a resource type to an extension schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaExtension {
    pub schema: String,
    #[serde(default)]
    pub required: bool,
}

/// Binding of a core schema plus optional extension schemas to an endpoint.
///
/// After registration the resource type owns a synthetic *super attribute*:
/// a complex attribute uniting the common attributes (`schemas`, `id`,
/// `externalId`, `meta`), the core schema's attributes, and one complex
/// container per extension schema, keyed by the extension URN.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceType {
    pub id: Option<String>,
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub description: String,
    pub schema: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schema_extensions: Vec<SchemaExtension>,
    #[serde(skip)]
    super_attribute: Option<Arc<Attribute>>,
}

impl ResourceType {
    /// The synthetic root attribute of resources of this type.
    ///
    /// Only valid after the registry has registered this resource type.
    pub fn super_attribute(&self) -> &Arc<Attribute> {
        self.super_attribute
            .as_ref()
            .expect("resource type registered without super attribute")
    }

    pub(super) fn set_super_attribute(&mut self, attr: Arc<Attribute>) {
        self.super_attribute = Some(attr);
    }

    /// Every attribute reachable under the super attribute, in declaration
    /// order. Used for building filter and database indexes.
    pub fn derived_attributes(&self) -> Vec<Arc<Attribute>> {
        let mut out = Vec::new();
        for attr in &self.super_attribute().sub_attributes {
            collect_attributes(attr, &mut out);
        }
        out
    }

    /// URNs of all extension schemas declared by this resource type.
    pub fn extension_urns(&self) -> impl Iterator<Item = &str> {
        self.schema_extensions.iter().map(|ext| ext.schema.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attribute(name: &str, data_type: AttributeType) -> Attribute {
        Attribute {
            name: name.to_string(),
            data_type,
            ..Attribute::default()
        }
    }

    #[test]
    fn test_seal_assigns_ids_and_paths() {
        let mut name = attribute("name", AttributeType::Complex);
        name.sub_attributes = vec![Arc::new(attribute("givenName", AttributeType::String))];
        let mut sealed = Arc::new(name);
        seal_attribute(&mut sealed, "urn:example:2.0:User", "");

        assert_eq!(sealed.id, "urn:example:2.0:User:name");
        assert_eq!(sealed.path, "name");
        let given = sealed.sub_attribute("givenname").expect("case-insensitive");
        assert_eq!(given.id, "urn:example:2.0:User:name.givenName");
        assert_eq!(given.path, "name.givenName");
    }

    #[test]
    fn test_multi_valued_element_attribute() {
        let mut emails = attribute("emails", AttributeType::Complex);
        emails.multi_valued = true;
        emails.sub_attributes = vec![Arc::new(attribute("value", AttributeType::String))];
        let mut sealed = Arc::new(emails);
        seal_attribute(&mut sealed, "urn:example:2.0:User", "");

        let elem = sealed.element_attribute().expect("element attribute");
        assert!(!elem.multi_valued);
        assert_eq!(elem.id, "urn:example:2.0:User:emails$elem");
        assert!(elem.sub_attribute("value").is_some());
    }

    #[test]
    fn test_case_exact_comparison() {
        let mut attr = attribute("userName", AttributeType::String);
        assert!(attr.string_eq("Alice", "alice"));
        attr.case_exact = true;
        assert!(!attr.string_eq("Alice", "alice"));
    }
}

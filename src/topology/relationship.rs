//! Relationship templates

use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{DiagnosticKind, DiagnosticSink, SourceLocation};
use crate::types::{FlattenedView, InterfaceDef, QualifiedName, TypeKind, TypeRegistry};
use crate::value::{Value, ValueExpr};

/// An instantiated relationship: either declared under
/// `relationship_templates` or synthesized for a requirement binding.
#[derive(Debug, Clone)]
pub struct RelationshipTemplate {
    pub name: String,
    pub type_name: QualifiedName,
    pub view: Arc<FlattenedView>,
    pub properties: IndexMap<String, ValueExpr>,
    pub interfaces: IndexMap<String, InterfaceDef>,
}

const RELATIONSHIP_TEMPLATE_KEYS: &[&str] = &[
    "type",
    "description",
    "metadata",
    "properties",
    "attributes",
    "interfaces",
    "copy",
];

impl RelationshipTemplate {
    /// Instantiate from a template body (a map with `type`). Returns None
    /// when the type cannot be resolved.
    pub fn from_body(
        name: &str,
        body: &Value,
        registry: &TypeRegistry,
        location: &SourceLocation,
        sink: &mut DiagnosticSink,
    ) -> Option<RelationshipTemplate> {
        let map = body.as_map()?;
        for key in map.keys() {
            if !RELATIONSHIP_TEMPLATE_KEYS.contains(&key.as_str()) {
                sink.error(
                    DiagnosticKind::UnknownFieldError,
                    format!(
                        "relationship template \"{}\" contains unknown field \"{}\"",
                        name, key
                    ),
                    location.clone(),
                );
            }
        }
        let Some(type_ref) = map.get("type").and_then(Value::as_str) else {
            sink.error(
                DiagnosticKind::MissingRequiredFieldError,
                format!(
                    "relationship template \"{}\" is missing required field \"type\"",
                    name
                ),
                location.clone(),
            );
            return None;
        };
        Self::of_type(name, type_ref, map.get("properties"), map.get("interfaces"), registry, location, sink)
    }

    /// Instantiate a relationship of `type_ref` with optional property and
    /// interface assignments.
    pub fn of_type(
        name: &str,
        type_ref: &str,
        properties: Option<&Value>,
        interfaces: Option<&Value>,
        registry: &TypeRegistry,
        location: &SourceLocation,
        sink: &mut DiagnosticSink,
    ) -> Option<RelationshipTemplate> {
        let Some(view) = registry.flattened(type_ref, TypeKind::Relationship) else {
            sink.error(
                DiagnosticKind::UnknownTypeError,
                format!(
                    "relationship type \"{}\" of template \"{}\" is not defined",
                    type_ref, name
                ),
                location.clone(),
            );
            return None;
        };
        if view.kind != TypeKind::Relationship {
            sink.error(
                DiagnosticKind::TypeMismatchError,
                format!("type \"{}\" of \"{}\" is not a relationship type", type_ref, name),
                location.clone(),
            );
            return None;
        }
        let mut tpl = RelationshipTemplate {
            name: name.to_string(),
            type_name: view.name.clone(),
            properties: IndexMap::new(),
            interfaces: view.interfaces.clone(),
            view,
        };
        super::node::fill_properties(
            &format!("relationship template \"{}\"", name),
            &tpl.view.properties.clone(),
            properties,
            &mut tpl.properties,
            registry,
            location,
            sink,
        );
        if let Some(assigned) = interfaces.and_then(Value::as_map) {
            let mut errors = Vec::new();
            for (iface_name, iface_body) in assigned {
                let parsed = InterfaceDef::parse(iface_name, iface_body, &mut errors);
                let merged = match tpl.interfaces.get(iface_name) {
                    Some(declared) => declared.merged_with(&parsed),
                    None => parsed,
                };
                tpl.interfaces.insert(iface_name.clone(), merged);
            }
            for e in errors {
                sink.error(DiagnosticKind::SchemaError, e, location.clone());
            }
        }
        Some(tpl)
    }

    pub fn is_derived_from(&self, ancestor: &str) -> bool {
        self.view.derives_from(ancestor)
    }
}

/// Parse the `relationship_templates:` section, honoring `copy:`.
pub fn elaborate_relationship_templates(
    raw: &Value,
    registry: &TypeRegistry,
    file: Option<&str>,
    sink: &mut DiagnosticSink,
) -> IndexMap<String, RelationshipTemplate> {
    let mut templates = IndexMap::new();
    let entries = match raw {
        Value::Null => return templates,
        Value::Map(m) => m,
        other => {
            sink.error(
                DiagnosticKind::TypeMismatchError,
                format!(
                    "\"relationship_templates\" must be a map, got {}",
                    other.type_name()
                ),
                location(file, "topology_template/relationship_templates"),
            );
            return templates;
        }
    };
    let mut bodies: IndexMap<String, Value> = IndexMap::new();
    for (name, body) in entries {
        let loc = location(
            file,
            &format!("topology_template/relationship_templates/{}", name),
        );
        let body = match super::node::apply_copy(name, body, &bodies, "relationship template", &loc, sink) {
            Some(b) => b,
            None => continue,
        };
        if let Some(tpl) = RelationshipTemplate::from_body(name, &body, registry, &loc, sink) {
            templates.insert(name.clone(), tpl);
        }
        bodies.insert(name.clone(), body);
    }
    templates
}

fn location(file: Option<&str>, path: &str) -> SourceLocation {
    match file {
        Some(f) => SourceLocation::in_file(f, path),
        None => SourceLocation::at_path(path),
    }
}

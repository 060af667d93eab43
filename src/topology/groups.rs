//! Group and policy templates

use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{DiagnosticKind, DiagnosticSink, SourceLocation};
use crate::topology::node::{fill_properties, NodeTemplate};
use crate::types::{FlattenedView, TypeKind, TypeRegistry};
use crate::value::{Value, ValueExpr};

/// A named group of node templates.
#[derive(Debug, Clone)]
pub struct Group {
    pub name: String,
    pub type_name: crate::types::QualifiedName,
    pub view: Arc<FlattenedView>,
    pub properties: IndexMap<String, ValueExpr>,
    pub members: Vec<String>,
}

/// A policy applied to groups or node templates.
#[derive(Debug, Clone)]
pub struct Policy {
    pub name: String,
    pub type_name: crate::types::QualifiedName,
    pub view: Arc<FlattenedView>,
    pub properties: IndexMap<String, ValueExpr>,
    pub targets: Vec<String>,
    /// Whether `targets` name groups (else node templates).
    pub targets_are_groups: bool,
}

const GROUP_KEYS: &[&str] = &["type", "description", "metadata", "properties", "members", "interfaces"];
const POLICY_KEYS: &[&str] = &["type", "description", "metadata", "properties", "targets", "triggers"];

pub(crate) fn elaborate_groups(
    raw: &Value,
    nodes: &IndexMap<String, NodeTemplate>,
    registry: &TypeRegistry,
    file: Option<&str>,
    sink: &mut DiagnosticSink,
) -> IndexMap<String, Group> {
    let mut groups = IndexMap::new();
    let entries = match raw {
        Value::Null => return groups,
        Value::Map(m) => m,
        other => {
            sink.error(
                DiagnosticKind::TypeMismatchError,
                format!("\"groups\" must be a map, got {}", other.type_name()),
                loc(file, "topology_template/groups"),
            );
            return groups;
        }
    };
    for (name, body) in entries {
        let location = loc(file, &format!("topology_template/groups/{}", name));
        let Some(map) = body.as_map() else {
            sink.error(
                DiagnosticKind::TypeMismatchError,
                format!("group \"{}\" must be a map", name),
                location,
            );
            continue;
        };
        for key in map.keys() {
            if !GROUP_KEYS.contains(&key.as_str()) {
                sink.error(
                    DiagnosticKind::UnknownFieldError,
                    format!("group \"{}\" contains unknown field \"{}\"", name, key),
                    location.clone(),
                );
            }
        }
        let Some(view) = resolve_type(
            map,
            name,
            "group",
            TypeKind::Group,
            "tosca.groups.Root",
            registry,
            &location,
            sink,
        ) else {
            continue;
        };
        let mut members = Vec::new();
        if let Some(raw_members) = map.get("members") {
            match raw_members.as_list() {
                Some(list) => {
                    members = list
                        .iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect::<Vec<_>>();
                    let mut unique = members.clone();
                    unique.sort();
                    unique.dedup();
                    if members.is_empty() || unique.len() != members.len() {
                        sink.error(
                            DiagnosticKind::SchemaError,
                            format!(
                                "member nodes of group \"{}\" should be >= 1 and not repeated",
                                name
                            ),
                            location.clone(),
                        );
                    }
                    for member in &members {
                        if !nodes.contains_key(member) {
                            sink.error(
                                DiagnosticKind::NoMatchError,
                                format!(
                                    "member \"{}\" of group \"{}\" is not found in node templates",
                                    member, name
                                ),
                                location.clone(),
                            );
                        }
                    }
                }
                None => sink.error(
                    DiagnosticKind::TypeMismatchError,
                    format!("\"members\" of group \"{}\" must be a list", name),
                    location.clone(),
                ),
            }
        }
        let mut properties = IndexMap::new();
        fill_properties(
            &format!("group \"{}\"", name),
            &view.properties.clone(),
            map.get("properties"),
            &mut properties,
            registry,
            &location,
            sink,
        );
        groups.insert(
            name.clone(),
            Group {
                name: name.clone(),
                type_name: view.name.clone(),
                view,
                properties,
                members,
            },
        );
    }
    groups
}

pub(crate) fn elaborate_policies(
    raw: &Value,
    nodes: &IndexMap<String, NodeTemplate>,
    groups: &IndexMap<String, Group>,
    registry: &TypeRegistry,
    file: Option<&str>,
    sink: &mut DiagnosticSink,
) -> Vec<Policy> {
    let mut policies = Vec::new();
    let entries = match raw {
        Value::Null => return policies,
        Value::List(l) => l,
        other => {
            sink.error(
                DiagnosticKind::TypeMismatchError,
                format!("\"policies\" must be a list, got {}", other.type_name()),
                loc(file, "topology_template/policies"),
            );
            return policies;
        }
    };
    for (index, entry) in entries.iter().enumerate() {
        let Some(entry_map) = entry.as_map() else {
            sink.error(
                DiagnosticKind::SchemaError,
                "each policy must be a named map",
                loc(file, &format!("topology_template/policies/{}", index)),
            );
            continue;
        };
        for (name, body) in entry_map {
            let location = loc(file, &format!("topology_template/policies/{}", name));
            let Some(map) = body.as_map() else {
                sink.error(
                    DiagnosticKind::TypeMismatchError,
                    format!("policy \"{}\" must be a map", name),
                    location,
                );
                continue;
            };
            for key in map.keys() {
                if !POLICY_KEYS.contains(&key.as_str()) {
                    sink.error(
                        DiagnosticKind::UnknownFieldError,
                        format!("policy \"{}\" contains unknown field \"{}\"", name, key),
                        location.clone(),
                    );
                }
            }
            let Some(view) = resolve_type(
                map,
                name,
                "policy",
                TypeKind::Policy,
                "tosca.policies.Root",
                registry,
                &location,
                sink,
            ) else {
                continue;
            };
            // Targets resolve against groups first, then node templates.
            let mut targets = Vec::new();
            let mut targets_are_groups = false;
            if let Some(raw_targets) = map.get("targets").and_then(Value::as_list) {
                targets = raw_targets
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect();
                targets_are_groups =
                    !targets.is_empty() && targets.iter().all(|t| groups.contains_key(t));
                if !targets_are_groups {
                    for target in &targets {
                        if !nodes.contains_key(target) && !groups.contains_key(target) {
                            sink.error(
                                DiagnosticKind::NoMatchError,
                                format!(
                                    "target \"{}\" of policy \"{}\" is not found in node templates or groups",
                                    target, name
                                ),
                                location.clone(),
                            );
                        }
                    }
                }
            }
            let mut properties = IndexMap::new();
            fill_properties(
                &format!("policy \"{}\"", name),
                &view.properties.clone(),
                map.get("properties"),
                &mut properties,
                registry,
                &location,
                sink,
            );
            policies.push(Policy {
                name: name.clone(),
                type_name: view.name.clone(),
                view,
                properties,
                targets,
                targets_are_groups,
            });
        }
    }
    policies
}

/// Resolve a group/policy type reference and require derivation from the
/// kind's root type.
#[allow(clippy::too_many_arguments)]
fn resolve_type(
    map: &IndexMap<String, Value>,
    name: &str,
    what: &str,
    kind: TypeKind,
    root: &str,
    registry: &TypeRegistry,
    location: &SourceLocation,
    sink: &mut DiagnosticSink,
) -> Option<Arc<FlattenedView>> {
    let Some(type_ref) = map.get("type").and_then(Value::as_str) else {
        sink.error(
            DiagnosticKind::MissingRequiredFieldError,
            format!("{} \"{}\" is missing required field \"type\"", what, name),
            location.clone(),
        );
        return None;
    };
    let Some(view) = registry.flattened(type_ref, kind) else {
        sink.error(
            DiagnosticKind::UnknownTypeError,
            format!("{} type \"{}\" of \"{}\" is not defined", what, type_ref, name),
            location.clone(),
        );
        return None;
    };
    if !view.derives_from(root) {
        sink.error(
            DiagnosticKind::TypeMismatchError,
            format!(
                "type \"{}\" of {} \"{}\" must be derived from \"{}\"",
                type_ref, what, name, root
            ),
            location.clone(),
        );
        return None;
    }
    Some(view)
}

fn loc(file: Option<&str>, path: &str) -> SourceLocation {
    match file {
        Some(f) => SourceLocation::in_file(f, path),
        None => SourceLocation::at_path(path),
    }
}
